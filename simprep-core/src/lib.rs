//! SimPrep core
//!
//! Platform-agnostic pieces of the SimulationCraft automation: profile
//! extraction, build hash lookup, the class/spec catalog, run configuration
//! and result envelope scaffolding. Nothing in this crate spawns processes
//! or talks to the network.

pub mod category;
pub mod config;
pub mod envelope;
pub mod game_data;
pub mod profile;
pub mod simc_hash;
pub mod specs;
pub mod tokenizer;

// Re-export commonly used types
pub use category::{SimulationCategory, UnknownCategory};
pub use config::{ConfigError, RunConfig, SpecRef};
pub use envelope::{
    EnvelopeBuilder, EnvelopeError, ResultEnvelope, SimcSettings, base_profile_path,
    data_type_tag,
};
pub use game_data::{GameData, GameDataError, JsonGameData, Variant};
pub use profile::{
    CharacterField, ItemField, ItemSlot, Profile, ProfileError, ProfileEvent, classify_line,
    extract_profile, fold,
};
pub use simc_hash::{HashError, resolve_simc_hash};
pub use specs::{Role, WOW_SPECS, WowClass, WowSpec, dps_specs, find_spec};
pub use tokenizer::{title_case, tokenize};
