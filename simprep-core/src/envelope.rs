//! Result envelopes: the JSON scaffold every simulation category fills in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::category::SimulationCategory;
use crate::config::RunConfig;
use crate::game_data::GameData;
use crate::profile::{Profile, ProfileError, extract_profile};
use crate::simc_hash::checkout_root;
use crate::specs::WowSpec;
use crate::tokenizer::title_case;

const COMMIT_URL: &str = "https://github.com/simulationcraft/simc/commit";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("no profile found or provided for {spec}")]
    NoProfile { spec: String },
}

/// Run settings recorded alongside the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimcSettings {
    pub tier: String,
    pub fight_style: String,
    pub iterations: String,
    pub target_error: String,
    /// `"1"` when the public test realm is simulated, `"0"` otherwise.
    pub ptr: String,
    pub simc_hash: Option<String>,
    // deprecated, kept for older consumers
    pub class: String,
    pub spec: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub data_type: String,
    pub timestamp: String,
    pub title: String,
    pub subtitle: String,
    pub simc_settings: SimcSettings,
    /// Filled by the category, never by the builder.
    pub data: Map<String, Value>,
    /// Filled by the category, never by the builder.
    pub translations: Map<String, Value>,
    pub profile: Profile,
    pub talent_data: Value,
    pub class_id: u32,
    pub spec_id: u32,
}

/// Location of the engine's shipped profile for `spec`.
///
/// `tier` `PR` selects the pre-raid profiles.
#[must_use]
pub fn base_profile_path(executable: &Path, tier: &str, spec: &WowSpec) -> PathBuf {
    let profiles = checkout_root(executable).join("profiles");
    let relative = if tier == "PR" {
        format!(
            "PreRaids/PR_{}_{}",
            title_case(spec.class.simc_name),
            title_case(spec.simc_name)
        )
    } else {
        title_case(&format!(
            "Tier{tier}/T{tier}_{}_{}",
            spec.class.simc_name, spec.simc_name
        ))
    };
    profiles.join(format!("{relative}.simc"))
}

/// `"Secondary Distributions"` -> `"secondary_distributions"`.
#[must_use]
pub fn data_type_tag(category: SimulationCategory) -> String {
    category.label().to_lowercase().replace(' ', "_")
}

/// Builds envelopes for one frozen configuration.
pub struct EnvelopeBuilder<'a> {
    config: &'a RunConfig,
    game_data: &'a dyn GameData,
}

impl<'a> EnvelopeBuilder<'a> {
    #[must_use]
    pub fn new(config: &'a RunConfig, game_data: &'a dyn GameData) -> Self {
        Self { config, game_data }
    }

    /// Base profile with the custom overlay layered on top when enabled.
    ///
    /// A missing base or overlay file is tolerated; an empty one is not.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::NoProfile`] when neither file exists, or the
    /// underlying [`ProfileError`] for empty or unreadable files.
    pub fn load_profile(&self, spec: &WowSpec) -> Result<Profile, EnvelopeError> {
        let class = spec.class.simc_name;
        let base_path = base_profile_path(&self.config.executable, &self.config.tier, spec);

        let base = match extract_profile(&base_path, class, None) {
            Ok(profile) => Some(profile),
            Err(err) if err.is_not_found() => {
                log::debug!("no base profile at {}", base_path.display());
                None
            }
            Err(err) => return Err(err.into()),
        };

        let profile = if self.config.custom_profile {
            match extract_profile(&self.config.custom_profile_path, class, base.clone()) {
                Ok(profile) => Some(profile),
                Err(err) if err.is_not_found() => base,
                Err(err) => return Err(err.into()),
            }
        } else {
            base
        };

        profile.ok_or_else(|| EnvelopeError::NoProfile {
            spec: spec.to_string(),
        })
    }

    /// # Errors
    ///
    /// See [`EnvelopeBuilder::load_profile`].
    pub fn build(
        &self,
        category: SimulationCategory,
        spec: &WowSpec,
        fight_style: &str,
    ) -> Result<ResultEnvelope, EnvelopeError> {
        self.build_at(category, spec, fight_style, Utc::now())
    }

    /// Like [`EnvelopeBuilder::build`] with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// See [`EnvelopeBuilder::load_profile`].
    pub fn build_at(
        &self,
        category: SimulationCategory,
        spec: &WowSpec,
        fight_style: &str,
        now: DateTime<Utc>,
    ) -> Result<ResultEnvelope, EnvelopeError> {
        let profile = self.load_profile(spec)?;
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();

        let mut subtitle = format!("UTC {timestamp}");
        if let Some(hash) = self.config.simc_hash.as_deref() {
            let short: String = hash.chars().take(7).collect();
            subtitle.push_str(&format!(
                r#" | SimC build: <a href="{COMMIT_URL}/{hash}" target="blank">{short}</a>"#
            ));
        }

        Ok(ResultEnvelope {
            data_type: data_type_tag(category),
            title: format!(
                "{} | {} {} | {}",
                title_case(category.label()),
                spec.full_name,
                spec.class.full_name,
                title_case(fight_style)
            ),
            subtitle,
            timestamp,
            simc_settings: SimcSettings {
                tier: self.config.tier.clone(),
                fight_style: fight_style.to_string(),
                iterations: self.config.iterations.to_string(),
                target_error: self.config.target_error_for(fight_style).to_string(),
                ptr: if self.config.ptr { "1" } else { "0" }.to_string(),
                simc_hash: self.config.simc_hash.clone(),
                class: spec.class.simc_name.to_string(),
                spec: spec.simc_name.to_string(),
            },
            data: Map::new(),
            translations: Map::new(),
            profile,
            talent_data: self.game_data.talent_data(spec, self.config.ptr),
            class_id: spec.class.id,
            spec_id: spec.id,
        })
    }
}
