//! Character profiles extracted from SimulationCraft profile files.
//!
//! Extraction is split in two: [`classify_line`] decides what a line means,
//! [`fold`] accumulates the resulting events into a [`Profile`]. Layering a
//! custom overlay on top of a base profile is just a second extraction that
//! starts from the first result.

mod classify;

pub use classify::{ProfileEvent, classify_line};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Character-level keys of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterField {
    Class,
    Level,
    Race,
    Role,
    Position,
    Talents,
    Spec,
    AzeriteEssences,
    Covenant,
    Soulbind,
}

impl CharacterField {
    /// Fields read from profile lines. `Class` is always supplied by the caller.
    pub const SCANNED: [Self; 9] = [
        Self::Level,
        Self::Race,
        Self::Role,
        Self::Position,
        Self::Talents,
        Self::Spec,
        Self::AzeriteEssences,
        Self::Covenant,
        Self::Soulbind,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Level => "level",
            Self::Race => "race",
            Self::Role => "role",
            Self::Position => "position",
            Self::Talents => "talents",
            Self::Spec => "spec",
            Self::AzeriteEssences => "azerite_essences",
            Self::Covenant => "covenant",
            Self::Soulbind => "soulbind",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::SCANNED
            .into_iter()
            .chain(std::iter::once(Self::Class))
            .find(|field| field.key() == key)
    }
}

/// Canonical equipment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSlot {
    Head,
    Neck,
    Shoulders,
    Back,
    Chest,
    Wrists,
    Hands,
    Waist,
    Legs,
    Feet,
    Finger1,
    Finger2,
    Trinket1,
    Trinket2,
    MainHand,
    OffHand,
}

impl ItemSlot {
    /// Every spelling accepted in profile files, aliases included.
    /// Longer spellings precede their prefixes.
    pub const SPELLINGS: [(&'static str, Self); 18] = [
        ("head", Self::Head),
        ("neck", Self::Neck),
        ("shoulders", Self::Shoulders),
        ("shoulder", Self::Shoulders),
        ("back", Self::Back),
        ("chest", Self::Chest),
        ("wrists", Self::Wrists),
        ("wrist", Self::Wrists),
        ("hands", Self::Hands),
        ("waist", Self::Waist),
        ("legs", Self::Legs),
        ("feet", Self::Feet),
        ("finger1", Self::Finger1),
        ("finger2", Self::Finger2),
        ("trinket1", Self::Trinket1),
        ("trinket2", Self::Trinket2),
        ("main_hand", Self::MainHand),
        ("off_hand", Self::OffHand),
    ];

    #[must_use]
    pub fn from_spelling(spelling: &str) -> Option<Self> {
        Self::SPELLINGS
            .iter()
            .find(|(candidate, _)| *candidate == spelling)
            .map(|(_, slot)| *slot)
    }
}

/// Attributes recognised inside an item slot assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    Id,
    BonusId,
    AzeritePowers,
    Enchant,
    AzeriteLevel,
    Ilevel,
    GemId,
    EnchantId,
}

impl ItemField {
    pub const ALL: [Self; 8] = [
        Self::Id,
        Self::BonusId,
        Self::AzeritePowers,
        Self::Enchant,
        Self::AzeriteLevel,
        Self::Ilevel,
        Self::GemId,
        Self::EnchantId,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::BonusId => "bonus_id",
            Self::AzeritePowers => "azerite_powers",
            Self::Enchant => "enchant",
            Self::AzeriteLevel => "azerite_level",
            Self::Ilevel => "ilevel",
            Self::GemId => "gem_id",
            Self::EnchantId => "enchant_id",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }
}

/// One character configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub character: BTreeMap<CharacterField, String>,
    pub items: BTreeMap<ItemSlot, BTreeMap<ItemField, String>>,
}

impl Profile {
    #[must_use]
    pub fn character(&self, field: CharacterField) -> Option<&str> {
        self.character.get(&field).map(String::as_str)
    }

    #[must_use]
    pub fn item(&self, slot: ItemSlot, field: ItemField) -> Option<&str> {
        self.items
            .get(&slot)
            .and_then(|attributes| attributes.get(&field))
            .map(String::as_str)
    }
}

/// Errors raised while reading a profile source.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile source {} is empty", .path.display())]
    EmptySource { path: PathBuf },
    #[error("profile source {} not found", .path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read profile source {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ProfileError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Apply events in order; later events win.
#[must_use]
pub fn fold<I>(mut profile: Profile, events: I) -> Profile
where
    I: IntoIterator<Item = ProfileEvent>,
{
    for event in events {
        match event {
            ProfileEvent::CharacterSet { field, value } => {
                profile.character.insert(field, value);
            }
            ProfileEvent::SlotSet(slot) => {
                profile.items.insert(slot, BTreeMap::new());
            }
            ProfileEvent::SlotClear(slot) => {
                profile.items.remove(&slot);
            }
            ProfileEvent::SubFieldSet { slot, field, value } => {
                profile.items.entry(slot).or_default().insert(field, value);
            }
        }
    }
    profile
}

/// Extract a profile from `path`, optionally layering it over `existing`.
///
/// `class` is stored as the character class regardless of file contents.
///
/// # Errors
///
/// Returns [`ProfileError::EmptySource`] for a zero-length file,
/// [`ProfileError::NotFound`] when the file is missing and
/// [`ProfileError::Io`] for any other read failure. No partial profile is
/// returned on error.
pub fn extract_profile(
    path: &Path,
    class: &str,
    existing: Option<Profile>,
) -> Result<Profile, ProfileError> {
    let metadata = std::fs::metadata(path).map_err(|err| ProfileError::from_io(path, err))?;
    if metadata.len() == 0 {
        return Err(ProfileError::EmptySource {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|err| ProfileError::from_io(path, err))?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| ProfileError::from_io(path, err))?;
        events.extend(classify_line(&line));
    }

    let mut profile = existing.unwrap_or_default();
    profile
        .character
        .insert(CharacterField::Class, class.to_string());
    let profile = fold(profile, events);

    log::debug!(
        "extracted profile from {}: {} character fields, {} item slots",
        path.display(),
        profile.character.len(),
        profile.items.len()
    );
    Ok(profile)
}
