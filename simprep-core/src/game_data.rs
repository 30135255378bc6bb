//! Reference data supplied from outside the engine: talent tables and the
//! profileset variants each category compares.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::category::SimulationCategory;
use crate::specs::WowSpec;

const TALENTS_FILE: &str = "talents.json";
const VARIANTS_FILE: &str = "variants.json";
const ANY_CLASS: &str = "*";

#[derive(Debug, Error)]
pub enum GameDataError {
    #[error("failed to read game data {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse game data {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One profileset compared against the baseline profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    /// Engine option lines applied on top of the baseline, e.g. `race=orc`.
    #[serde(default)]
    pub overrides: Vec<String>,
}

/// Source of talent tables and category variants.
pub trait GameData: Send + Sync {
    /// Talent reference data for `spec`, for live or the public test realm.
    fn talent_data(&self, spec: &WowSpec, ptr: bool) -> Value;

    /// Variants simulated by `category` for `spec`.
    fn variants(&self, category: SimulationCategory, spec: &WowSpec) -> Vec<Variant>;
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TalentTables {
    #[serde(default)]
    live: BTreeMap<String, Value>,
    #[serde(default)]
    ptr: BTreeMap<String, Value>,
}

/// Category -> (`class_spec` | `class` | `*`) -> variants.
type VariantTables = BTreeMap<SimulationCategory, BTreeMap<String, Vec<Variant>>>;

/// Game data read from `talents.json` and `variants.json` in one directory.
///
/// A missing file counts as empty data.
#[derive(Debug, Clone, Default)]
pub struct JsonGameData {
    talents: TalentTables,
    variants: VariantTables,
}

impl JsonGameData {
    /// # Errors
    ///
    /// Returns an error if a present file cannot be read or parsed.
    pub fn load(dir: &Path) -> Result<Self, GameDataError> {
        let talents = load_optional(&dir.join(TALENTS_FILE))?.unwrap_or_default();
        let variants = load_optional(&dir.join(VARIANTS_FILE))?.unwrap_or_default();
        Ok(Self { talents, variants })
    }

    /// # Errors
    ///
    /// Returns an error if either document is not valid game data.
    pub fn from_json(talents: &str, variants: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            talents: serde_json::from_str(talents)?,
            variants: serde_json::from_str(variants)?,
        })
    }
}

fn load_optional<T>(path: &Path) -> Result<Option<T>, GameDataError>
where
    T: serde::de::DeserializeOwned,
{
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{} not found, continuing without it", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(GameDataError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|source| GameDataError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

impl GameData for JsonGameData {
    fn talent_data(&self, spec: &WowSpec, ptr: bool) -> Value {
        let table = if ptr {
            &self.talents.ptr
        } else {
            &self.talents.live
        };
        table.get(&spec.key()).cloned().unwrap_or_else(|| {
            log::debug!("no talent data for {} (ptr: {ptr})", spec.key());
            Value::Object(serde_json::Map::new())
        })
    }

    fn variants(&self, category: SimulationCategory, spec: &WowSpec) -> Vec<Variant> {
        let Some(by_key) = self.variants.get(&category) else {
            return Vec::new();
        };
        [spec.key().as_str(), spec.class.simc_name, ANY_CLASS]
            .into_iter()
            .find_map(|key| by_key.get(key))
            .cloned()
            .unwrap_or_default()
    }
}
