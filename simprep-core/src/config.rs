//! Run configuration.
//!
//! Built once (settings file, then command-line overrides), then frozen and
//! shared read-only with every category task.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::category::SimulationCategory;
use crate::specs::{WowSpec, dps_specs, find_spec};

pub const FALLBACK_TARGET_ERROR: &str = "0.1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unknown class/spec combination '{class}' '{spec}'")]
    UnknownSpec { class: String, spec: String },
}

/// Class/spec pair as written in settings or on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecRef {
    pub class: String,
    pub spec: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "RunConfig::default_executable")]
    pub executable: PathBuf,
    /// Engine threads; `None` lets the engine use every core.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub profileset_work_threads: Option<usize>,
    #[serde(default = "RunConfig::default_tier")]
    pub tier: String,
    #[serde(default = "RunConfig::default_fight_styles")]
    pub fight_styles: Vec<String>,
    #[serde(default = "RunConfig::default_iterations")]
    pub iterations: u64,
    /// Target statistical error per fight style.
    #[serde(default = "RunConfig::default_target_error")]
    pub target_error: BTreeMap<String, String>,
    #[serde(default)]
    pub ptr: bool,
    #[serde(default = "RunConfig::default_simc_branch")]
    pub simc_branch: String,
    /// Resolved before dispatch; never read from settings.
    #[serde(skip)]
    pub simc_hash: Option<String>,
    #[serde(default = "RunConfig::default_enabled_categories")]
    pub enabled_categories: Vec<SimulationCategory>,
    /// Empty means every damage spec.
    #[serde(default)]
    pub specs: Vec<SpecRef>,
    #[serde(default = "RunConfig::default_true")]
    pub use_own_threading: bool,
    #[serde(default)]
    pub use_raidbots: bool,
    #[serde(default)]
    pub raidbots_apikey: String,
    #[serde(default)]
    pub custom_profile: bool,
    #[serde(default = "RunConfig::default_custom_profile_path")]
    pub custom_profile_path: PathBuf,
    #[serde(default)]
    pub custom_apl: bool,
    #[serde(default = "RunConfig::default_custom_apl_path")]
    pub custom_apl_path: PathBuf,
    #[serde(default)]
    pub custom_fight_style: bool,
    #[serde(default = "RunConfig::default_custom_fight_style_path")]
    pub custom_fight_style_path: PathBuf,
    #[serde(default = "RunConfig::default_true")]
    pub default_actions: bool,
    #[serde(default = "RunConfig::default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "RunConfig::default_game_data_dir")]
    pub game_data_dir: PathBuf,
    /// Upper bound on one category's run time, in seconds.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

impl RunConfig {
    fn default_executable() -> PathBuf {
        PathBuf::from("../SimulationCraft/engine/simc")
    }

    fn default_tier() -> String {
        "26".to_string()
    }

    fn default_fight_styles() -> Vec<String> {
        vec!["patchwerk".to_string(), "hecticaddcleave".to_string()]
    }

    const fn default_iterations() -> u64 {
        60_000
    }

    fn default_target_error() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("patchwerk".to_string(), "0.1".to_string()),
            ("hecticaddcleave".to_string(), "0.1".to_string()),
        ])
    }

    fn default_simc_branch() -> String {
        crate::simc_hash::DEFAULT_BRANCH.to_string()
    }

    fn default_enabled_categories() -> Vec<SimulationCategory> {
        SimulationCategory::ALL.to_vec()
    }

    const fn default_true() -> bool {
        true
    }

    fn default_custom_profile_path() -> PathBuf {
        PathBuf::from("custom_profile.txt")
    }

    fn default_custom_apl_path() -> PathBuf {
        PathBuf::from("custom_apl.txt")
    }

    fn default_custom_fight_style_path() -> PathBuf {
        PathBuf::from("custom_fight_style.txt")
    }

    fn default_output_dir() -> PathBuf {
        PathBuf::from("results")
    }

    fn default_game_data_dir() -> PathBuf {
        PathBuf::from("game_data")
    }

    /// Load settings from a JSON file; absent keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn is_enabled(&self, category: SimulationCategory) -> bool {
        self.enabled_categories.contains(&category)
    }

    /// Target error for a fight style, falling back to `0.1`.
    #[must_use]
    pub fn target_error_for(&self, fight_style: &str) -> &str {
        self.target_error
            .get(fight_style)
            .map_or(FALLBACK_TARGET_ERROR, String::as_str)
    }

    /// Apply one target error to every configured fight style.
    pub fn override_target_error(&mut self, target_error: &str) {
        for fight_style in &self.fight_styles {
            self.target_error
                .insert(fight_style.clone(), target_error.to_string());
        }
        for value in self.target_error.values_mut() {
            *value = target_error.to_string();
        }
    }

    /// Specs to simulate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSpec`] for a pair missing from the catalog.
    pub fn resolved_specs(&self) -> Result<Vec<WowSpec>, ConfigError> {
        if self.specs.is_empty() {
            return Ok(dps_specs());
        }
        self.specs
            .iter()
            .map(|entry| {
                find_spec(&entry.class, &entry.spec).ok_or_else(|| ConfigError::UnknownSpec {
                    class: entry.class.clone(),
                    spec: entry.spec.clone(),
                })
            })
            .collect()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            executable: Self::default_executable(),
            threads: None,
            profileset_work_threads: None,
            tier: Self::default_tier(),
            fight_styles: Self::default_fight_styles(),
            iterations: Self::default_iterations(),
            target_error: Self::default_target_error(),
            ptr: false,
            simc_branch: Self::default_simc_branch(),
            simc_hash: None,
            enabled_categories: Self::default_enabled_categories(),
            specs: Vec::new(),
            use_own_threading: true,
            use_raidbots: false,
            raidbots_apikey: String::new(),
            custom_profile: false,
            custom_profile_path: Self::default_custom_profile_path(),
            custom_apl: false,
            custom_apl_path: Self::default_custom_apl_path(),
            custom_fight_style: false,
            custom_fight_style_path: Self::default_custom_fight_style_path(),
            default_actions: true,
            output_dir: Self::default_output_dir(),
            game_data_dir: Self::default_game_data_dir(),
            task_timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_use_defaults() {
        let config = RunConfig::from_json("{}").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.tier, "26");
        assert_eq!(config.iterations, 60_000);
        assert!(config.use_own_threading);
        assert!(config.default_actions);
        assert_eq!(config.enabled_categories.len(), SimulationCategory::ALL.len());
        assert!(config.simc_hash.is_none());
    }

    #[test]
    fn partial_settings_override_fields() {
        let config = RunConfig::from_json(
            r#"{
                "tier": "PR",
                "iterations": 1000,
                "enabled_categories": ["races", "soul_binds"],
                "specs": [{ "class": "mage", "spec": "frost" }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.tier, "PR");
        assert!(config.is_enabled(SimulationCategory::SoulBinds));
        assert!(!config.is_enabled(SimulationCategory::Talents));
        let specs = config.resolved_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, 64);
    }

    #[test]
    fn target_error_falls_back() {
        let mut config = RunConfig::default();
        assert_eq!(config.target_error_for("patchwerk"), "0.1");
        assert_eq!(config.target_error_for("dungeonslice"), FALLBACK_TARGET_ERROR);
        config.override_target_error("0.3");
        assert_eq!(config.target_error_for("hecticaddcleave"), "0.3");
    }

    #[test]
    fn unknown_spec_is_reported() {
        let config = RunConfig {
            specs: vec![SpecRef {
                class: "mage".to_string(),
                spec: "teleport".to_string(),
            }],
            ..RunConfig::default()
        };
        assert!(matches!(
            config.resolved_specs(),
            Err(ConfigError::UnknownSpec { .. })
        ));
    }
}
