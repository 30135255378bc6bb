//! `simulation_type,class,spec,fight_style` selector for a focused run.

use simprep_core::{RunConfig, SimulationCategory, SpecRef, UnknownCategory, WowSpec, find_spec};
use thiserror::Error;

/// Iterations used for every focused run.
pub const SINGLE_SIM_ITERATIONS: u64 = 20_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("expected 'simulation_type,class,spec,fight_style', got '{0}'")]
    Malformed(String),
    #[error(transparent)]
    UnknownCategory(#[from] UnknownCategory),
    #[error("unknown class/spec combination '{class}' '{spec}'")]
    UnknownSpec { class: String, spec: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleSim {
    pub category: SimulationCategory,
    pub spec: WowSpec,
    pub fight_style: String,
}

impl SingleSim {
    /// # Errors
    ///
    /// Fails for a selector without exactly four fields, an unknown
    /// simulation type or a class/spec missing from the catalog.
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let fields: Vec<&str> = selector.split(',').map(str::trim).collect();
        let [kind, class, spec, fight_style] = fields.as_slice() else {
            return Err(SelectorError::Malformed(selector.to_string()));
        };
        if fight_style.is_empty() {
            return Err(SelectorError::Malformed(selector.to_string()));
        }

        let category = kind.parse::<SimulationCategory>()?;
        let spec = find_spec(class, spec).ok_or_else(|| SelectorError::UnknownSpec {
            class: (*class).to_string(),
            spec: (*spec).to_string(),
        })?;

        Ok(Self {
            category,
            spec,
            fight_style: fight_style.to_lowercase(),
        })
    }

    /// Narrow `config` to this one combination.
    ///
    /// `target_error` replaces the fight style's configured error when given.
    pub fn apply(&self, config: &mut RunConfig, target_error: Option<&str>) {
        config.enabled_categories = vec![self.category];
        config.specs = vec![SpecRef {
            class: self.spec.class.simc_name.to_string(),
            spec: self.spec.simc_name.to_string(),
        }];
        config.fight_styles = vec![self.fight_style.clone()];
        config.iterations = SINGLE_SIM_ITERATIONS;
        // all cores unless --threads says otherwise
        config.threads = None;
        config.use_own_threading = false;
        config.use_raidbots = false;
        if let Some(target_error) = target_error {
            config
                .target_error
                .insert(self.fight_style.clone(), target_error.to_string());
        }
    }
}
