//! The routine every simulation category runs: envelope, engine input,
//! simulation, results.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use simprep_core::{
    EnvelopeBuilder, GameData, ResultEnvelope, RunConfig, SimulationCategory, WowSpec,
    base_profile_path,
};
use std::io::ErrorKind;
use std::sync::Arc;

use crate::dispatcher::{CancellationToken, CategoryRoutine, RoutineRegistry};
use crate::output::ResultWriter;
use crate::simulator::{SimulationJob, Simulator, render_input};

pub struct ProfilesetRoutine {
    category: SimulationCategory,
    simulator: Arc<dyn Simulator>,
    game_data: Arc<dyn GameData>,
    writer: ResultWriter,
}

impl ProfilesetRoutine {
    #[must_use]
    pub fn new(
        category: SimulationCategory,
        simulator: Arc<dyn Simulator>,
        game_data: Arc<dyn GameData>,
        writer: ResultWriter,
    ) -> Self {
        Self {
            category,
            simulator,
            game_data,
            writer,
        }
    }

    fn simulate_one(
        &self,
        config: &RunConfig,
        spec: &WowSpec,
        fight_style: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let builder = EnvelopeBuilder::new(config, self.game_data.as_ref());
        let mut envelope = builder.build(self.category, spec, fight_style)?;

        let variants = self.game_data.variants(self.category, spec);
        let input = render_input(config, fight_style, &profile_sources(config, spec)?, &variants)?;
        let job = SimulationJob {
            name: format!(
                "{}_{}_{fight_style}",
                self.category.selector_name(),
                spec.key()
            ),
            input,
        };

        let result = self
            .simulator
            .simulate(&job, cancel)
            .with_context(|| format!("simulating {}", job.name))?;
        fill_data(&mut envelope, result.baseline, &result.profilesets);
        self.writer.write(&envelope)?;
        Ok(())
    }
}

/// Engine profile text: the shipped base profile, then the custom overlay.
///
/// A source that does not exist is skipped; any other read error is returned.
fn profile_sources(config: &RunConfig, spec: &WowSpec) -> Result<Vec<String>> {
    let mut paths = vec![base_profile_path(&config.executable, &config.tier, spec)];
    if config.custom_profile {
        paths.push(config.custom_profile_path.clone());
    }

    let mut sources = Vec::with_capacity(paths.len());
    for path in &paths {
        match std::fs::read_to_string(path) {
            Ok(source) => sources.push(source),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::debug!("no profile at {}", path.display());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading profile {}", path.display()));
            }
        }
    }
    Ok(sources)
}

fn fill_data(
    envelope: &mut ResultEnvelope,
    baseline: f64,
    profilesets: &std::collections::BTreeMap<String, f64>,
) {
    envelope.data.insert("baseline".to_string(), json!(baseline));
    for (name, mean) in profilesets {
        envelope.data.insert(name.clone(), json!(mean));
        envelope
            .translations
            .entry(name.clone())
            .or_insert_with(|| Value::String(simprep_core::title_case(&name.replace('_', " "))));
    }
}

impl CategoryRoutine for ProfilesetRoutine {
    fn run(&self, config: &RunConfig, cancel: &CancellationToken) -> Result<()> {
        let specs = config.resolved_specs()?;
        let mut attempted = 0_usize;
        let mut failed = 0_usize;

        for spec in &specs {
            for fight_style in &config.fight_styles {
                if cancel.is_cancelled() {
                    bail!("{} cancelled after {attempted} combinations", self.category);
                }
                attempted += 1;
                log::info!("{} | {spec} | {fight_style}", self.category);
                if let Err(err) = self.simulate_one(config, spec, fight_style, cancel) {
                    failed += 1;
                    log::error!("{} | {spec} | {fight_style}: {err:#}", self.category);
                }
            }
        }

        if failed > 0 {
            return Err(anyhow!(
                "{failed} of {attempted} {} combinations failed",
                self.category
            ));
        }
        Ok(())
    }
}

/// One [`ProfilesetRoutine`] per category, all sharing a back-end.
#[must_use]
pub fn default_routines(
    simulator: &Arc<dyn Simulator>,
    game_data: &Arc<dyn GameData>,
    writer: &ResultWriter,
) -> RoutineRegistry {
    SimulationCategory::ALL
        .into_iter()
        .map(|category| {
            let routine: Arc<dyn CategoryRoutine> = Arc::new(ProfilesetRoutine::new(
                category,
                Arc::clone(simulator),
                Arc::clone(game_data),
                writer.clone(),
            ));
            (category, routine)
        })
        .collect()
}
