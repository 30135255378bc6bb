//! Runs every enabled simulation category, each on its own named thread, and
//! waits for all of them while reporting progress.

use simprep_core::{RunConfig, SimulationCategory};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shared flag a routine checks between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The work done for one simulation category.
pub trait CategoryRoutine: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the category could not be completed.
    fn run(&self, config: &RunConfig, cancel: &CancellationToken) -> anyhow::Result<()>;
}

pub type RoutineRegistry = BTreeMap<SimulationCategory, Arc<dyn CategoryRoutine>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryOutcome {
    Finished,
    Failed(String),
    Panicked(String),
    TimedOut,
}

impl CategoryOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Outcome of every category that was launched, in launch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: BTreeMap<SimulationCategory, CategoryOutcome>,
}

impl DispatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(CategoryOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&SimulationCategory, &CategoryOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
    }
}

struct LiveTask {
    category: SimulationCategory,
    handle: JoinHandle<anyhow::Result<()>>,
    cancel: CancellationToken,
    started: Instant,
}

pub struct Dispatcher {
    config: Arc<RunConfig>,
    routines: RoutineRegistry,
    poll_interval: Duration,
    task_timeout: Option<Duration>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: Arc<RunConfig>, routines: RoutineRegistry) -> Self {
        let task_timeout = config.task_timeout_secs.map(Duration::from_secs);
        Self {
            config,
            routines,
            poll_interval: DEFAULT_POLL_INTERVAL,
            task_timeout,
        }
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub const fn with_task_timeout(mut self, task_timeout: Option<Duration>) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Run every enabled category and collect how each one ended.
    ///
    /// Failures are reported, never retried, and never stop sibling categories.
    #[must_use]
    pub fn run(&self) -> DispatchReport {
        let enabled: Vec<SimulationCategory> = SimulationCategory::ALL
            .into_iter()
            .filter(|category| self.config.is_enabled(*category))
            .collect();

        let report = if self.config.use_own_threading {
            self.run_concurrent(&enabled)
        } else {
            self.run_sequential(&enabled)
        };

        for (category, outcome) in report.failures() {
            match outcome {
                CategoryOutcome::Failed(message) => log::error!("{category} failed: {message}"),
                CategoryOutcome::Panicked(message) => {
                    log::error!("{category} panicked: {message}");
                }
                CategoryOutcome::TimedOut => log::error!("{category} timed out"),
                CategoryOutcome::Finished => {}
            }
        }
        report
    }

    fn routine(&self, category: SimulationCategory) -> Option<Arc<dyn CategoryRoutine>> {
        let routine = self.routines.get(&category).cloned();
        if routine.is_none() {
            log::warn!("no routine registered for {category}");
        }
        routine
    }

    fn run_sequential(&self, enabled: &[SimulationCategory]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for &category in enabled {
            let Some(routine) = self.routine(category) else {
                report.outcomes.insert(
                    category,
                    CategoryOutcome::Failed("no routine registered".to_string()),
                );
                continue;
            };
            log::info!("{category} started");
            let started = Instant::now();
            let cancel = CancellationToken::new();
            let result = catch_unwind(AssertUnwindSafe(|| routine.run(&self.config, &cancel)));
            let outcome = outcome_of(result);
            if outcome.is_success() {
                log::info!("{category} finished in {:.1?}", started.elapsed());
            }
            report.outcomes.insert(category, outcome);
        }
        report
    }

    fn run_concurrent(&self, enabled: &[SimulationCategory]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut live = Vec::with_capacity(enabled.len());

        for &category in enabled {
            let Some(routine) = self.routine(category) else {
                report.outcomes.insert(
                    category,
                    CategoryOutcome::Failed("no routine registered".to_string()),
                );
                continue;
            };
            let config = Arc::clone(&self.config);
            let cancel = CancellationToken::new();
            let task_cancel = cancel.clone();
            let spawned = thread::Builder::new()
                .name(category.thread_name().to_string())
                .spawn(move || routine.run(&config, &task_cancel));
            match spawned {
                Ok(handle) => {
                    log::info!("{} started", category.thread_name());
                    live.push(LiveTask {
                        category,
                        handle,
                        cancel,
                        started: Instant::now(),
                    });
                }
                Err(err) => {
                    report.outcomes.insert(
                        category,
                        CategoryOutcome::Failed(format!("failed to start thread: {err}")),
                    );
                }
            }
        }

        while !live.is_empty() {
            let mut pending = Vec::with_capacity(live.len());
            for task in live {
                if task.handle.is_finished() {
                    let result = task.handle.join();
                    // a panic outranks the timeout that provoked it
                    let outcome = if task.cancel.is_cancelled() && result.is_ok() {
                        CategoryOutcome::TimedOut
                    } else {
                        outcome_of(result)
                    };
                    if outcome.is_success() {
                        log::info!(
                            "{} finished in {:.1?}",
                            task.category.thread_name(),
                            task.started.elapsed()
                        );
                    }
                    report.outcomes.insert(task.category, outcome);
                    continue;
                }

                if let Some(timeout) = self.task_timeout
                    && !task.cancel.is_cancelled()
                    && task.started.elapsed() >= timeout
                {
                    log::warn!(
                        "{} exceeded {timeout:?}, cancelling",
                        task.category.thread_name()
                    );
                    task.cancel.cancel();
                } else {
                    log::debug!("{} still in progress", task.category.thread_name());
                }
                pending.push(task);
            }
            live = pending;
            if !live.is_empty() {
                thread::sleep(self.poll_interval);
            }
        }
        report
    }
}

fn outcome_of(result: thread::Result<anyhow::Result<()>>) -> CategoryOutcome {
    match result {
        Ok(Ok(())) => CategoryOutcome::Finished,
        Ok(Err(err)) => CategoryOutcome::Failed(format!("{err:#}")),
        Err(payload) => CategoryOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
