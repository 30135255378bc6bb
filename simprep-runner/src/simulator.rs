//! Simulation back-ends: the local engine executable and the remote service.

use serde_json::Value;
use simprep_core::{RunConfig, Variant};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;

use crate::dispatcher::CancellationToken;
use crate::request::{RequestClient, RequestError, RetryPolicy};

pub const RAIDBOTS_URL: &str = "https://www.raidbots.com";
const REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ENGINE_WAIT_INTERVAL: Duration = Duration::from_millis(200);
const STDERR_TAIL: usize = 400;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },
    #[error("report is missing {0}")]
    MalformedReport(&'static str),
    #[error("report is not valid JSON: {0}")]
    InvalidReport(#[from] serde_json::Error),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("remote simulation {sim_id} ended in state '{state}'")]
    RemoteFailed { sim_id: String, state: String },
    #[error("failed to start async runtime: {0}")]
    Runtime(std::io::Error),
    #[error("{0} was cancelled")]
    Cancelled(String),
}

/// One engine input, named after the combination it simulates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationJob {
    pub name: String,
    pub input: String,
}

/// Mean dps of the baseline profile and of every profileset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationResult {
    pub baseline: f64,
    pub profilesets: BTreeMap<String, f64>,
}

pub trait Simulator: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the engine cannot run the job or its report is
    /// unusable, and [`SimulationError::Cancelled`] once `cancel` is set.
    fn simulate(
        &self,
        job: &SimulationJob,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult, SimulationError>;
}

/// Engine input for one spec and fight style.
///
/// `profile_sources` are concatenated in order, so later sources override
/// earlier ones the same way the engine reads them.
///
/// # Errors
///
/// Returns an error when an enabled custom APL or fight style file cannot be read.
pub fn render_input(
    config: &RunConfig,
    fight_style: &str,
    profile_sources: &[String],
    variants: &[Variant],
) -> Result<String, SimulationError> {
    let mut lines = Vec::new();
    if config.ptr {
        lines.push("ptr=1".to_string());
    }
    for source in profile_sources {
        lines.push(source.trim_end().to_string());
    }
    if config.custom_apl {
        lines.push(read_input(&config.custom_apl_path)?);
    }

    lines.push(format!("iterations={}", config.iterations));
    lines.push(format!(
        "target_error={}",
        config.target_error_for(fight_style)
    ));
    lines.push(format!("default_actions={}", u8::from(config.default_actions)));
    if let Some(threads) = config.threads {
        lines.push(format!("threads={threads}"));
    }
    if let Some(threads) = config.profileset_work_threads {
        lines.push(format!("profileset_work_threads={threads}"));
    }
    if config.custom_fight_style {
        lines.push(read_input(&config.custom_fight_style_path)?);
    } else {
        lines.push(format!("fight_style={fight_style}"));
    }

    for variant in variants {
        for option in &variant.overrides {
            lines.push(format!("profileset.\"{}\"+={option}", variant.name));
        }
    }

    let mut input = lines.join("\n");
    input.push('\n');
    Ok(input)
}

fn read_input(path: &Path) -> Result<String, SimulationError> {
    std::fs::read_to_string(path)
        .map(|contents| contents.trim_end().to_string())
        .map_err(|source| SimulationError::Io {
            action: "read",
            path: path.to_path_buf(),
            source,
        })
}

/// Pull baseline and profileset means out of a `json2` report.
///
/// # Errors
///
/// Returns [`SimulationError::MalformedReport`] when the baseline mean is absent.
pub fn parse_report(report: &Value) -> Result<SimulationResult, SimulationError> {
    let sim = report
        .get("sim")
        .ok_or(SimulationError::MalformedReport("sim"))?;
    let baseline = sim
        .pointer("/players/0/collected_data/dps/mean")
        .and_then(Value::as_f64)
        .ok_or(SimulationError::MalformedReport("baseline dps mean"))?;

    let profilesets = sim
        .pointer("/profilesets/results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|result| {
                    let name = result.get("name")?.as_str()?;
                    let mean = result.get("mean")?.as_f64()?;
                    Some((name.to_string(), mean))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(SimulationResult {
        baseline,
        profilesets,
    })
}

/// Runs the engine binary on this machine.
///
/// The child is polled rather than waited on, so a cancelled job kills it.
#[derive(Debug, Clone)]
pub struct SimcExecutable {
    executable: PathBuf,
    work_dir: PathBuf,
    wait_interval: Duration,
}

impl SimcExecutable {
    #[must_use]
    pub fn new(executable: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            executable,
            work_dir,
            wait_interval: ENGINE_WAIT_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_wait_interval(mut self, wait_interval: Duration) -> Self {
        self.wait_interval = wait_interval;
        self
    }
}

fn stderr_tail(path: &Path) -> String {
    let stderr = std::fs::read(path).unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr);
    let start = stderr.len().saturating_sub(STDERR_TAIL);
    stderr.get(start..).unwrap_or(&stderr).trim().to_string()
}

impl Simulator for SimcExecutable {
    fn simulate(
        &self,
        job: &SimulationJob,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult, SimulationError> {
        let io_error = |action, path: &Path| {
            let path = path.to_path_buf();
            move |source| SimulationError::Io {
                action,
                path,
                source,
            }
        };

        std::fs::create_dir_all(&self.work_dir)
            .map_err(io_error("create", &self.work_dir))?;
        let input_path = self.work_dir.join(format!("{}.simc", job.name));
        let report_path = self.work_dir.join(format!("{}.json", job.name));
        std::fs::write(&input_path, &job.input).map_err(io_error("write", &input_path))?;

        let stderr_path = self.work_dir.join(format!("{}.err", job.name));
        let stderr_file =
            std::fs::File::create(&stderr_path).map_err(io_error("create", &stderr_path))?;

        log::debug!("running {} on {}", self.executable.display(), input_path.display());
        let mut child = Command::new(&self.executable)
            .arg(&input_path)
            .arg(format!("json2={}", report_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr_file)
            .spawn()
            .map_err(io_error("run", &self.executable))?;

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .map_err(io_error("wait on", &self.executable))?
            {
                break status;
            }
            if cancel.is_cancelled() {
                log::warn!("killing engine for {}", job.name);
                // the child may exit on its own between try_wait and kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(SimulationError::Cancelled(job.name.clone()));
            }
            std::thread::sleep(self.wait_interval);
        };

        if !status.success() {
            return Err(SimulationError::EngineFailed {
                status: status.to_string(),
                stderr: stderr_tail(&stderr_path),
            });
        }

        let report = std::fs::read_to_string(&report_path).map_err(io_error("read", &report_path))?;
        parse_report(&serde_json::from_str(&report)?)
    }
}

/// Submits jobs to the remote simulation service and waits for the report.
pub struct RemoteSimulator {
    client: RequestClient,
    apikey: String,
    base_url: String,
    poll_interval: Duration,
    runtime: tokio::runtime::Runtime,
}

impl RemoteSimulator {
    /// # Errors
    ///
    /// Returns an error when the HTTP client or async runtime cannot be created.
    pub fn new(apikey: String) -> Result<Self, SimulationError> {
        let client = RequestClient::for_host(&format!("{RAIDBOTS_URL}/"), RetryPolicy::default())?;
        Self::with_client(client, apikey, RAIDBOTS_URL.to_string())
    }

    /// # Errors
    ///
    /// Returns an error when the async runtime cannot be created.
    pub fn with_client(
        client: RequestClient,
        apikey: String,
        base_url: String,
    ) -> Result<Self, SimulationError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("remote-sim")
            .build()
            .map_err(SimulationError::Runtime)?;
        Ok(Self {
            client,
            apikey,
            base_url,
            poll_interval: REMOTE_POLL_INTERVAL,
            runtime,
        })
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn run_remote(
        &self,
        job: &SimulationJob,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult, SimulationError> {
        let submitted = self
            .client
            .call(
                &format!("{}/sim", self.base_url),
                &self.apikey,
                Some(&Value::String(job.input.clone())),
            )
            .await?;
        let sim_id = submitted
            .get("simId")
            .and_then(Value::as_str)
            .ok_or(SimulationError::MalformedReport("simId"))?
            .to_string();
        log::info!("{} submitted as {sim_id}", job.name);

        loop {
            if cancel.is_cancelled() {
                return Err(SimulationError::Cancelled(job.name.clone()));
            }
            let status = self
                .client
                .call(&format!("{}/api/job/{sim_id}", self.base_url), "", None)
                .await?;
            let state = status
                .pointer("/job/state")
                .and_then(Value::as_str)
                .ok_or(SimulationError::MalformedReport("job state"))?;
            match state {
                "complete" => break,
                "failed" | "cancelled" => {
                    return Err(SimulationError::RemoteFailed {
                        sim_id,
                        state: state.to_string(),
                    });
                }
                _ => {
                    log::debug!("{sim_id} is {state}");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        let report = self
            .client
            .call(
                &format!("{}/reports/{sim_id}/data.json", self.base_url),
                "",
                None,
            )
            .await?;
        parse_report(&report)
    }
}

impl Simulator for RemoteSimulator {
    fn simulate(
        &self,
        job: &SimulationJob,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult, SimulationError> {
        self.runtime.block_on(self.run_remote(job, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{HttpRequest, HttpResponse, Transport, TransportError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn report() -> Value {
        json!({
            "sim": {
                "players": [{ "collected_data": { "dps": { "mean": 10_500.5 } } }],
                "profilesets": {
                    "results": [
                        { "name": "orc", "mean": 10_700.0 },
                        { "name": "troll", "mean": 10_650.25 }
                    ]
                }
            }
        })
    }

    #[test]
    fn report_means_are_extracted() {
        let result = parse_report(&report()).unwrap();
        assert!((result.baseline - 10_500.5).abs() < f64::EPSILON);
        assert_eq!(result.profilesets.len(), 2);
        assert!((result.profilesets["troll"] - 10_650.25).abs() < f64::EPSILON);
    }

    #[test]
    fn report_without_profilesets_is_baseline_only() {
        let result = parse_report(
            &json!({ "sim": { "players": [{ "collected_data": { "dps": { "mean": 1.0 } } }] } }),
        )
        .unwrap();
        assert!(result.profilesets.is_empty());
    }

    #[test]
    fn report_without_baseline_is_rejected() {
        assert!(matches!(
            parse_report(&json!({ "sim": { "players": [] } })),
            Err(SimulationError::MalformedReport(_))
        ));
    }

    #[test]
    fn input_carries_options_and_profilesets() {
        let config = RunConfig {
            ptr: true,
            threads: Some(4),
            iterations: 1000,
            ..RunConfig::default()
        };
        let variants = vec![Variant {
            name: "orc".to_string(),
            overrides: vec!["race=orc".to_string()],
        }];
        let input = render_input(
            &config,
            "hecticaddcleave",
            &["mage=\"T26_Mage_Frost\"\nrace=gnome\n".to_string()],
            &variants,
        )
        .unwrap();

        let lines: Vec<&str> = input.lines().collect();
        assert_eq!(lines[0], "ptr=1");
        assert!(lines.contains(&"iterations=1000"));
        assert!(lines.contains(&"threads=4"));
        assert!(lines.contains(&"fight_style=hecticaddcleave"));
        assert!(lines.contains(&"default_actions=1"));
        assert!(lines.contains(&"target_error=0.1"));
        assert_eq!(*lines.last().unwrap(), "profileset.\"orc\"+=race=orc");
        let profile_at = lines.iter().position(|line| *line == "race=gnome").unwrap();
        let options_at = lines.iter().position(|line| line.starts_with("iterations=")).unwrap();
        assert!(profile_at < options_at);
    }

    #[test]
    fn missing_custom_apl_is_an_error() {
        let config = RunConfig {
            custom_apl: true,
            custom_apl_path: PathBuf::from("/definitely/not/here/apl.txt"),
            ..RunConfig::default()
        };
        assert!(matches!(
            render_input(&config, "patchwerk", &[], &[]),
            Err(SimulationError::Io { action: "read", .. })
        ));
    }

    fn job() -> SimulationJob {
        SimulationJob {
            name: "races_mage_frost_patchwerk".to_string(),
            input: "mage=frost".to_string(),
        }
    }

    fn remote(transport: Arc<dyn Transport>) -> RemoteSimulator {
        let client = RequestClient::new(transport, RetryPolicy::default());
        RemoteSimulator::with_client(client, "key".to_string(), "https://sim.test".to_string())
            .unwrap()
            .with_poll_interval(Duration::from_millis(1))
    }

    /// Answers by url: submission, two polls, then the report.
    struct FakeService {
        polls: Mutex<u32>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for FakeService {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.url.clone());
            let body = if request.url.ends_with("/sim") {
                json!({ "simId": "abc" })
            } else if request.url.contains("/api/job/") {
                let mut polls = self.polls.lock().unwrap();
                *polls += 1;
                let state = if *polls < 2 { "queued" } else { "complete" };
                json!({ "job": { "state": state } })
            } else {
                report()
            };
            Ok(HttpResponse {
                status: 200,
                body: body.to_string(),
            })
        }
    }

    #[test]
    fn remote_simulation_submits_polls_and_fetches() {
        let service = Arc::new(FakeService {
            polls: Mutex::new(0),
            seen: Mutex::new(Vec::new()),
        });
        let simulator = remote(service.clone());

        let result = simulator
            .simulate(&job(), &CancellationToken::new())
            .unwrap();

        assert_eq!(result.profilesets.len(), 2);
        let seen = service.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "https://sim.test/sim",
                "https://sim.test/api/job/abc",
                "https://sim.test/api/job/abc",
                "https://sim.test/reports/abc/data.json",
            ]
        );
    }

    /// Accepts the submission, then never reports a job state.
    struct LostJob {
        polls: Mutex<u32>,
    }

    #[async_trait]
    impl Transport for LostJob {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let body = if request.url.ends_with("/sim") {
                json!({ "simId": "abc" })
            } else {
                *self.polls.lock().unwrap() += 1;
                json!({ "error": "job not found" })
            };
            Ok(HttpResponse {
                status: 200,
                body: body.to_string(),
            })
        }
    }

    #[test]
    fn remote_job_without_state_is_malformed() {
        let service = Arc::new(LostJob {
            polls: Mutex::new(0),
        });
        let simulator = remote(service.clone());

        let started = std::time::Instant::now();
        let result = simulator.simulate(&job(), &CancellationToken::new());

        assert!(matches!(
            result,
            Err(SimulationError::MalformedReport("job state"))
        ));
        assert_eq!(*service.polls.lock().unwrap(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    /// Keeps every job queued forever.
    struct StuckQueue;

    #[async_trait]
    impl Transport for StuckQueue {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let body = if request.url.ends_with("/sim") {
                json!({ "simId": "abc" })
            } else {
                json!({ "job": { "state": "queued" } })
            };
            Ok(HttpResponse {
                status: 200,
                body: body.to_string(),
            })
        }
    }

    #[test]
    fn remote_polling_stops_once_cancelled() {
        let simulator = remote(Arc::new(StuckQueue));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trigger.cancel();
        });

        let result = simulator.simulate(&job(), &cancel);
        canceller.join().unwrap();

        assert!(matches!(result, Err(SimulationError::Cancelled(name)) if name == job().name));
    }

    #[test]
    fn remote_simulation_cancelled_up_front_never_polls() {
        let service = Arc::new(LostJob {
            polls: Mutex::new(0),
        });
        let simulator = remote(service.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            simulator.simulate(&job(), &cancel),
            Err(SimulationError::Cancelled(_))
        ));
        assert_eq!(*service.polls.lock().unwrap(), 0);
    }

    #[cfg(unix)]
    mod local_engine {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        fn work_dir(label: &str) -> PathBuf {
            std::env::temp_dir().join(format!(
                "simprep-engine-{label}-{}",
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos()
            ))
        }

        fn engine(dir: &Path, script: &str) -> PathBuf {
            std::fs::create_dir_all(dir).unwrap();
            let path = dir.join("simc");
            std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn hung_engine_is_killed_when_cancelled() {
            let dir = work_dir("hung");
            let simulator = SimcExecutable::new(engine(&dir, "exec sleep 30"), dir.join("work"))
                .with_wait_interval(Duration::from_millis(5));
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let canceller = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                trigger.cancel();
            });

            let started = Instant::now();
            let result = simulator.simulate(&job(), &cancel);
            canceller.join().unwrap();

            assert!(matches!(result, Err(SimulationError::Cancelled(_))));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn failing_engine_reports_stderr_tail() {
            let dir = work_dir("failing");
            let simulator = SimcExecutable::new(
                engine(&dir, "echo 'unknown option' >&2\nexit 3"),
                dir.join("work"),
            )
            .with_wait_interval(Duration::from_millis(5));

            match simulator.simulate(&job(), &CancellationToken::new()) {
                Err(SimulationError::EngineFailed { stderr, .. }) => {
                    assert_eq!(stderr, "unknown option");
                }
                other => panic!("expected engine failure, got {other:?}"),
            }
        }
    }
}
