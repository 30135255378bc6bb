mod categories;
mod dispatcher;
mod output;
mod request;
mod selector;
mod simulator;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use simprep_core::{GameData, JsonGameData, RunConfig, resolve_simc_hash};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use categories::default_routines;
use dispatcher::{DispatchReport, Dispatcher};
use output::ResultWriter;
use selector::SingleSim;
use simulator::{RemoteSimulator, SimcExecutable, Simulator};

#[derive(Debug, Default, Parser)]
#[command(name = "simprep-runner", version)]
#[command(about = "Prepares SimulationCraft inputs and runs every enabled simulation category")]
struct Args {
    /// Path to the SimulationCraft executable
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Engine threads (default: every core)
    #[arg(long)]
    threads: Option<usize>,

    /// Engine threads per profileset
    #[arg(long)]
    profileset_work_threads: Option<usize>,

    /// Log debug output
    #[arg(long)]
    debug: bool,

    /// Simulate the public test realm
    #[arg(long)]
    ptr: bool,

    /// Run one combination: simulation_type,class,spec,fight_style
    #[arg(short = 's', long, value_name = "SELECTOR")]
    single_sim: Option<String>,

    /// Layer the custom profile file on top of every base profile
    #[arg(long)]
    custom_profile: bool,

    /// Use the custom APL file instead of the default actions
    #[arg(long)]
    custom_apl: bool,

    /// Use the custom fight style file
    #[arg(long)]
    custom_fight_style: bool,

    /// Target error applied to every fight style
    #[arg(long)]
    target_error: Option<String>,

    /// Run simulations on the remote service instead of the local engine
    #[arg(long)]
    raidbots: bool,

    /// JSON settings file; absent keys take their defaults
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory results are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Run each category on its own thread
    #[arg(long, value_name = "BOOL")]
    own_threading: Option<bool>,

    /// Also write log.txt and error.log into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

const LOG_FILE: &str = "log.txt";
const ERROR_LOG_FILE: &str = "error.log";

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.log_dir.as_deref())?;
    announce_banner();

    let start_time = Instant::now();
    log::info!("run started at {} UTC", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    let mut config = build_config(&args)?;
    stamp_simc_hash(&mut config);
    // frozen from here on
    let config = Arc::new(config);

    let report = dispatch(&config)?;
    print_summary(&report);
    log::info!("run took {:.1?}", start_time.elapsed());

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Appends every console line to `log.txt`, and error lines to `error.log` too.
struct LogFiles {
    all: Mutex<File>,
    errors: Mutex<File>,
}

impl LogFiles {
    fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        let append = |name: &str| {
            let path = dir.join(name);
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))
        };
        Ok(Self {
            all: Mutex::new(append(LOG_FILE)?),
            errors: Mutex::new(append(ERROR_LOG_FILE)?),
        })
    }

    fn record(&self, level: log::Level, line: &str) {
        // write failures are dropped
        if let Ok(mut file) = self.all.lock() {
            let _ = writeln!(file, "{line}");
        }
        if level == log::Level::Error
            && let Ok(mut file) = self.errors.lock()
        {
            let _ = writeln!(file, "{line}");
        }
    }
}

fn init_logging(debug: bool, log_dir: Option<&Path>) -> Result<()> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let files = log_dir.map(LogFiles::open).transpose()?;

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(move |buf, record| {
            let line = format!(
                "{} - {} - [{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                std::thread::current().name().unwrap_or("main"),
                record.args()
            );
            if let Some(files) = &files {
                files.record(record.level(), &line);
            }
            writeln!(buf, "{line}")
        })
        .init();
    Ok(())
}

fn announce_banner() {
    println!("{}", "⚔️  SimPrep Runner".bright_cyan().bold());
    println!("{}", "==================".cyan());
}

/// Settings file (or defaults), then command-line overrides.
fn build_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.settings {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    apply_overrides(&mut config, args)?;
    // unknown specs abort before anything is launched
    config.resolved_specs()?;
    Ok(config)
}

fn apply_overrides(config: &mut RunConfig, args: &Args) -> Result<()> {
    if let Some(selector) = &args.single_sim {
        log::debug!("-s / --single-sim detected");
        let single = SingleSim::parse(selector).context("invalid --single-sim")?;
        single.apply(config, args.target_error.as_deref());
    }

    if let Some(executable) = &args.executable {
        config.executable.clone_from(executable);
        log::debug!("set executable to {}", config.executable.display());
    }
    if let Some(threads) = args.threads {
        config.threads = Some(threads);
        log::debug!("set threads to {threads}");
    }
    if let Some(threads) = args.profileset_work_threads {
        config.profileset_work_threads = Some(threads);
        log::debug!("set profileset_work_threads to {threads}");
    }
    if args.ptr {
        config.ptr = true;
    }
    if args.custom_profile {
        config.custom_profile = true;
    }
    if args.custom_apl {
        config.custom_apl = true;
        config.default_actions = false;
    }
    if args.custom_fight_style {
        config.custom_fight_style = true;
    }
    if let Some(target_error) = &args.target_error {
        config.override_target_error(target_error);
    }
    if args.raidbots {
        config.use_raidbots = true;
    }
    if let Some(output_dir) = &args.output_dir {
        config.output_dir.clone_from(output_dir);
    }
    if let Some(own_threading) = args.own_threading {
        config.use_own_threading = own_threading;
    }

    if config.use_raidbots && config.raidbots_apikey.is_empty() {
        bail!("remote simulations need raidbots_apikey in the settings file");
    }
    Ok(())
}

fn stamp_simc_hash(config: &mut RunConfig) {
    match resolve_simc_hash(&config.executable, &config.simc_branch) {
        Ok(hash) => config.simc_hash = hash,
        Err(err) => log::warn!("continuing without a SimulationCraft build hash: {err}"),
    }
}

fn dispatch(config: &Arc<RunConfig>) -> Result<DispatchReport> {
    let simulator: Arc<dyn Simulator> = if config.use_raidbots {
        Arc::new(RemoteSimulator::new(config.raidbots_apikey.clone())?)
    } else {
        Arc::new(SimcExecutable::new(
            config.executable.clone(),
            config.output_dir.join("inputs"),
        ))
    };
    let game_data: Arc<dyn GameData> = Arc::new(
        JsonGameData::load(&config.game_data_dir).with_context(|| {
            format!("failed to load game data from {}", config.game_data_dir.display())
        })?,
    );
    let writer = ResultWriter::new(config.output_dir.clone());
    log::info!("results go to {}", writer.root().display());

    let routines = default_routines(&simulator, &game_data, &writer);
    Ok(Dispatcher::new(Arc::clone(config), routines).run())
}

fn print_summary(report: &DispatchReport) {
    for (category, outcome) in &report.outcomes {
        let line = format!("{category}: {outcome:?}");
        if outcome.is_success() {
            println!("  {}", line.green());
        } else {
            println!("  {}", line.red());
        }
    }
}
