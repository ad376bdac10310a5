//! ocdump - OpenShift cluster diagnostics dump
//!
//! A CLI tool that runs `oc` many times in parallel to collect resource
//! definitions, logs and metadata from every visible project, packages the
//! result into a single archive and reports common problems found in it.
//!
//! Exit codes:
//!   0 - Dump created (individual task failures are logged, not fatal)
//!   1 - Runtime error (bad arguments, oc unusable, projects not listable)

mod analysis;
mod cli;
mod config;
mod dump;
mod errors;
mod layout;
mod models;
mod output;
mod pool;
mod report;
mod runner;
mod tasks;

use analysis::{run_analysis, AnalysisEngine, SinkFetcher};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use dump::{Dump, TIMESTAMP_FORMAT};
use errors::{ErrorList, Severity};
use indicatif::{ProgressBar, ProgressStyle};
use models::AnalysisResult;
use pool::{TaskOutcome, WorkerPool};
use runner::{DumpRunner, MetadataStore, Runner};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tasks::Enumerator;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Log target that only ever reaches the log file.
const AUDIT_TARGET: &str = "audit";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    match run_dump(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Dump failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .ocdump.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize concurrency, resources, log lines, and more.");
    Ok(())
}

/// Initialize logging: console at the requested level, everything at debug
/// level to the dump's log file. Audit messages skip the console.
fn init_logging(level: tracing::Level, log_file: &Path) -> Result<()> {
    let file = std::fs::File::create(log_file)
        .with_context(|| format!("Failed to create log file: {}", log_file.display()))?;

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(filter_fn(move |meta| {
            meta.target() != AUDIT_TARGET && *meta.level() <= level
        }));

    let logfile = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console)
        .with(logfile)
        .try_init()
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Spinner ticking once per finished task.
fn progress_spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} tasks done")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Run the complete dump workflow.
async fn run_dump(args: Args) -> Result<()> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;
    let collect = Arc::new(config.collect_config());

    tasks::check_prerequisites(&collect.oc).await?;

    let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
    let dump = Dump::create(&config.general.output_dir, &timestamp, config.general.archive)?;

    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };
    init_logging(level, &dump.log_path())?;

    info!("ocdump v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    debug!("Configuration: {:?}", config);
    info!("Starting dump into {}", dump.location().display());

    let progress = progress_spinner(args.quiet);
    let pool = WorkerPool::new(config.general.concurrency)?.with_progress(progress.clone());
    let runner: Arc<dyn Runner> = Arc::new(
        DumpRunner::new(dump.sink()).with_metadata(MetadataStore::new(dump.runs_dir())),
    );

    let result = collect_and_analyze(&config, collect, runner, &pool, &dump).await;
    progress.finish_and_clear();

    // Remove sub-second precision.
    let elapsed = Duration::from_secs(start_time.elapsed().as_secs());
    if elapsed > Duration::from_secs(1) {
        info!("Finished in {}s", elapsed.as_secs());
    }

    // Written before packaging so it lands in the archive.
    info!(target: AUDIT_TARGET, "Dumped system information to: {}", dump.location().display());
    match dump.finish() {
        Ok(archive) => info!("Dumped system information to: {}", archive.display()),
        Err(e) => error!("{:#}", e),
    }

    if let Some(analysis) = result? {
        let stdout = std::io::stdout();
        report::write_text(&mut stdout.lock(), &analysis)?;
    }

    Ok(())
}

/// Capture everything, then analyze it. Only failures that make the whole
/// run pointless are returned as errors.
async fn collect_and_analyze(
    config: &Config,
    collect: Arc<tasks::CollectConfig>,
    runner: Arc<dyn Runner>,
    pool: &WorkerPool,
    dump: &Dump,
) -> Result<Option<AnalysisResult>> {
    output::write_bytes(
        dump.sink().as_ref(),
        layout::VERSION_FILE,
        layout::version_text().as_bytes(),
    )
    .context("Failed to write version file")?;

    info!("Collecting system information...");
    let enumerator = Enumerator::new(runner, collect);
    let projects = enumerator.projects().await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let outcomes = pool.spawn(rx);
    let enumerated = enumerator.enumerate(&projects, &tx);
    drop(tx);
    let outcomes = pool::collect(outcomes).await;

    if let Err(e) = enumerated {
        warn!("Enumeration stopped early: {:#}", e);
    }
    let mut errors = report_task_errors(outcomes);

    let analysis = if config.general.analysis {
        Some(analyze(&projects, pool, dump, &mut errors).await?)
    } else {
        info!("Skipping analysis");
        None
    };

    if let Err(errors) = errors.into_result() {
        let severity = errors.severity();
        info!(
            "{} task(s) failed{}, see {} for details",
            errors.len(),
            if severity == Severity::Ignorable { ", all ignorable" } else { "" },
            layout::LOG_FILE
        );
    }

    Ok(analysis)
}

/// Run the checks over the collected definitions and store the results.
async fn analyze(
    projects: &[String],
    pool: &WorkerPool,
    dump: &Dump,
    errors: &mut ErrorList,
) -> Result<AnalysisResult> {
    info!("Analyzing data...");
    let (analysis, outcomes) = run_analysis(
        Arc::new(AnalysisEngine::default()),
        Arc::new(SinkFetcher::new(dump.sink())),
        projects,
        pool,
    )
    .await;
    *errors = std::mem::take(errors).merge(report_task_errors(outcomes));

    let json = report::generate_json_report(&analysis)?;
    output::write_bytes(dump.sink().as_ref(), layout::ANALYSIS_FILE, json.as_bytes())
        .context("Failed to write analysis results")?;

    Ok(analysis)
}

/// Log every failed task: ignorable errors go to the log file only.
fn report_task_errors(outcomes: Vec<TaskOutcome>) -> ErrorList {
    let errors: ErrorList = outcomes
        .into_iter()
        .filter_map(|outcome| outcome.result.err())
        .collect();

    for e in errors.iter() {
        match e.severity() {
            Severity::Ignorable => info!(target: AUDIT_TARGET, "Task error: {}", e),
            Severity::Fatal => warn!("Task error: {}", e),
        }
    }

    errors
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
