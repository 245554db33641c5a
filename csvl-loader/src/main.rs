//! csvl - CSV-to-remote-resource loader
//!
//! Loads a config file, reads and validates the CSV input, maps every valid
//! row onto a resource document and upserts the documents into the remote
//! store. A stats file is written at the end of every run, including runs
//! that fail before reaching the remote service.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use csvl_common::config::{resolve_config_path, LoggingConfig, TomlConfig};
use csvl_common::events::{EventBus, LoaderEvent};
use csvl_loader::services::{
    csv_input, prepare, BatchOrchestrator, EventProgress, ExecutorSettings, HttpRemoteClient,
    ImportPipeline, ImportReport, JsonSchemaCheck, MappingTable, StatsReport,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for csvl
#[derive(Parser, Debug)]
#[command(name = "csvl")]
#[command(about = "Load CSV records into a remote resource store")]
#[command(version)]
struct Args {
    /// Config file (falls back to $CSVL_CONFIG, then the user config dir)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Resources applied concurrently (overrides batch.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Skip resources before this index (overrides batch.resume_from)
    #[arg(long)]
    resume_from: Option<usize>,

    /// Validate and map only, no remote calls
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path =
        resolve_config_path(args.config.as_deref()).context("Failed to locate config file")?;
    let mut config = TomlConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    if let Some(concurrency) = args.concurrency {
        config.batch.concurrency = concurrency;
    }
    if let Some(resume_from) = args.resume_from {
        config.batch.resume_from = resume_from;
    }

    init_logging(&config.logging)?;

    info!("Starting csvl");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(config = %config_path.display(), data = %config.input.data.display(), "Run configured");

    let event_bus = EventBus::new(256);
    let printer = spawn_progress_printer(&event_bus);

    let cancel_token = CancellationToken::new();
    spawn_interrupt_handler(cancel_token.clone());

    let result = run(&config, args.dry_run, event_bus, cancel_token).await;

    // Every sender is gone once `run` returns, so the printer drains and stops.
    if let Err(e) = printer.await {
        warn!(error = %e, "Progress printer stopped abnormally");
    }

    match result {
        Ok(report) => {
            let stats = StatsReport::from_import(&config.input.data, &report);
            stats
                .write(&config.stats_file)
                .with_context(|| format!("Failed to write {}", config.stats_file.display()))?;

            if args.dry_run {
                info!(
                    rows = report.total_rows,
                    invalid = report.invalid_rows.len(),
                    "Dry run complete, nothing was sent"
                );
            } else {
                info!(
                    success = report.ledger.success_count,
                    failed = report.ledger.failure_count,
                    invalid = report.invalid_rows.len(),
                    "Complete!"
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run aborted");
            write_fatal_stats(&config.input.data, &config.stats_file, &e);
            Err(e)
        }
    }
}

async fn run(
    config: &TomlConfig,
    dry_run: bool,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<ImportReport> {
    let input_schema =
        JsonSchemaCheck::load(&config.input.schema).context("Failed to load input schema")?;
    let output_schema =
        JsonSchemaCheck::load(&config.output.schema).context("Failed to load output schema")?;
    let mapping = MappingTable::load(&config.output.mapping, &config.output.identity_field)
        .with_context(|| format!("Failed to load mapping {}", config.output.mapping.display()))?;
    let settings = ExecutorSettings::from_config(config)?;

    let rows = csv_input::read_records(&config.input.data)
        .with_context(|| format!("Failed to read {}", config.input.data.display()))?;
    let prepared = prepare(rows, &input_schema, &mapping)?;

    if dry_run {
        return Ok(ImportReport::dry_run(prepared));
    }

    let api_key = config.resolve_api_key()?;
    let client = HttpRemoteClient::from_config(&config.remote, api_key)
        .context("Failed to build HTTP client")?;

    let progress = Arc::new(EventProgress::new(event_bus));
    info!(run_id = %progress.run_id(), "Run id assigned");

    let orchestrator =
        BatchOrchestrator::new(config.batch.concurrency, progress).with_cancel_token(cancel_token);
    let pipeline = ImportPipeline::new(
        &client,
        &settings,
        &output_schema,
        &config.output.project_name,
    );

    let report = pipeline
        .execute(prepared, &orchestrator, config.batch.resume_from)
        .await?;
    Ok(report)
}

/// Stderr/RUST_LOG console output plus an optional plain-text log file
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid logging.level")?;

    let file_layer = match &logging.file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Render progress events as a single rewritten line on stderr
fn spawn_progress_printer(event_bus: &EventBus) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe();

    tokio::spawn(async move {
        let mut line_open = false;
        loop {
            match rx.recv().await {
                Ok(event) => match &event {
                    LoaderEvent::Progress { label, processed, total } => {
                        let pct = event.percentage().unwrap_or(0);
                        let mut stderr = std::io::stderr().lock();
                        let _ = write!(stderr, "\r\x1b[2K{}: {}/{} ({}%)", label, processed, total, pct);
                        let _ = stderr.flush();
                        line_open = true;
                    }
                    LoaderEvent::RunCompleted { .. } if line_open => {
                        eprintln!();
                        line_open = false;
                    }
                    _ => {}
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        if line_open {
            eprintln!();
        }
    })
}

/// First Ctrl-C stops the run at the next chunk barrier
fn spawn_interrupt_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl+C, stopping after the current chunk");
                cancel_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
}

fn write_fatal_stats(data: &Path, stats_file: &Path, e: &anyhow::Error) {
    let stats = StatsReport::fatal(data, format!("{:#}", e));
    if let Err(write_error) = stats.write(stats_file) {
        error!(
            path = %stats_file.display(),
            error = %write_error,
            "Failed to write stats file"
        );
    }
}
