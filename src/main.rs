//! cloud-copy - Main entry point
//!
//! Copies the cloud-drive songs of one NetEase Cloud Music account into
//! another by content hash, without re-uploading audio. Progress is kept on
//! disk so an interrupted run resumes where it stopped.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_desktop::ReqwestHttpClient;
use bridge_traits::{AccountRole, LogLevel, SystemClock};
use clap::{Args, Parser, Subcommand};
use core_runtime::config::{
    AppConfig, CookieConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILE,
    DEFAULT_PROGRESS_PATH,
};
use core_runtime::events::{CopyEvent, EventBus, EventSeverity, RecvError};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_sync::{
    CopyConfig, CopyCoordinator, ProgressCounters, ProgressStore, RetryPolicy, RunOutcome,
};
use provider_netease::NeteaseCloudConnector;
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments for cloud-copy
#[derive(Parser, Debug)]
#[command(name = "cloud-copy")]
#[command(about = "Copy cloud-drive songs between NetEase Cloud Music accounts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy every song the target account is missing
    Copy(CopyArgs),
    /// Print the counters recorded in the progress file
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct CopyArgs {
    /// Cookie file holding the source and target credentials
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Progress file
    #[arg(short = 'p', long = "progress", default_value = DEFAULT_PROGRESS_PATH)]
    progress: PathBuf,

    /// Songs processed between checkpoints
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Console log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: LogLevel,

    /// Debug-level log file
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Do not write a log file
    #[arg(long, conflicts_with = "log_file")]
    no_log_file: bool,

    /// Console log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Progress file
    #[arg(short = 'p', long = "progress", default_value = DEFAULT_PROGRESS_PATH)]
    progress: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Copy(args) => copy(args).await,
        Command::Status(args) => status(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn app_config(args: &CopyArgs) -> Result<AppConfig> {
    let mut builder = AppConfig::builder()
        .config_path(&args.config)
        .progress_path(&args.progress)
        .batch_size(args.batch_size)
        .log_level(args.log_level)
        .log_file((!args.no_log_file).then(|| args.log_file.clone()));

    if let Some(format) = args.log_format {
        builder = builder.log_format(format);
    }

    builder.build().context("Invalid options")
}

async fn copy(args: CopyArgs) -> Result<()> {
    let config = app_config(&args)?;

    let mut logging = LoggingConfig::default()
        .with_level(config.log_level)
        .with_format(config.log_format);
    if let Some(path) = &config.log_file {
        logging = logging.with_log_file(path);
    }
    init_logging(logging).context("Failed to initialize logging")?;

    let cookies = CookieConfig::load(&config.config_path)
        .context("Failed to load account cookies")?;
    let source = cookies.session(AccountRole::Source);
    let target = cookies.session(AccountRole::Target);
    info!(
        source = source.label(),
        target = target.label(),
        "Loaded account cookies"
    );

    let http_client = Arc::new(
        ReqwestHttpClient::with_timeout(config.request_timeout)
            .context("Failed to build HTTP client")?,
    );
    let service = Arc::new(NeteaseCloudConnector::new(
        http_client,
        config.requests_per_second,
        config.request_timeout,
    ));

    let mut store = ProgressStore::load(&config.progress_path, Arc::new(SystemClock))
        .context("Failed to load progress file")?;

    let copy_config = CopyConfig {
        batch_size: config.batch_size,
        retry: RetryPolicy::new(
            config.retry_attempts,
            config.retry_base_delay,
            config.retry_max_delay,
        ),
    };

    let event_bus = EventBus::default();
    let printer = tokio::spawn(print_events(event_bus.subscribe()));

    let coordinator =
        CopyCoordinator::new(service, source, target, copy_config).with_event_bus(event_bus);

    let token = coordinator.cancellation_token();
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    let result = coordinator.run(&mut store).await;

    // Dropping the last sender ends the printer
    drop(coordinator);
    signals.abort();
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer stopped unexpectedly");
    }

    let report = match result {
        Ok(report) => report,
        Err(e) if e.is_auth() => {
            return Err(e).context(format!(
                "Progress saved to {}; update the cookie in {} and run again",
                config.progress_path.display(),
                config.config_path.display()
            ));
        }
        Err(e) => return Err(e).context("Copy run aborted"),
    };

    println!();
    match report.outcome {
        RunOutcome::Completed => println!("Copy completed ({} songs this run)", report.processed),
        RunOutcome::Cancelled => println!(
            "Copy cancelled after {} songs; progress saved to {}",
            report.processed,
            config.progress_path.display()
        ),
    }
    print_counters(&report.summary);

    Ok(())
}

fn status(args: StatusArgs) -> Result<()> {
    let store = ProgressStore::inspect(&args.progress, Arc::new(SystemClock))
        .context("Failed to read progress file")?;

    let Some(store) = store else {
        println!("no progress recorded yet");
        return Ok(());
    };

    println!("Progress file: {}", store.path().display());
    if let Some(name) = store.source_account() {
        println!("Source account:       {}", name);
    }
    if let Some(name) = store.target_account() {
        println!("Target account:       {}", name);
    }
    if let Some(updated) = store.last_updated() {
        println!("Last updated:         {}", updated.to_rfc3339());
    }
    print_counters(&store.summary());

    Ok(())
}

fn print_counters(summary: &ProgressCounters) {
    println!("Songs in source:      {}", summary.total_source);
    println!("Already in target:    {}", summary.already_in_target);
    println!("Copied:               {}", summary.copied);
    println!("Skipped (needs upload): {}", summary.skipped);
    println!("Failed:               {}", summary.failed);
    println!("Remaining:            {}", summary.remaining);
}

async fn print_events(mut events: core_runtime::events::Receiver<CopyEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress display fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Warnings and errors go to stderr so they survive `> progress.txt`
fn print_event(event: &CopyEvent) {
    let Some(line) = event_line(event) else {
        return;
    };
    if event.severity() >= EventSeverity::Warning {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
    }
}

fn event_line(event: &CopyEvent) -> Option<String> {
    match event {
        CopyEvent::Started {
            total_source,
            already_in_target,
            to_process,
            ..
        } => Some(format!(
            "{} songs in source, {} already in target, {} to copy",
            total_source, already_in_target, to_process
        )),
        CopyEvent::SongFinished {
            index,
            total,
            title,
            artist,
            status,
            error,
            ..
        } => Some(match error {
            Some(error) => format!("[{}/{}] {} - {}: {} ({})", index, total, title, artist, status, error),
            None => format!("[{}/{}] {} - {}: {}", index, total, title, artist, status),
        }),
        _ => None,
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current song");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping after the current song");
        },
    }
}
