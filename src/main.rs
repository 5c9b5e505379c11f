//! gitsync-rs: mirror a local directory into a GitHub repository.
//!
//! Uses the repository's contents API as a plain object store. Files above
//! the direct-upload limit are stored as `<name>.parts/` sets of base64 text
//! parts and reassembled byte-exact on the way back. A SQLite cache of
//! `(mtime, size, hash)` keeps repeat passes from touching unchanged files.

#![warn(clippy::all)]

mod cli;
mod config;
mod engine;
mod hasher;
mod parts;
mod progress;
mod reconstruct;
mod remote;
pub mod retry;
mod shutdown;
mod state;
mod sync;
mod systemd;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use fs4::fs_std::FileExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use engine::{Engine, Predicate};
use progress::{create_progress_bar, format_duration, spawn_renderer, Events};
use reconstruct::ReconstructOptions;
use remote::GitHubStore;
use state::{MetadataCache, SqliteStateDb};
use systemd::SystemdNotifier;
use types::Mode;

/// Take the per-repository lock so two instances never sync the same cache.
async fn acquire_lock(db_path: &Path) -> anyhow::Result<std::fs::File> {
    let lock_path = db_path.with_extension("lock");
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another gitsync-rs instance is using this repository (lock: {})",
                lock_path.display()
            )
        })?;
        Ok::<std::fs::File, anyhow::Error>(file)
    })
    .await?
}

/// Run the status command.
async fn run_status(args: cli::StateArgs) -> anyhow::Result<()> {
    let db_path = args.db_path()?;

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Run a sync first to create the database.");
        return Ok(());
    }

    let db = SqliteStateDb::open(&db_path).await?;
    let summary = db.summary().await?;

    println!("State Database: {}", db_path.display());
    println!();
    println!("Cached files: {}", summary.cached_files);
    println!("Recorded runs: {}", summary.total_runs);

    if let Some(kind) = summary.last_run_kind {
        println!();
        println!("Last run: {}", kind.as_str());
    }
    if let Some(started) = &summary.last_run_started {
        println!("  started:   {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    match &summary.last_run_completed {
        Some(completed) => {
            println!("  completed: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"))
        }
        None if summary.last_run_started.is_some() => println!("  completed: (did not finish)"),
        None => {}
    }
    if let Some(stats) = &summary.last_run_stats {
        println!(
            "  {} processed, {} transferred, {} unchanged, {} failed{}",
            stats.processed,
            stats.transferred,
            stats.unchanged,
            stats.failed,
            if stats.interrupted { " (interrupted)" } else { "" }
        );
    }

    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let db_path = args.state.db_path()?;

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        return Ok(());
    }
    let _lock = acquire_lock(&db_path).await?;

    if !args.yes {
        println!("This will delete the metadata cache at:");
        println!("  {}", db_path.display());
        println!("The next sync will re-hash and re-verify every file.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    std::fs::remove_file(&db_path)?;
    println!("State database deleted.");

    // Also remove WAL and SHM files if they exist
    let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
    let _ = std::fs::remove_file(db_path.with_extension("db-shm"));

    Ok(())
}

/// Counts from one pass, whichever engine operation ran it.
#[derive(Debug, Default)]
struct PassReport {
    transferred: u64,
    unchanged: u64,
    failed: u64,
    interrupted: bool,
}

async fn run_pass(
    engine: &Engine,
    config: &Config,
    predicate: &Predicate,
    cancel: &CancellationToken,
    events: &Events,
) -> anyhow::Result<PassReport> {
    let report = match config.mode {
        Mode::Sync => {
            let s = engine
                .sync(&config.directory, predicate, cancel, events)
                .await?;
            tracing::info!("── Summary ──");
            tracing::info!(
                "  {} uploaded, {} unchanged, {} failed, {} processed",
                s.uploaded,
                s.unchanged,
                s.failed,
                s.processed
            );
            PassReport {
                transferred: s.uploaded,
                unchanged: s.unchanged,
                failed: s.failed,
                interrupted: s.interrupted,
            }
        }
        Mode::Reconstruct | Mode::Pull => {
            let options = ReconstructOptions {
                download_plain: config.mode == Mode::Pull,
            };
            let s = engine
                .reconstruct(&config.directory, &options, cancel, events)
                .await?;
            tracing::info!("── Summary ──");
            if options.download_plain {
                tracing::info!(
                    "  {} reconstructed, {} downloaded, {} skipped, {} failed",
                    s.reconstructed,
                    s.downloaded,
                    s.skipped,
                    s.failed
                );
            } else {
                tracing::info!(
                    "  {} reconstructed, {} skipped, {} failed",
                    s.reconstructed,
                    s.skipped,
                    s.failed
                );
            }
            PassReport {
                transferred: s.reconstructed + s.downloaded,
                unchanged: s.skipped,
                failed: s.failed,
                interrupted: s.interrupted,
            }
        }
        Mode::Structure => {
            let created = match engine.mirror_structure(&config.directory, cancel).await {
                Ok(n) => n,
                Err(sync::error::SyncError::Cancelled) => {
                    return Ok(PassReport {
                        interrupted: true,
                        ..PassReport::default()
                    })
                }
                Err(e) => return Err(e.into()),
            };
            tracing::info!("── Summary ──");
            tracing::info!("  {} directories created", created);
            PassReport {
                transferred: created,
                ..PassReport::default()
            }
        }
    };
    Ok(report)
}

async fn run_transfer(config: Config) -> anyhow::Result<()> {
    tracing::debug!(?config, "Configuration");

    tokio::fs::create_dir_all(&config.state_directory)
        .await
        .with_context(|| {
            format!(
                "Failed to create state directory: {}",
                config.state_directory.display()
            )
        })?;
    let db_path = config.db_path();
    let _lock = acquire_lock(&db_path).await?;
    let cache = Arc::new(SqliteStateDb::open(&db_path).await?);
    match cache.count().await {
        Ok(n) => tracing::debug!(
            "State database {} holds {} cached files",
            cache.path().display(),
            n
        ),
        Err(e) => tracing::warn!(error = %e, "Could not count cached files"),
    }

    let store = Arc::new(GitHubStore::new(&config.github)?);
    let engine = Engine::new(store, cache, config.engine.clone())?;
    let predicate = config::build_predicate(&config.include, &config.exclude)?;

    tracing::info!(
        mode = config.mode.as_str(),
        repo = %format!("{}/{}", config.github.owner, config.github.repo),
        directory = %config.directory.display(),
        concurrency = config.engine.concurrency,
        "Starting gitsync-rs"
    );

    let cancel = CancellationToken::new();
    shutdown::install_signal_handler(cancel.clone());
    let notifier = SystemdNotifier::new(config.notify_systemd);
    notifier.ready();

    let mut last_failed = 0;
    loop {
        let (events, rx) = Events::channel();
        let renderer = spawn_renderer(rx, create_progress_bar(config.no_progress_bar));
        let started = Instant::now();

        let result = run_pass(&engine, &config, predicate.as_ref(), &cancel, &events).await;
        drop(events);
        let _ = renderer.await;

        match result {
            Ok(report) => {
                tracing::info!("  elapsed: {}", format_duration(started.elapsed()));
                if report.interrupted {
                    tracing::info!("  interrupted before all files were processed");
                }
                notifier.status(&systemd::pass_status(
                    config.mode.as_str(),
                    report.transferred,
                    report.unchanged,
                    report.failed,
                ));
                last_failed = report.failed;
            }
            Err(e) if config.watch_with_interval.is_some() && !cancel.is_cancelled() => {
                tracing::error!("Pass failed: {:#}", e);
                notifier.status(&format!("Last {} failed: {}", config.mode.as_str(), e));
            }
            Err(e) => {
                notifier.stopping();
                return Err(e);
            }
        }
        notifier.watchdog();

        if cancel.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }
        let Some(interval) = config.watch_with_interval else {
            break;
        };
        tracing::info!("Waiting {} seconds...", interval);
        if !shutdown::sleep_or_cancel(Duration::from_secs(interval), &cancel).await {
            tracing::info!("Shutdown during wait, exiting...");
            break;
        }
    }

    notifier.stopping();
    if last_failed > 0 {
        anyhow::bail!("{} files failed in the last pass", last_failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
        command => run_transfer(Config::from_cli(command, cli.no_progress_bar)?).await,
    }
}
