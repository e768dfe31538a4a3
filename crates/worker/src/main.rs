//! Gallery indexer binary.
//!
//! ```text
//! gallery-worker                      full sync of every configured root
//! gallery-worker folder <path> [--flat]
//! gallery-worker rescan [--older-than-hours <n>]
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gallery_core::GalleryConfig;
use gallery_events::ConsoleProgress;
use gallery_pipeline::{RescanMode, SyncEngine, SyncReport};

enum Command {
    Full,
    Folder { path: PathBuf, recursive: bool },
    Rescan(RescanMode),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    match args.next().as_deref() {
        None | Some("sync") => Ok(Command::Full),
        Some("folder") => {
            let path = args.next().context("folder requires a path")?;
            let recursive = !matches!(args.next().as_deref(), Some("--flat"));
            Ok(Command::Folder {
                path: PathBuf::from(path),
                recursive,
            })
        }
        Some("rescan") => match args.next().as_deref() {
            None => Ok(Command::Rescan(RescanMode::All)),
            Some("--older-than-hours") => {
                let hours: u64 = args
                    .next()
                    .context("--older-than-hours requires a value")?
                    .parse()
                    .context("--older-than-hours must be a whole number")?;
                Ok(Command::Rescan(RescanMode::OlderThan(Duration::from_secs(
                    hours * 3600,
                ))))
            }
            Some(other) => bail!("unknown rescan option '{other}'"),
        },
        Some(other) => bail!("unknown command '{other}'"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gallery_worker=info,gallery_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let command = parse_args(std::env::args().skip(1))?;

    // --- Configuration ---
    let config = GalleryConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        roots = config.roots.len(),
        extra_roots = config.extra_roots.len(),
        workers = config.workers,
        batch_size = config.batch_size,
        "Loaded gallery configuration",
    );

    // --- Database ---
    let pool = gallery_db::create_pool(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database_url))?;
    gallery_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    let added = gallery_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!(added_columns = added.len(), "Database schema up to date");

    // --- Sync ---
    let progress = if std::io::stderr().is_terminal() {
        ConsoleProgress::new()
    } else {
        ConsoleProgress::hidden()
    };
    let engine = SyncEngine::new(pool.clone(), config);

    let report = match command {
        Command::Full => engine.full_sync(&progress).await,
        Command::Folder { path, recursive } => {
            engine.sync_folder(&path, recursive, &progress).await
        }
        Command::Rescan(mode) => engine.rescan(mode, &progress).await,
    }
    .context("Sync failed")?;

    log_report(&report);
    pool.close().await;
    Ok(())
}

fn log_report(report: &SyncReport) {
    for root in &report.offline_roots {
        tracing::warn!(root = %root, "Root was offline; its files were kept");
    }
    if report.failed > 0 {
        tracing::warn!(failed = report.failed, "Some files failed and will be retried next pass");
    }
    tracing::info!(
        scanned = report.scanned,
        new = report.new,
        modified = report.modified,
        unchanged = report.unchanged,
        deleted = report.deleted,
        "Done",
    );
}
