//! histloader - bulk sensor archive importer
//!
//! Thin CLI over the session service: create-and-run an import session,
//! list known sessions, or restart one. The session store is loaded at
//! start and saved at exit.

use anyhow::Result;
use clap::{Parser, Subcommand};
use histloader_common::config::IngestConfig;
use histloader_ingest::models::{SessionSnapshot, SessionStatus};
use histloader_ingest::serializer::SerializerRegistry;
use histloader_ingest::services::{CreateSessionRequest, Dispatcher, SessionManager};
use histloader_ingest::store::{FileSessionStore, HttpPointStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "histloader", about = "Bulk import of sensor archives into a time-series store")]
struct Cli {
    /// Config file path (falls back to HISTLOADER_CONFIG, then the
    /// platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an import session and ingest it to completion
    Run {
        #[arg(long)]
        dataset: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Dataset root directory to walk
        #[arg(long)]
        root: PathBuf,

        /// Regex over root-relative paths with a (?P<metric>...) group
        #[arg(long)]
        pattern: String,

        /// Functional-id template, e.g. "${site}.${metric}"
        #[arg(long)]
        func_id: String,

        /// Pin a serializer variant instead of auto-detecting
        #[arg(long)]
        serializer: Option<String>,

        /// Import pipeline (defaults to the CSV pipeline)
        #[arg(long)]
        importer: Option<String>,
    },

    /// List known sessions
    List,

    /// Re-queue a session's error items and ingest again
    Restart {
        id: Uuid,

        /// Also re-queue cancelled items
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::resolve(cli.config.as_deref())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.store_url,
        "starting histloader"
    );

    let store = Arc::new(HttpPointStore::new(
        &config.store_url,
        Duration::from_millis(config.store_timeout_ms),
    )?);
    let registry = Arc::new(SerializerRegistry::with_defaults());
    let dispatcher = Dispatcher::new(store, registry, &config);
    let session_store = Arc::new(FileSessionStore::new(config.session_store_path.clone()));
    let manager = SessionManager::new(dispatcher, session_store);
    manager.load().await?;

    match cli.command {
        Command::Run {
            dataset,
            description,
            root,
            pattern,
            func_id,
            serializer,
            importer,
        } => {
            let session_id = manager
                .create(CreateSessionRequest {
                    dataset,
                    description,
                    root_path: root,
                    path_pattern: pattern,
                    func_id_pattern: func_id,
                    serializer,
                    importer,
                })
                .await?;
            let snapshot = wait_for_completion(&manager, session_id).await?;
            print_summary(&snapshot);
        }
        Command::List => {
            for snapshot in manager.list().await {
                println!(
                    "{}  {:<12} {:?}  to_import={} imported={} in_error={}",
                    snapshot.session_id,
                    snapshot.dataset,
                    snapshot.status,
                    snapshot.to_import.len(),
                    snapshot.imported.len(),
                    snapshot.in_error.len()
                );
            }
        }
        Command::Restart { id, force } => {
            let requeued = manager.restart(id, force).await?;
            println!("re-queued {} item(s)", requeued);
            let snapshot = wait_for_completion(&manager, id).await?;
            print_summary(&snapshot);
        }
    }

    manager.save().await?;
    Ok(())
}

/// Poll until the session's run finishes (or its launch was refused)
///
/// Discovery warnings land on the same error log as a launch refusal, so
/// only the refusal message ends the wait while the session is ANALYSED.
async fn wait_for_completion(
    manager: &Arc<SessionManager>,
    session_id: Uuid,
) -> Result<SessionSnapshot> {
    loop {
        let snapshot = manager.get(session_id).await?;
        match snapshot.status {
            SessionStatus::Completed => return Ok(snapshot),
            SessionStatus::Analysed
                if snapshot
                    .errors
                    .iter()
                    .any(|e| e.message.contains("ingestion not started")) =>
            {
                return Ok(snapshot)
            }
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

fn print_summary(snapshot: &SessionSnapshot) {
    println!(
        "session {} ({:?}): {} imported, {} in error, {} pending",
        snapshot.session_id,
        snapshot.status,
        snapshot.imported.len(),
        snapshot.in_error.len(),
        snapshot.to_import.len()
    );
    if let Some(run) = snapshot.stats.current_run() {
        println!(
            "last run: {} points sent ({} ok, {} failed), mean {:.0} points/s",
            run.points.sent, run.points.succeeded, run.points.failed, run.mean_rate
        );
    }
    for error in &snapshot.errors {
        println!("error [{}]: {}", error.at.to_rfc3339(), error.message);
    }
}
