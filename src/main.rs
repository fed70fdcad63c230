//! Router configuration sync daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   desired.json ──(notify)──► SourceWatcher ─────┐
//!                                                  ├─► mpsc<SyncEvent> ─► ConfigSync::run
//!   credential store ─(notify)─► CredentialWatcher ┘          │
//!                                                             ├─► CredentialSync ─► cert files
//!                                                             └─► AgentPool ─► router $management
//!
//!   SIGINT/SIGTERM ─► Shutdown ─► loop exits, agents closed
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use router_sync::config::{load_config, SyncSettings};
use router_sync::credentials::{CredentialSync, DirectoryStore};
use router_sync::lifecycle::{spawn_signal_handler, Shutdown};
use router_sync::management::{AgentPools, Connect, ManagementResult, StreamConnector};
use router_sync::observability::{logging, metrics};
use router_sync::sync::{
    ConfigSync, CredentialWatcher, FileSource, SourceWatcher, SyncEvent, SyncOptions,
};

#[derive(Debug, Parser)]
#[command(name = "router-sync", version, about = "Keep a router converged on its desired configuration")]
struct Args {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let settings = match args.config.as_deref() {
        Some(path) => load_config(path)?,
        None => SyncSettings::default(),
    };

    logging::init(&settings.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "router-sync starting");

    tracing::info!(
        management_url = %settings.management.url,
        source = %settings.source.path,
        config_key = %settings.source.config_key,
        credentials = %settings.credentials.store_path,
        "Configuration loaded"
    );

    if settings.observability.metrics_enabled {
        if let Ok(addr) = settings.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let pools = AgentPools::new(
        |endpoint: &str| -> ManagementResult<Arc<dyn Connect>> {
            Ok(Arc::new(StreamConnector::new(endpoint)?))
        },
        settings.management.pool_capacity,
        Duration::from_secs(settings.management.request_timeout_secs),
    );
    let pool = pools.pool(&settings.management.url)?;

    let source = Arc::new(FileSource::new(&settings.source.path));
    let store = DirectoryStore::new(&settings.credentials.store_path);
    let credentials = CredentialSync::new(
        Arc::new(store.clone()),
        &settings.credentials.output_path,
        &settings.credentials.excluded_profiles,
    );
    let sync = ConfigSync::new(pool, source, credentials, SyncOptions::from(&settings));

    let (tx, rx) = mpsc::unbounded_channel::<SyncEvent>();
    let _source_watcher = SourceWatcher::new(Path::new(&settings.source.path), tx.clone()).run()?;
    let _credential_watcher = match CredentialWatcher::new(store, tx).run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(
                path = %settings.credentials.store_path,
                error = %e,
                "Credential store not watched, changes apply on the next cycle"
            );
            None
        }
    };

    let shutdown = Arc::new(Shutdown::new());
    let loop_shutdown = shutdown.subscribe();
    spawn_signal_handler(Arc::clone(&shutdown));

    sync.run(rx, loop_shutdown).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
