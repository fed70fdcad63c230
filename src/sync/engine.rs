//! The reconciliation loop.
//!
//! # Responsibilities
//! - Read the desired configuration and keep credentials on disk for it
//! - Converge the live router's SSL profiles, bridges, connectors and
//!   owned listeners onto the desired configuration
//! - Retry failed cycles with increasing delays
//!
//! # Data Flow
//! ```text
//! SyncEvent ──► reconcile()
//!                 ├─ decode desired state
//!                 ├─ credentials (abort cycle on failure)
//!                 ├─ create missing SSL profiles
//!                 ├─ bridges ─┐
//!                 ├─ connectors ├─ each with its own pooled agent
//!                 ├─ listeners ─┘
//!                 └─ delete unreferenced SSL profiles
//! ```
//!
//! # Design Decisions
//! - Every step diffs against a fresh snapshot of the live router
//! - Failed steps are not rolled back; a later cycle converges
//! - Profiles are deleted last, once nothing can reference them

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::config::SyncSettings;
use crate::credentials::{CredentialError, CredentialSync};
use crate::management::{AgentPool, ManagementError, PooledAgent};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::router::{
    is_not_protected_listener, ConnectorDifference, Listener, ListenerDifference, ModelError, Role,
    RouterConfig, SslProfileDifference,
};
use crate::sync::source::{read_router_config, DesiredStateSource, SourceError};
use crate::sync::watcher::SyncEvent;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: ManagementError,
    },

    #[error("{}", join_errors(.0))]
    Steps(Vec<SyncError>),
}

fn join_errors(errors: &[SyncError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type SyncResult<T> = Result<T, SyncError>;

fn step(step: &'static str) -> impl FnOnce(ManagementError) -> SyncError {
    move |source| SyncError::Step { step, source }
}

/// Settings for one reconciliation loop.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub config_key: String,
    pub ignore_connector_prefix: String,
    pub excluded_profiles: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            config_key: settings.source.config_key.clone(),
            ignore_connector_prefix: settings.reconcile.ignore_connector_prefix.clone(),
            excluded_profiles: settings.credentials.excluded_profiles.clone(),
            retry: RetryPolicy {
                fast_retries: settings.reconcile.fast_retries,
                base_ms: settings.reconcile.backoff_base_ms,
                max_ms: settings.reconcile.backoff_max_ms,
                max_delay_mins: settings.reconcile.max_delay_mins,
            },
        }
    }
}

/// Listeners this loop creates, replaces and deletes.
pub fn owns_listener(listener: &Listener) -> bool {
    listener.role == Role::Normal && is_not_protected_listener(listener)
}

/// Keeps one router converged on the desired configuration.
pub struct ConfigSync {
    pool: Arc<AgentPool>,
    source: Arc<dyn DesiredStateSource>,
    credentials: CredentialSync,
    options: SyncOptions,
    desired: ArcSwapOption<RouterConfig>,
}

impl ConfigSync {
    pub fn new(
        pool: Arc<AgentPool>,
        source: Arc<dyn DesiredStateSource>,
        credentials: CredentialSync,
        options: SyncOptions,
    ) -> Self {
        Self {
            pool,
            source,
            credentials,
            options,
            desired: ArcSwapOption::empty(),
        }
    }

    /// Desired configuration seen by the last cycle.
    pub fn desired(&self) -> Option<Arc<RouterConfig>> {
        self.desired.load_full()
    }

    pub fn credentials(&self) -> &CredentialSync {
        &self.credentials
    }

    fn read_desired(&self) -> SyncResult<Option<RouterConfig>> {
        Ok(read_router_config(self.source.as_ref(), &self.options.config_key)?)
    }

    /// Rebuild credential tracking from the stored desired configuration.
    pub fn recover(&mut self) -> SyncResult<()> {
        if let Some(config) = self.read_desired()? {
            self.credentials.recover(&config);
            self.desired.store(Some(Arc::new(config)));
        }
        Ok(())
    }

    async fn agent(&self, name: &'static str) -> SyncResult<PooledAgent> {
        self.pool.acquire().await.map_err(step(name))
    }

    /// Run one full cycle. Returns false when there is no desired state.
    pub async fn reconcile(&mut self) -> SyncResult<bool> {
        let config = match self.read_desired()? {
            Some(config) => config,
            None => {
                tracing::info!(key = %self.options.config_key, "No desired router configuration yet");
                return Ok(false);
            }
        };
        self.desired.store(Some(Arc::new(config.clone())));

        if let Some(e) = self.credentials.expect(&config.ssl_profiles).error() {
            return Err(e.into());
        }

        let mut failures = Vec::new();
        match self.create_ssl_profiles(&config).await {
            Ok(()) => {
                let results = [
                    self.sync_bridges(&config).await,
                    self.sync_connectors(&config).await,
                    self.sync_listeners(&config).await,
                ];
                failures.extend(results.into_iter().filter_map(Result::err));
                if failures.is_empty() {
                    if let Err(e) = self.delete_unreferenced_ssl_profiles(&config).await {
                        failures.push(e);
                    }
                }
            }
            Err(e) => failures.push(e),
        }

        for failure in &failures {
            tracing::warn!(error = %failure, "Reconciliation step failed");
        }
        match failures.len() {
            0 => Ok(true),
            1 => Err(failures.remove(0)),
            _ => Err(SyncError::Steps(failures)),
        }
    }

    async fn create_ssl_profiles(&self, config: &RouterConfig) -> SyncResult<()> {
        const STEP: &str = "Error creating SSL profiles";
        let mut agent = self.agent(STEP).await?;
        let live = agent.get_local_ssl_profiles().await.map_err(step(STEP))?;
        let changes = SslProfileDifference::compute(&live, config, &self.options.excluded_profiles);
        for profile in &changes.added {
            agent.add_ssl_profile(profile).await.map_err(step(STEP))?;
        }
        Ok(())
    }

    async fn sync_bridges(&self, config: &RouterConfig) -> SyncResult<()> {
        const STEP: &str = "Error syncing bridges";
        let mut agent = self.agent(STEP).await?;
        let live = agent.get_local_bridge_config().await.map_err(step(STEP))?;
        let changes = live.difference(&config.bridges);
        if changes.is_empty() {
            return Ok(());
        }
        changes.log();
        agent.update_local_bridge_config(&changes).await.map_err(step(STEP))
    }

    async fn sync_connectors(&self, config: &RouterConfig) -> SyncResult<()> {
        const STEP: &str = "Error syncing connectors";
        let mut agent = self.agent(STEP).await?;
        let live = agent.get_local_connectors().await.map_err(step(STEP))?;
        let prefix = Some(self.options.ignore_connector_prefix.as_str());
        let changes = ConnectorDifference::compute(&live, config, prefix);
        if changes.is_empty() {
            return Ok(());
        }
        for profile in changes.added_ssl_profiles.values() {
            agent.create_ssl_profile(profile).await.map_err(step(STEP))?;
        }
        tracing::info!(
            added = ?changes.added.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            deleted = ?changes.deleted.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Connectors differ"
        );
        agent.update_connector_config(&changes).await.map_err(step(STEP))
    }

    async fn sync_listeners(&self, config: &RouterConfig) -> SyncResult<()> {
        const STEP: &str = "Error syncing listeners";
        let mut agent = self.agent(STEP).await?;
        let live = agent.get_local_listeners().await.map_err(step(STEP))?;
        let live = crate::router::filter_listeners(&live, owns_listener);
        let desired = config.matching_listeners(owns_listener);
        let changes = ListenerDifference::compute(&live, &desired);
        if changes.is_empty() {
            return Ok(());
        }
        tracing::info!(
            added = ?changes.added.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            deleted = ?changes.deleted.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            "Listeners differ"
        );
        agent.update_listener_config(&changes).await.map_err(step(STEP))
    }

    /// Remove live profiles nothing refers to any more.
    ///
    /// Profiles still used by live connectors or listeners this loop does
    /// not own are kept.
    async fn delete_unreferenced_ssl_profiles(&self, config: &RouterConfig) -> SyncResult<()> {
        const STEP: &str = "Error deleting SSL profiles";
        let mut agent = self.agent(STEP).await?;
        let live = agent.get_local_ssl_profiles().await.map_err(step(STEP))?;
        let changes = SslProfileDifference::compute(&live, config, &self.options.excluded_profiles);
        if changes.deleted.is_empty() {
            return Ok(());
        }

        let mut in_use: BTreeSet<String> = agent
            .get_local_connectors()
            .await
            .map_err(step(STEP))?
            .into_values()
            .map(|c| c.ssl_profile)
            .collect();
        in_use.extend(
            agent
                .get_local_listeners()
                .await
                .map_err(step(STEP))?
                .into_values()
                .map(|l| l.ssl_profile),
        );
        in_use.extend(
            agent
                .get_local_bridge_config()
                .await
                .map_err(step(STEP))?
                .referenced_ssl_profiles(),
        );

        for name in changes.deleted.iter().filter(|n| !in_use.contains(*n)) {
            agent.delete_ssl_profile(name).await.map_err(step(STEP))?;
        }
        Ok(())
    }

    /// Resynchronise the profiles backed by a changed credential.
    pub fn credential_changed(&mut self, credential: &str) -> SyncResult<()> {
        match self.credentials.credential_changed(credential).error() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn cycle(&mut self) -> bool {
        let started = Instant::now();
        let result = self.reconcile().await;
        let elapsed = started.elapsed();
        match result {
            Ok(applied) => {
                metrics::record_cycle("success", elapsed);
                tracing::debug!(applied, elapsed = ?elapsed, "Reconciliation complete");
                true
            }
            Err(e) => {
                metrics::record_cycle("failure", elapsed);
                tracing::error!(error = %e, "Reconciliation failed");
                false
            }
        }
    }

    /// Process events until shutdown.
    ///
    /// A cycle runs at startup, on every desired-state change, when a
    /// credential changes while a retry is pending, and when a retry timer
    /// fires.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SyncEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        if let Err(e) = self.recover() {
            tracing::warn!(error = %e, "Could not recover credential tracking");
        }

        let mut attempts: u32 = 0;
        let mut retry_at = Some(tokio::time::Instant::now());
        loop {
            let pending = retry_at;
            let retry = async move {
                match pending {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let run_cycle = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Reconciliation loop shutting down");
                    break;
                }
                event = events.recv() => {
                    let mut batch = match event {
                        Some(event) => vec![event],
                        None => {
                            tracing::info!("Event channel closed, stopping reconciliation loop");
                            break;
                        }
                    };
                    while let Ok(event) = events.try_recv() {
                        batch.push(event);
                    }
                    self.handle_events(batch, retry_at.is_some())
                }
                _ = retry => true,
            };

            if !run_cycle {
                continue;
            }
            if self.cycle().await {
                attempts = 0;
                retry_at = None;
            } else {
                attempts = attempts.saturating_add(1);
                let delay = self.options.retry.delay(attempts);
                tracing::info!(attempt = attempts, delay = ?delay, "Scheduling reconciliation retry");
                retry_at = Some(tokio::time::Instant::now() + delay);
            }
        }
        self.pool.drain();
    }

    /// Returns whether a full cycle should run.
    fn handle_events(&mut self, events: Vec<SyncEvent>, retry_pending: bool) -> bool {
        let mut run = false;
        for event in events {
            match event {
                SyncEvent::DesiredChanged => run = true,
                SyncEvent::CredentialChanged(name) => {
                    if let Err(e) = self.credential_changed(&name) {
                        tracing::warn!(credential = %name, error = %e, "Credential sync failed");
                    }
                    run |= retry_pending;
                }
            }
        }
        run
    }
}
