//! Tracking which profiles need credential material on disk.
//!
//! # Responsibilities
//! - Track every non-excluded SSL profile of the desired configuration
//! - Keep each tracked profile directory in step with its credential
//! - Remove directories of profiles that are no longer wanted
//!
//! # Design Decisions
//! - A missing credential is reported, not fatal: it usually appears later
//! - Tracking is rebuilt from the cached configuration on startup so stale
//!   directories are still cleaned up after a restart

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::credentials::store::CredentialStore;
use crate::credentials::target::SyncTarget;
use crate::credentials::{CredentialError, CredentialResult};
use crate::router::{RouterConfig, SslProfile};

/// Outcome of a synchronisation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDelta {
    /// Profiles whose credential does not exist yet.
    pub missing: Vec<String>,
    /// Profiles that failed to synchronise, with the reason.
    pub errors: Vec<String>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    pub fn error(&self) -> Option<CredentialError> {
        if self.is_empty() {
            None
        } else {
            Some(CredentialError::NotSynchronized(self.to_string()))
        }
    }

    fn merge(&mut self, other: SyncDelta) {
        self.missing.extend(other.missing);
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for SyncDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing {}", self.missing.join(", ")));
        }
        if !self.errors.is_empty() {
            parts.push(format!("errors {}", self.errors.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Keeps credential directories in step with the desired SSL profiles.
pub struct CredentialSync {
    store: Arc<dyn CredentialStore>,
    base: PathBuf,
    excluded: BTreeSet<String>,
    targets: BTreeMap<String, SyncTarget>,
}

impl CredentialSync {
    pub fn new(store: Arc<dyn CredentialStore>, base: impl Into<PathBuf>, excluded: &[String]) -> Self {
        Self {
            store,
            base: base.into(),
            excluded: excluded.iter().cloned().collect(),
            targets: BTreeMap::new(),
        }
    }

    pub fn tracked(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    fn track(&mut self, profile: &SslProfile) -> CredentialResult<()> {
        match self.targets.get_mut(&profile.name) {
            Some(target) => target.set_ca_only(profile.is_ca_only()),
            None => {
                let target = SyncTarget::new(profile, &self.base)?;
                tracing::debug!(profile = %profile.name, "Tracking SSL profile");
                self.targets.insert(profile.name.clone(), target);
            }
        }
        Ok(())
    }

    /// Re-derive tracking from a previously applied configuration.
    pub fn recover(&mut self, config: &RouterConfig) {
        for profile in config.ssl_profiles.values() {
            if self.excluded.contains(&profile.name) {
                continue;
            }
            if let Err(e) = self.track(profile) {
                tracing::warn!(profile = %profile.name, error = %e, "Not tracking SSL profile");
            }
        }
        tracing::info!(profiles = ?self.tracked(), "Recovered credential tracking");
    }

    /// Track exactly `profiles` and synchronise all of them.
    pub fn expect(&mut self, profiles: &BTreeMap<String, SslProfile>) -> SyncDelta {
        let mut delta = SyncDelta::default();

        let wanted: BTreeSet<&String> = profiles
            .keys()
            .filter(|name| !self.excluded.contains(*name))
            .collect();
        let dropped: Vec<String> = self
            .targets
            .keys()
            .filter(|name| !wanted.contains(name))
            .cloned()
            .collect();
        for name in dropped {
            if let Some(target) = self.targets.remove(&name) {
                if let Err(e) = target.remove() {
                    delta.errors.push(format!("{}: {}", name, e));
                }
            }
        }

        for profile in profiles.values() {
            if self.excluded.contains(&profile.name) {
                continue;
            }
            if let Err(e) = self.track(profile) {
                delta.errors.push(e.to_string());
            }
        }
        let names: Vec<String> = self.targets.keys().cloned().collect();
        for name in names {
            delta.merge(self.sync_target(&name));
        }
        delta
    }

    /// Resynchronise every profile backed by `credential`.
    pub fn credential_changed(&mut self, credential: &str) -> SyncDelta {
        let names: Vec<String> = self
            .targets
            .values()
            .filter(|t| t.credential_name() == credential)
            .map(|t| t.profile().to_string())
            .collect();
        let mut delta = SyncDelta::default();
        for name in names {
            delta.merge(self.sync_target(&name));
        }
        delta
    }

    fn sync_target(&mut self, name: &str) -> SyncDelta {
        let mut delta = SyncDelta::default();
        let target = match self.targets.get_mut(name) {
            Some(target) => target,
            None => return delta,
        };
        match self.store.get(target.credential_name()) {
            Ok(Some(credential)) => {
                if let Err(e) = target.sync(&credential) {
                    delta.errors.push(format!("{}: {}", name, e));
                }
            }
            Ok(None) => delta.missing.push(name.to_string()),
            Err(e) => delta.errors.push(format!("{}: {}", name, e)),
        }
        delta
    }
}
