//! Filesystem watchers feeding the reconciliation loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::credentials::DirectoryStore;

/// Something the reconciliation loop should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The desired configuration may have changed.
    DesiredChanged,
    /// The named credential was created, modified or deleted.
    CredentialChanged(String),
}

fn is_relevant(event: &Event) -> bool {
    event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()
}

fn watcher_config() -> Config {
    Config::default().with_poll_interval(Duration::from_secs(2))
}

/// Watches the desired-state document.
pub struct SourceWatcher {
    path: PathBuf,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl SourceWatcher {
    pub fn new(path: &Path, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self {
            path: path.to_path_buf(),
            tx,
        }
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// The parent directory is watched so that atomic replacement of the
    /// document is seen.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.tx.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && is_relevant(&event) {
                        tracing::debug!(kind = ?event.kind, "Desired state change detected");
                        let _ = tx.send(SyncEvent::DesiredChanged);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Desired state watch error"),
            },
            watcher_config(),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Desired state watcher started");
        Ok(watcher)
    }
}

/// Watches a directory credential store.
pub struct CredentialWatcher {
    store: DirectoryStore,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl CredentialWatcher {
    pub fn new(store: DirectoryStore, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self { store, tx }
    }

    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.tx.clone();
        let store = self.store.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_relevant(&event) => {
                    let mut names: Vec<String> = event
                        .paths
                        .iter()
                        .filter_map(|p| store.credential_for_path(p))
                        .collect();
                    names.dedup();
                    for name in names {
                        tracing::debug!(credential = %name, "Credential change detected");
                        let _ = tx.send(SyncEvent::CredentialChanged(name));
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Credential watch error"),
            },
            watcher_config(),
        )?;

        watcher.watch(self.store.root(), RecursiveMode::Recursive)?;
        tracing::info!(path = ?self.store.root(), "Credential watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};

    #[test]
    fn test_relevant_events() {
        let create = Event::new(EventKind::Create(CreateKind::File));
        assert!(is_relevant(&create));
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any));
        assert!(!is_relevant(&access));
    }

    #[tokio::test]
    async fn test_source_watcher_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desired.json");
        std::fs::write(&path, "{}").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = SourceWatcher::new(&path, tx).run().unwrap();
        std::fs::write(&path, r#"{"a": "b"}"#).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(SyncEvent::DesiredChanged));
    }
}
