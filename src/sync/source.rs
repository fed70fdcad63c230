//! Desired-state sources.
//!
//! # Responsibilities
//! - Read the key/value data holding the desired router configuration
//! - Write it back with optimistic concurrency
//! - Apply configuration updates as bounded read-modify-write
//!
//! # Design Decisions
//! - Versions are opaque; a write names the version it was derived from
//! - A conflicting write is retried from a fresh read, never merged

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::router::document::{from_data, write_data};
use crate::router::{ConfigUpdate, ModelError, RouterConfig};

/// Key/value data as stored by the source.
pub type ConfigData = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid desired state data in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("desired state was modified concurrently")]
    Conflict,

    #[error("gave up after {0} conflicting updates")]
    RetriesExhausted(u32),

    #[error("no router configuration under {0}")]
    NotFound(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Data plus the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub data: ConfigData,
    pub version: u64,
}

/// Store holding the desired configuration.
pub trait DesiredStateSource: Send + Sync {
    /// Current data, or `None` when nothing has been stored.
    fn read(&self) -> SourceResult<Option<Snapshot>>;

    /// Replace the data if it is still at `expected` (`None`: absent).
    /// Returns the new version.
    fn write(&self, data: &ConfigData, expected: Option<u64>) -> SourceResult<u64>;
}

/// Decode the configuration stored under `key`.
pub fn read_router_config(source: &dyn DesiredStateSource, key: &str) -> SourceResult<Option<RouterConfig>> {
    match source.read()? {
        Some(snapshot) => Ok(from_data(&snapshot.data, key)?),
        None => Ok(None),
    }
}

/// Apply `update` to the stored configuration, retrying on conflict.
///
/// Each attempt starts from a fresh read. Returns whether the stored
/// configuration changed.
pub fn update_router_config(
    source: &dyn DesiredStateSource,
    key: &str,
    update: &mut dyn ConfigUpdate,
    max_retries: u32,
) -> SourceResult<bool> {
    let attempts = max_retries.max(1);
    for attempt in 1..=attempts {
        let (mut data, version) = match source.read()? {
            Some(snapshot) => (snapshot.data, Some(snapshot.version)),
            None => (ConfigData::new(), None),
        };
        let mut config = from_data(&data, key)?.ok_or_else(|| SourceError::NotFound(key.to_string()))?;
        if !update.apply(&mut config) {
            return Ok(false);
        }
        if !write_data(&config, &mut data, key)? {
            return Ok(false);
        }
        match source.write(&data, version) {
            Ok(_) => return Ok(true),
            Err(SourceError::Conflict) => {
                tracing::debug!(attempt, key = %key, "Conflicting update to desired state, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(SourceError::RetriesExhausted(attempts))
}

fn version_of(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Desired state kept in a JSON object file.
pub struct FileSource {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SourceError {
        SourceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_raw(&self) -> SourceResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

impl DesiredStateSource for FileSource {
    fn read(&self) -> SourceResult<Option<Snapshot>> {
        let content = match self.read_raw()? {
            Some(content) => content,
            None => return Ok(None),
        };
        let data = serde_json::from_str(&content).map_err(|source| SourceError::Decode {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(Snapshot {
            data,
            version: version_of(&content),
        }))
    }

    fn write(&self, data: &ConfigData, expected: Option<u64>) -> SourceResult<u64> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.read_raw()?.map(|content| version_of(&content));
        if current != expected {
            return Err(SourceError::Conflict);
        }

        let content = serde_json::to_string_pretty(data).map_err(|source| SourceError::Decode {
            path: self.path.clone(),
            source,
        })?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = self.path.with_file_name(format!(".{}.tmp", file_name));
        fs::write(&temp, &content).map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(version_of(&content))
    }
}
