//! Credential stores.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::credentials::{CredentialError, CredentialResult};

/// A named bundle of credential items such as `ca.crt` or `tls.key`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Credential {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_item(mut self, item: &str, content: impl Into<Vec<u8>>) -> Self {
        self.data.insert(item.to_string(), content.into());
        self
    }
}

/// Accept only names that map to a single directory entry.
pub fn check_name(name: &str) -> CredentialResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(first)), None) if first == name => Ok(()),
        _ => Err(CredentialError::InvalidName(name.to_string())),
    }
}

/// Source of credential bundles.
pub trait CredentialStore: Send + Sync {
    /// Look up a credential; `None` when it does not exist (yet).
    fn get(&self, name: &str) -> CredentialResult<Option<Credential>>;
}

/// A directory per credential, one file per item.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the credential a changed path belongs to.
    pub fn credential_for_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        match relative.components().next()? {
            Component::Normal(name) => name.to_str().map(str::to_string),
            _ => None,
        }
    }
}

fn io_error(path: &Path, source: io::Error) -> CredentialError {
    CredentialError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl CredentialStore for DirectoryStore {
    fn get(&self, name: &str) -> CredentialResult<Option<Credential>> {
        check_name(name)?;
        let dir = self.root.join(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&dir, e)),
        };
        let mut credential = Credential::new(name);
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let item = match path.file_name().and_then(|n| n.to_str()) {
                // Hidden files are editor and atomic-write leftovers.
                Some(item) if !item.starts_with('.') => item.to_string(),
                _ => continue,
            };
            let content = fs::read(&path).map_err(|e| io_error(&path, e))?;
            credential.data.insert(item, content);
        }
        Ok(Some(credential))
    }
}
