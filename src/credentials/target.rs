//! Writing credential material where the router reads it.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::credentials::store::{check_name, Credential};
use crate::credentials::{CredentialError, CredentialResult};
use crate::observability::metrics;
use crate::router::SslProfile;

pub const CA_CERT: &str = "ca.crt";
pub const TLS_CERT: &str = "tls.crt";
pub const TLS_KEY: &str = "tls.key";

const PROFILE_SUFFIX: &str = "-profile";
const DIR_MODE: u32 = 0o755;
// The router runs as another user, so the key stays world readable.
const FILE_MODE: u32 = 0o644;

/// Name of the credential backing a profile.
pub fn credential_name(profile: &str) -> &str {
    profile.strip_suffix(PROFILE_SUFFIX).unwrap_or(profile)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> CredentialError {
    CredentialError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One profile directory kept in step with its credential.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    profile: String,
    path: PathBuf,
    ca_only: bool,
    snapshot: Option<BTreeMap<String, Vec<u8>>>,
}

impl SyncTarget {
    /// Fails for profile names that would not stay inside `base`.
    pub fn new(profile: &SslProfile, base: &Path) -> CredentialResult<Self> {
        check_name(&profile.name)?;
        Ok(Self {
            profile: profile.name.clone(),
            path: base.join(&profile.name),
            ca_only: profile.is_ca_only(),
            snapshot: None,
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn credential_name(&self) -> &str {
        credential_name(&self.profile)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_ca_only(&self) -> bool {
        self.ca_only
    }

    pub(crate) fn set_ca_only(&mut self, ca_only: bool) {
        if self.ca_only != ca_only {
            self.ca_only = ca_only;
            self.snapshot = None;
        }
    }

    fn items(&self) -> &'static [&'static str] {
        if self.ca_only {
            &[CA_CERT]
        } else {
            &[CA_CERT, TLS_CERT, TLS_KEY]
        }
    }

    fn payload(&self, credential: &Credential) -> CredentialResult<BTreeMap<String, Vec<u8>>> {
        let payload: BTreeMap<String, Vec<u8>> = self
            .items()
            .iter()
            .filter_map(|item| {
                credential
                    .data
                    .get(*item)
                    .filter(|content| !content.is_empty())
                    .map(|content| (item.to_string(), content.clone()))
            })
            .collect();
        let required: &[&str] = if self.ca_only { &[CA_CERT] } else { &[TLS_CERT, TLS_KEY] };
        for item in required {
            if !payload.contains_key(*item) {
                return Err(CredentialError::Incomplete {
                    name: credential.name.clone(),
                    item: item.to_string(),
                });
            }
        }
        Ok(payload)
    }

    /// What is currently on disk for this profile.
    fn on_disk(&self) -> Option<BTreeMap<String, Vec<u8>>> {
        let mut existing = BTreeMap::new();
        for item in self.items() {
            if let Ok(content) = fs::read(self.path.join(item)) {
                existing.insert(item.to_string(), content);
            }
        }
        if existing.is_empty() {
            None
        } else {
            Some(existing)
        }
    }

    /// Write the credential unless the same payload is already in place.
    /// Returns whether anything was written.
    pub fn sync(&mut self, credential: &Credential) -> CredentialResult<bool> {
        let payload = self.payload(credential)?;
        if self.snapshot.is_none() {
            self.snapshot = self.on_disk();
        }
        if self.snapshot.as_ref() == Some(&payload) {
            return Ok(false);
        }

        fs::create_dir_all(&self.path).map_err(|e| io_error(&self.path, e))?;
        set_mode(&self.path, DIR_MODE).map_err(|e| io_error(&self.path, e))?;
        for (item, content) in &payload {
            let file = self.path.join(item);
            fs::write(&file, content).map_err(|e| io_error(&file, e))?;
            set_mode(&file, FILE_MODE).map_err(|e| io_error(&file, e))?;
        }
        metrics::record_credential_write();
        tracing::info!(
            profile = %self.profile,
            credential = %credential.name,
            path = %self.path.display(),
            "Synchronized credential"
        );
        self.snapshot = Some(payload);
        Ok(true)
    }

    /// Delete the profile directory.
    pub fn remove(&self) -> CredentialResult<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::info!(profile = %self.profile, path = %self.path.display(), "Removed credential directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }
}
