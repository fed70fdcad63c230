//! Credential synchronisation from a credential store to the filesystem
//! the router reads certificates from.
//!
//! # Data Flow
//! ```text
//! SslProfile ──► SyncTarget ──► CredentialStore::get ──► {ca.crt, tls.crt, tls.key}
//!                                                            │
//!                          {output}/{profile}/ ◄── write if payload changed
//! ```

pub mod store;
pub mod sync;
pub mod target;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use store::{check_name, Credential, CredentialStore, DirectoryStore};
pub use sync::{CredentialSync, SyncDelta};
pub use target::{credential_name, SyncTarget};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("credential {name} has no {item}")]
    Incomplete { name: String, item: String },

    #[error("invalid credential name '{0}'")]
    InvalidName(String),

    #[error("credentials not synchronized with router config: {0}")]
    NotSynchronized(String),
}

pub type CredentialResult<T> = Result<T, CredentialError>;
