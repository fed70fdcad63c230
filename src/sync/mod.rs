//! Desired-state reconciliation.
//!
//! # Data Flow
//! ```text
//! SourceWatcher ─────┐
//!                    ├─► mpsc<SyncEvent> ─► ConfigSync::run ─► AgentPool ─► router
//! CredentialWatcher ─┘                            │
//!                                                 └─► CredentialSync ─► certificate files
//! ```

pub mod engine;
pub mod source;
pub mod watcher;

pub use engine::{owns_listener, ConfigSync, SyncError, SyncOptions, SyncResult};
pub use source::{
    read_router_config, update_router_config, ConfigData, DesiredStateSource, FileSource, Snapshot,
    SourceError, SourceResult,
};
pub use watcher::{CredentialWatcher, SourceWatcher, SyncEvent};
