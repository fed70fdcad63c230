//! Router configuration synchronisation library.
//!
//! Keeps a router's live configuration converged on a desired document,
//! over the router's management protocol.

pub mod config;
pub mod credentials;
pub mod lifecycle;
pub mod management;
pub mod observability;
pub mod ports;
pub mod resilience;
pub mod router;
pub mod site;
pub mod sync;

pub use config::SyncSettings;
pub use lifecycle::Shutdown;
pub use router::{ConfigUpdate, RouterConfig};
pub use sync::ConfigSync;
