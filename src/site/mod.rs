//! Site-level producers of desired router configuration.
//!
//! # Responsibilities
//! - Turn connector and listener bindings into bridge endpoints
//! - Turn links and router access definitions into connectors and listeners
//! - Persist the resulting changes to the desired-state source
//!
//! # Data Flow
//! ```text
//! binding / link / access intent
//!     → Bindings | LinkConfig | RouterAccessConfig (ConfigUpdate)
//!     → BindingReconciler::persist
//!     → update_router_config (read-modify-write on the desired document)
//!     → ConfigSync picks up the change
//! ```

pub mod access;
pub mod bindings;
pub mod exposed;
pub mod link;
pub mod reconciler;

use thiserror::Error;

use crate::ports::PortError;
use crate::sync::SourceError;

pub use access::{AccessRole, RouterAccess, RouterAccessConfig};
pub use bindings::{
    ssl_profile_name, BindingContext, BindingKind, Bindings, ConnectorBinding, ListenerBinding,
    TargetSelection,
};
pub use exposed::{ExposedPortSet, ExposedPorts, Port};
pub use link::{LinkConfig, LinkDefinition, LinkEndpoint};
pub use reconciler::BindingReconciler;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("port allocation failed: {0}")]
    Port(#[from] PortError),

    #[error("failed to expose {host}: {reason}")]
    Expose { host: String, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

pub type SiteResult<T> = Result<T, SiteError>;
