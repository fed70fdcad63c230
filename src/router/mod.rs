//! Router configuration model.
//!
//! # Data Flow
//! ```text
//! desired document (JSON tuples)
//!     → document.rs (decode into RouterConfig)
//!     → model.rs / bridge.rs (entities, mutation helpers, ConfigUpdate)
//!     → diff.rs (actual vs desired → Added / Deleted per category)
//!     → management agent applies the difference to the live router
//! ```
//!
//! # Design Decisions
//! - Every entity map is keyed by name and ordered, so encoded documents are
//!   deterministic and diff output never depends on insertion order
//! - Change detection uses derived structural equality, endpoint comparison
//!   uses the looser `Endpoint::equivalent` relation
//! - Attributes the model does not know about are carried in `extra` so a
//!   decode/encode cycle never drops data

pub mod bridge;
pub mod diff;
pub mod document;
pub mod model;

pub use bridge::{BridgeConfig, Endpoint, HttpEndpoint, TcpEndpoint};
pub use diff::{
    BridgeConfigDifference, ConnectorDifference, EndpointDifference, ListenerDifference,
    SslProfileDifference,
};
pub use document::{ModelError, ModelResult, CONFIG_KEY};
pub use model::{
    filter_listeners, is_not_protected_listener, Address, ConfigUpdate, Connector, Listener,
    LogConfig, Mode, RemoveConnector, Role, RouterConfig, RouterMetadata, SiteMetadata, SslProfile,
};
