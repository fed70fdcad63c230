//! Management protocol client for live routers.
//!
//! # Responsibilities
//! - Exchange correlated request/reply messages with a router
//! - Map query records onto configuration entities
//! - Pool agents per router endpoint
//!
//! # Data Flow
//! ```text
//! AgentPools ──► AgentPool ──► PooledAgent ──► Agent ──► Transport ──► router
//! ```

pub mod agent;
pub mod entities;
pub mod message;
mod operations;
pub mod pool;
pub mod transport;
pub mod types;

pub use agent::Agent;
pub use entities::{Connection, Router, RouterNode};
pub use message::{Message, Record, Value};
pub use pool::{AgentPool, AgentPools, PooledAgent};
pub use transport::{Connect, StreamConnector, StreamTransport, Transport};
pub use types::{entity, ManagementError, ManagementResult, Operation, Query};
