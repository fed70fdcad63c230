//! Management protocol types and error definitions.

use std::time::Duration;

use thiserror::Error;

/// Address of the management node on the router an agent is attached to.
pub const MANAGEMENT_ADDRESS: &str = "$management";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fully qualified entity type names.
pub mod entity {
    pub const ROUTER: &str = "io.skupper.router.router";
    pub const ROUTER_NODE: &str = "io.skupper.router.router.node";
    pub const CONNECTION: &str = "io.skupper.router.connection";
    pub const CONNECTOR: &str = "io.skupper.router.connector";
    pub const LISTENER: &str = "io.skupper.router.listener";
    pub const SSL_PROFILE: &str = "io.skupper.router.sslProfile";
    pub const TCP_CONNECTOR: &str = "io.skupper.router.tcpConnector";
    pub const TCP_LISTENER: &str = "io.skupper.router.tcpListener";
    pub const HTTP_CONNECTOR: &str = "io.skupper.router.httpConnector";
    pub const HTTP_LISTENER: &str = "io.skupper.router.httpListener";
}

/// Management operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Query => "QUERY",
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One query of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub entity_type: String,
    pub attributes: Vec<String>,
    /// Management address of another router; `None` targets the local one.
    pub agent: Option<String>,
}

impl Query {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            attributes: Vec::new(),
            agent: None,
        }
    }

    pub fn at(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    /// One query of `entity_type` per agent address.
    pub fn for_all_agents(entity_type: &str, agents: &[String]) -> Vec<Query> {
        agents.iter().map(|a| Query::new(entity_type).at(a)).collect()
    }
}

/// Errors that can occur while talking to a router.
#[derive(Debug, Error)]
pub enum ManagementError {
    /// The management endpoint could not be reached.
    #[error("could not connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Sending or receiving failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The router answered with a non-2xx status.
    #[error("{operation} {entity_type} failed with status {status}: {description}")]
    Rejected {
        operation: Operation,
        entity_type: String,
        status: i64,
        description: String,
    },

    /// The reply did not have the expected shape.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The agent was closed by an earlier failure.
    #[error("agent is closed")]
    Closed,

    /// A record attribute had an unexpected type.
    #[error("attribute {field} is not {expected}")]
    FieldType { field: String, expected: &'static str },

    /// At least one query of a batch failed.
    #[error("batch query failed: {}", .0.join(", "))]
    Batch(Vec<String>),

    /// The request was rejected before being sent.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// An error annotated with the step that produced it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ManagementError>,
    },
}

impl ManagementError {
    pub fn context(self, context: impl Into<String>) -> Self {
        ManagementError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error means the agent connection can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        match self {
            ManagementError::Connect { .. }
            | ManagementError::Transport(_)
            | ManagementError::Timeout(_)
            | ManagementError::Malformed(_)
            | ManagementError::Closed => true,
            ManagementError::Context { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Result type for management operations.
pub type ManagementResult<T> = Result<T, ManagementError>;
