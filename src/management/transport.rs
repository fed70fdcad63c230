//! Message transports to a router's management node.
//!
//! # Responsibilities
//! - Define the `Transport` seam the agent talks through
//! - Define the `Connect` seam the pool opens transports with
//! - Provide a line-delimited JSON transport over TCP
//!
//! # Design Decisions
//! - One transport carries one request/reply exchange at a time; the agent
//!   serialises calls so no demultiplexing happens here
//! - Closing is synchronous so it can run from `Drop` paths

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use url::Url;
use uuid::Uuid;

use crate::management::message::Message;
use crate::management::types::{ManagementError, ManagementResult, MANAGEMENT_ADDRESS};

const DEFAULT_PORT: u16 = 5672;

/// A bidirectional message channel to a management node.
#[async_trait]
pub trait Transport: Send {
    /// Address replies are delivered to.
    fn reply_address(&self) -> &str;

    async fn send(&mut self, message: Message) -> ManagementResult<()>;

    async fn receive(&mut self) -> ManagementResult<Message>;

    /// Release the underlying connection. Further calls fail.
    fn close(&mut self);
}

/// Opens transports to one management endpoint.
#[async_trait]
pub trait Connect: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> ManagementResult<Box<dyn Transport>>;
}

/// JSON messages, one per line, over a TCP stream.
pub struct StreamTransport {
    reader: Option<Lines<BufReader<OwnedReadHalf>>>,
    writer: Option<OwnedWriteHalf>,
    reply_to: String,
}

impl StreamTransport {
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: Some(BufReader::new(read).lines()),
            writer: Some(write),
            reply_to: format!("reply-{}", Uuid::new_v4()),
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn reply_address(&self) -> &str {
        &self.reply_to
    }

    async fn send(&mut self, mut message: Message) -> ManagementResult<()> {
        let writer = self.writer.as_mut().ok_or(ManagementError::Closed)?;
        if message.to.is_none() {
            message.to = Some(MANAGEMENT_ADDRESS.to_string());
        }
        let mut line = serde_json::to_vec(&message)
            .map_err(|e| ManagementError::Transport(e.to_string()))?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| ManagementError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ManagementError::Transport(e.to_string()))
    }

    async fn receive(&mut self) -> ManagementResult<Message> {
        let reader = self.reader.as_mut().ok_or(ManagementError::Closed)?;
        match reader.next_line().await {
            Ok(Some(line)) => serde_json::from_str(&line)
                .map_err(|e| ManagementError::Malformed(e.to_string())),
            Ok(None) => Err(ManagementError::Transport(
                "connection closed by peer".to_string(),
            )),
            Err(e) => Err(ManagementError::Transport(e.to_string())),
        }
    }

    fn close(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

/// Connects `StreamTransport`s to an `amqp://host:port` style URL.
pub struct StreamConnector {
    endpoint: String,
    address: String,
}

impl StreamConnector {
    pub fn new(endpoint: &str) -> ManagementResult<Self> {
        let url = Url::parse(endpoint).map_err(|e| ManagementError::Connect {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let host = url.host_str().ok_or_else(|| ManagementError::Connect {
            endpoint: endpoint.to_string(),
            reason: "missing host".to_string(),
        })?;
        let port = url.port().unwrap_or(DEFAULT_PORT);
        Ok(Self {
            endpoint: endpoint.to_string(),
            address: format!("{}:{}", host, port),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Connect for StreamConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> ManagementResult<Box<dyn Transport>> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| ManagementError::Connect {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(endpoint = %self.endpoint, "Opened management connection");
        Ok(Box::new(StreamTransport::new(stream)))
    }
}
