//! Management agent: one live connection to a router's management node.
//!
//! # Responsibilities
//! - Issue QUERY/CREATE/UPDATE/DELETE requests and correlate replies
//! - Dispatch batched queries and reassemble them in submission order
//! - Tear down the connection on any transport or protocol failure
//!
//! # Data Flow
//! ```text
//! request ──► Transport::send ──► router
//!                                   │
//! Record ◄── check status ◄── Transport::receive (deadline)
//! ```
//!
//! # Design Decisions
//! - One outstanding exchange per agent; concurrency comes from the pool
//! - A batch shares a single deadline; replies are placed by correlation id
//! - Correlation ids are `u64`, so batch indexes never wrap

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::management::entities::Router;
use crate::management::message::{Message, Record, Value};
use crate::management::transport::{Connect, Transport};
use crate::management::types::{
    entity, ManagementError, ManagementResult, Operation, Query,
};
use crate::observability::metrics;

/// A connected management client.
pub struct Agent {
    transport: Box<dyn Transport>,
    local: Router,
    closed: bool,
    timeout: Duration,
    next_correlation: u64,
}

impl Agent {
    /// Open a transport and identify the local router.
    pub async fn connect(connector: &dyn Connect, timeout: Duration) -> ManagementResult<Self> {
        let transport = match tokio::time::timeout(timeout, connector.connect()).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ManagementError::Connect {
                    endpoint: connector.endpoint().to_string(),
                    reason: format!("no connection within {:?}", timeout),
                })
            }
        };
        let mut agent = Self::with_transport(transport, timeout);
        match agent.get_local_router().await {
            Ok(router) => {
                tracing::debug!(
                    endpoint = %connector.endpoint(),
                    router = %router.id,
                    edge = router.edge,
                    "Management agent connected"
                );
                agent.local = router;
                Ok(agent)
            }
            Err(e) => {
                agent.close();
                Err(e)
            }
        }
    }

    /// Wrap an already open transport without identifying the router.
    pub fn with_transport(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            local: Router::default(),
            closed: false,
            timeout,
            next_correlation: 0,
        }
    }

    /// The router this agent is attached to.
    pub fn local(&self) -> &Router {
        &self.local
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
            metrics::record_agent_closed();
        }
    }

    fn ensure_open(&self) -> ManagementResult<()> {
        if self.closed {
            Err(ManagementError::Closed)
        } else {
            Ok(())
        }
    }

    /// Close on anything that leaves the connection in an unknown state.
    fn fail<T>(&mut self, error: ManagementError) -> ManagementResult<T> {
        if error.is_fatal() {
            tracing::warn!(error = %error, "Closing management agent");
            self.close();
        }
        Err(error)
    }

    async fn send_by(&mut self, deadline: Instant, message: Message) -> ManagementResult<()> {
        match timeout_at(deadline, self.transport.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(ManagementError::Timeout(self.timeout)),
        }
    }

    async fn receive_by(&mut self, deadline: Instant) -> ManagementResult<Message> {
        match timeout_at(deadline, self.transport.receive()).await {
            Ok(result) => result,
            Err(_) => Err(ManagementError::Timeout(self.timeout)),
        }
    }

    fn correlation(&mut self) -> u64 {
        let id = self.next_correlation;
        self.next_correlation = self.next_correlation.wrapping_add(1);
        id
    }

    /// Send one request and wait for its reply.
    async fn exchange(&mut self, mut request: Message) -> ManagementResult<Message> {
        self.ensure_open()?;
        let id = self.correlation();
        request.reply_to = Some(self.transport.reply_address().to_string());
        request.correlation_id = Some(Value::Ulong(id));

        let deadline = Instant::now() + self.timeout;
        if let Err(e) = self.send_by(deadline, request).await {
            return self.fail(e);
        }
        let reply = match self.receive_by(deadline).await {
            Ok(reply) => reply,
            Err(e) => return self.fail(e),
        };
        match reply.correlation_id.as_ref().and_then(Value::as_u64) {
            Some(got) if got == id => Ok(reply),
            other => self.fail(ManagementError::Malformed(format!(
                "expected correlation id {}, got {:?}",
                id, other
            ))),
        }
    }

    /// Run a CREATE, UPDATE or DELETE.
    pub async fn request(
        &mut self,
        operation: Operation,
        entity_type: &str,
        name: &str,
        attributes: Option<BTreeMap<String, Value>>,
    ) -> ManagementResult<()> {
        let request = Message {
            body: Some(Value::Map(attributes.unwrap_or_default())),
            ..Default::default()
        }
        .with_property("operation", operation.as_str())
        .with_property("type", entity_type)
        .with_property("name", name);

        let reply = self.exchange(request).await;
        let result = reply.and_then(|r| check_status(operation, entity_type, &r));
        metrics::record_management_request(operation.as_str(), result.is_ok());
        if matches!(result, Err(ManagementError::Malformed(_))) {
            self.close();
        }
        match &result {
            Ok(()) => tracing::info!(
                operation = %operation,
                entity_type = %entity_type,
                name = %name,
                "Management request succeeded"
            ),
            Err(e) => tracing::warn!(
                operation = %operation,
                entity_type = %entity_type,
                name = %name,
                error = %e,
                "Management request failed"
            ),
        }
        result
    }

    pub async fn create(
        &mut self,
        entity_type: &str,
        name: &str,
        attributes: BTreeMap<String, Value>,
    ) -> ManagementResult<()> {
        self.request(Operation::Create, entity_type, name, Some(attributes)).await
    }

    pub async fn update(
        &mut self,
        entity_type: &str,
        name: &str,
        attributes: BTreeMap<String, Value>,
    ) -> ManagementResult<()> {
        self.request(Operation::Update, entity_type, name, Some(attributes)).await
    }

    pub async fn delete(&mut self, entity_type: &str, name: &str) -> ManagementResult<()> {
        if name.is_empty() {
            return Err(ManagementError::Invalid(format!(
                "cannot delete {} without a name",
                entity_type
            )));
        }
        self.request(Operation::Delete, entity_type, name, None).await
    }

    /// Query every entity of a type on the local router.
    pub async fn query(&mut self, entity_type: &str, attributes: &[&str]) -> ManagementResult<Vec<Record>> {
        self.query_by_agent_address(entity_type, attributes, None).await
    }

    /// Query another router's management node.
    pub async fn query_by_agent_address(
        &mut self,
        entity_type: &str,
        attributes: &[&str],
        agent: Option<&str>,
    ) -> ManagementResult<Vec<Record>> {
        let attributes: Vec<String> = attributes.iter().map(|a| a.to_string()).collect();
        let reply = self.exchange(query_message(entity_type, &attributes, agent)).await;
        let result = reply
            .and_then(|r| check_status(Operation::Query, entity_type, &r).map(|_| r))
            .and_then(|r| records(&r));
        metrics::record_management_request(Operation::Query.as_str(), result.is_ok());
        match result {
            Err(e @ ManagementError::Malformed(_)) => self.fail(e),
            other => other,
        }
    }

    /// Send every query before collecting any reply.
    ///
    /// Replies may arrive in any order. Results are returned in submission
    /// order; if any sub-query fails the whole batch fails.
    pub async fn batch_query(&mut self, queries: &[Query]) -> ManagementResult<Vec<Vec<Record>>> {
        self.ensure_open()?;
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let reply_to = self.transport.reply_address().to_string();
        let deadline = Instant::now() + self.timeout;

        for (index, query) in queries.iter().enumerate() {
            let id = u64::try_from(index)
                .map_err(|_| ManagementError::Invalid("batch too large".to_string()))?;
            let mut request = query_message(&query.entity_type, &query.attributes, query.agent.as_deref());
            request.reply_to = Some(reply_to.clone());
            request.correlation_id = Some(Value::Ulong(id));
            if let Err(e) = self.send_by(deadline, request).await {
                return self.fail(e);
            }
        }

        let mut results: Vec<Option<Vec<Record>>> = vec![None; queries.len()];
        let mut errors = Vec::new();
        let mut malformed = false;
        for _ in 0..queries.len() {
            let reply = match self.receive_by(deadline).await {
                Ok(reply) => reply,
                Err(e) => return self.fail(e),
            };
            let index = reply
                .correlation_id
                .as_ref()
                .and_then(Value::as_u64)
                .and_then(|id| usize::try_from(id).ok())
                .filter(|&i| i < queries.len());
            let index = match index {
                Some(i) if results[i].is_none() => i,
                _ => {
                    malformed = true;
                    errors.push(format!(
                        "unexpected correlation id {:?}",
                        reply.correlation_id
                    ));
                    continue;
                }
            };
            let entity_type = &queries[index].entity_type;
            let parsed = check_status(Operation::Query, entity_type, &reply).and_then(|_| records(&reply));
            metrics::record_management_request(Operation::Query.as_str(), parsed.is_ok());
            match parsed {
                Ok(records) => results[index] = Some(records),
                Err(e) => {
                    malformed |= matches!(e, ManagementError::Malformed(_));
                    errors.push(format!("{}: {}", entity_type, e));
                }
            }
        }

        if malformed {
            self.close();
        }
        if !errors.is_empty() {
            return Err(ManagementError::Batch(errors));
        }
        results
            .into_iter()
            .map(|r| r.ok_or_else(|| ManagementError::Batch(vec!["missing reply".to_string()])))
            .collect()
    }

    pub(crate) async fn get_local_router(&mut self) -> ManagementResult<Router> {
        let records = self.query(entity::ROUTER, &[]).await?;
        match records.as_slice() {
            [record] => Router::from_record(record),
            other => self.fail(ManagementError::Malformed(format!(
                "expected exactly one router, got {}",
                other.len()
            ))),
        }
    }
}

fn query_message(entity_type: &str, attributes: &[String], agent: Option<&str>) -> Message {
    let mut body = BTreeMap::new();
    body.insert("attributeNames".to_string(), Value::from(attributes.to_vec()));
    Message {
        to: agent.map(str::to_string),
        body: Some(Value::Map(body)),
        ..Default::default()
    }
    .with_property("operation", Operation::Query.as_str())
    .with_property("entityType", entity_type)
}

fn check_status(operation: Operation, entity_type: &str, reply: &Message) -> ManagementResult<()> {
    let status = reply
        .property("statusCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| ManagementError::Malformed("reply has no statusCode".to_string()))?;
    if (200..300).contains(&status) {
        return Ok(());
    }
    let description = reply
        .property("statusDescription")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Err(ManagementError::Rejected {
        operation,
        entity_type: entity_type.to_string(),
        status,
        description,
    })
}

/// Rebuild named records from a `{attributeNames, results}` body.
fn records(reply: &Message) -> ManagementResult<Vec<Record>> {
    let body = reply
        .body
        .as_ref()
        .and_then(Value::as_map)
        .ok_or_else(|| ManagementError::Malformed("query reply body is not a map".to_string()))?;
    let names: Vec<String> = body
        .get("attributeNames")
        .and_then(Value::as_list)
        .ok_or_else(|| ManagementError::Malformed("query reply has no attributeNames".to_string()))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ManagementError::Malformed("attribute name is not a string".to_string()))
        })
        .collect::<ManagementResult<_>>()?;
    let rows = match body.get("results") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(rows) => rows
            .as_list()
            .ok_or_else(|| ManagementError::Malformed("results is not a list".to_string()))?,
    };
    rows.iter()
        .map(|row| {
            let row = row
                .as_list()
                .ok_or_else(|| ManagementError::Malformed("result row is not a list".to_string()))?;
            Record::from_row(&names, row)
        })
        .collect()
}
