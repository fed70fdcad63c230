//! Shared utilities for integration testing.
//!
//! `MockRouter` stands in for a router's management node. It keeps entity
//! tables in memory, answers queries and CRUD requests the way the router
//! does, and can be told to reject, stall, garble or reorder replies.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use router_sync::management::entities;
use router_sync::management::{
    entity, AgentPool, Connect, ManagementError, ManagementResult, Message, Transport, Value,
};
use router_sync::router::RouterConfig;
use router_sync::sync::{DesiredStateSource, FileSource};

pub type Attributes = BTreeMap<String, Value>;

/// A mutating request the router received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: String,
    pub entity_type: String,
    pub name: String,
}

impl Request {
    pub fn new(operation: &str, entity_type: &str, name: &str) -> Self {
        Self {
            operation: operation.to_string(),
            entity_type: entity_type.to_string(),
            name: name.to_string(),
        }
    }
}

/// How queued replies are handed back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyOrder {
    #[default]
    AsSent,
    /// The last reply of a burst arrives first, the rest in order.
    LastFirst,
}

#[derive(Debug, Clone)]
struct Fault {
    operation: String,
    entity_type: String,
    status: i32,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    router: Attributes,
    tables: BTreeMap<String, BTreeMap<String, Attributes>>,
    requests: Vec<Request>,
    queries: usize,
    queried: BTreeMap<String, usize>,
    faults: Vec<Fault>,
    stalled: bool,
    malformed: usize,
    refuse: bool,
    order: ReplyOrder,
    connections: usize,
    closed: usize,
}

impl State {
    fn fault(&mut self, operation: &str, entity_type: &str) -> Option<i32> {
        let index = self
            .faults
            .iter()
            .position(|f| f.operation == operation && f.entity_type == entity_type)?;
        let status = self.faults[index].status;
        if let Some(remaining) = self.faults[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(index);
            }
        }
        Some(status)
    }

    fn handle(&mut self, request: &Message) -> Option<Message> {
        if self.stalled {
            return None;
        }
        if self.malformed > 0 {
            self.malformed -= 1;
            return Some(Message {
                to: request.reply_to.clone(),
                correlation_id: request.correlation_id.clone(),
                ..Default::default()
            });
        }

        let text = |key: &str| {
            request
                .property(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let operation = text("operation");
        if operation == "QUERY" {
            self.queries += 1;
            let entity_type = text("entityType");
            *self.queried.entry(entity_type.clone()).or_default() += 1;
            if let Some(status) = self.fault(&operation, &entity_type) {
                return Some(reply(request, status, "injected failure", None));
            }
            return Some(self.query(request, &entity_type));
        }

        let entity_type = text("type");
        let name = text("name");
        self.requests.push(Request::new(&operation, &entity_type, &name));
        if let Some(status) = self.fault(&operation, &entity_type) {
            return Some(reply(request, status, "injected failure", None));
        }

        let table = self.tables.entry(entity_type).or_default();
        let attributes = request
            .body
            .as_ref()
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();
        let (status, description) = match operation.as_str() {
            "CREATE" if table.contains_key(&name) => (400, "entity already exists"),
            "CREATE" => {
                let mut attributes = attributes;
                attributes.insert("name".to_string(), Value::from(name.as_str()));
                table.insert(name, attributes);
                (201, "Created")
            }
            "UPDATE" => match table.get_mut(&name) {
                Some(existing) => {
                    existing.extend(attributes);
                    (200, "OK")
                }
                None => (404, "not found"),
            },
            "DELETE" => match table.remove(&name) {
                Some(_) => (204, "No Content"),
                None => (404, "not found"),
            },
            _ => (400, "unsupported operation"),
        };
        Some(reply(request, status, description, None))
    }

    fn query(&self, request: &Message, entity_type: &str) -> Message {
        let rows: Vec<&Attributes> = if entity_type == entity::ROUTER {
            vec![&self.router]
        } else {
            self.tables
                .get(entity_type)
                .map(|table| table.values().collect())
                .unwrap_or_default()
        };

        let requested: Vec<String> = request
            .body
            .as_ref()
            .and_then(Value::as_map)
            .and_then(|body| body.get("attributeNames"))
            .and_then(Value::as_list)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let names = if requested.is_empty() {
            let all: BTreeSet<&String> = rows.iter().flat_map(|row| row.keys()).collect();
            all.into_iter().cloned().collect()
        } else {
            requested
        };

        let results = rows
            .iter()
            .map(|row| {
                Value::List(
                    names
                        .iter()
                        .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
                        .collect(),
                )
            })
            .collect();
        let mut body = BTreeMap::new();
        body.insert("attributeNames".to_string(), Value::from(names));
        body.insert("results".to_string(), Value::List(results));
        reply(request, 200, "OK", Some(Value::Map(body)))
    }
}

fn reply(request: &Message, status: i32, description: &str, body: Option<Value>) -> Message {
    Message {
        to: request.reply_to.clone(),
        correlation_id: request.correlation_id.clone(),
        body,
        ..Default::default()
    }
    .with_property("statusCode", Value::Int(status))
    .with_property("statusDescription", description)
}

/// In-memory management node shared by every transport it hands out.
#[derive(Clone)]
pub struct MockRouter {
    state: Arc<Mutex<State>>,
}

impl MockRouter {
    pub fn new(id: &str, mode: &str) -> Self {
        let mut router = Attributes::new();
        router.insert("id".to_string(), Value::from(id));
        router.insert("mode".to_string(), Value::from(mode));
        router.insert("metadata".to_string(), Value::from(r#"{"id":"site-1"}"#));
        router.insert("version".to_string(), Value::from("3.0.0"));
        Self {
            state: Arc::new(Mutex::new(State {
                router,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> Arc<dyn Connect> {
        Arc::new(MockConnector {
            endpoint: "amqp://mock-router:5672".to_string(),
            state: Arc::clone(&self.state),
        })
    }

    pub fn pool(&self, capacity: usize, timeout: Duration) -> Arc<AgentPool> {
        Arc::new(AgentPool::new(self.connector(), capacity, timeout))
    }

    /// Store an entity as if it had been created earlier.
    pub fn seed<T: Serialize>(&self, entity_type: &str, name: &str, item: &T) {
        let mut attributes = entities::attributes(item).unwrap();
        attributes.insert("name".to_string(), Value::from(name));
        self.lock()
            .tables
            .entry(entity_type.to_string())
            .or_default()
            .insert(name.to_string(), attributes);
    }

    pub fn names(&self, entity_type: &str) -> Vec<String> {
        self.lock()
            .tables
            .get(entity_type)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, entity_type: &str, name: &str) -> Option<Attributes> {
        self.lock()
            .tables
            .get(entity_type)
            .and_then(|table| table.get(name).cloned())
    }

    /// Every CREATE, UPDATE and DELETE received, rejected ones included.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries
    }

    pub fn queries_of(&self, entity_type: &str) -> usize {
        self.lock().queried.get(entity_type).copied().unwrap_or(0)
    }

    /// Reject every matching request with `status`.
    pub fn fail(&self, operation: &str, entity_type: &str, status: i32) {
        self.add_fault(operation, entity_type, status, None);
    }

    /// Reject only the next matching request.
    pub fn fail_once(&self, operation: &str, entity_type: &str, status: i32) {
        self.add_fault(operation, entity_type, status, Some(1));
    }

    fn add_fault(&self, operation: &str, entity_type: &str, status: i32, remaining: Option<usize>) {
        self.lock().faults.push(Fault {
            operation: operation.to_string(),
            entity_type: entity_type.to_string(),
            status,
            remaining,
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Stop answering anything.
    pub fn stall(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Answer the next request without a status code.
    pub fn malformed_next(&self) {
        self.lock().malformed += 1;
    }

    /// Refuse new connections.
    pub fn refuse(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    pub fn set_reply_order(&self, order: ReplyOrder) {
        self.lock().order = order;
    }

    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    pub fn closed_transports(&self) -> usize {
        self.lock().closed
    }
}

struct MockConnector {
    endpoint: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connect for MockConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> ManagementResult<Box<dyn Transport>> {
        let mut state = self.state.lock().unwrap();
        if state.refuse {
            return Err(ManagementError::Connect {
                endpoint: self.endpoint.clone(),
                reason: "connection refused".to_string(),
            });
        }
        state.connections += 1;
        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
            pending: VecDeque::new(),
            burst: false,
            closed: false,
            reply_to: format!("reply-{}", state.connections),
        }))
    }
}

struct MockTransport {
    state: Arc<Mutex<State>>,
    pending: VecDeque<Message>,
    burst: bool,
    closed: bool,
    reply_to: String,
}

#[async_trait]
impl Transport for MockTransport {
    fn reply_address(&self) -> &str {
        &self.reply_to
    }

    async fn send(&mut self, message: Message) -> ManagementResult<()> {
        if self.closed {
            return Err(ManagementError::Closed);
        }
        let reply = self.state.lock().unwrap().handle(&message);
        if let Some(reply) = reply {
            self.pending.push_back(reply);
        }
        self.burst = true;
        Ok(())
    }

    async fn receive(&mut self) -> ManagementResult<Message> {
        if self.closed {
            return Err(ManagementError::Closed);
        }
        let order = self.state.lock().unwrap().order;
        let next = if order == ReplyOrder::LastFirst && self.burst {
            self.pending.pop_back()
        } else {
            self.pending.pop_front()
        };
        self.burst = false;
        match next {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending.clear();
            self.state.lock().unwrap().closed += 1;
        }
    }
}

/// Store `config` as the desired state in a fresh file source.
pub fn desired_source(dir: &Path, config: &RouterConfig) -> Arc<FileSource> {
    let source = Arc::new(FileSource::new(dir.join("desired.json")));
    source
        .write(&config.as_config_map_data().unwrap(), None)
        .unwrap();
    source
}

/// Replace the desired state, whatever version is stored.
pub fn replace_desired(source: &FileSource, config: &RouterConfig) {
    let version = source.read().unwrap().map(|snapshot| snapshot.version);
    source
        .write(&config.as_config_map_data().unwrap(), version)
        .unwrap();
}

/// Write a credential directory with one file per item.
pub fn write_credential(root: &Path, name: &str, items: &[&str]) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    for item in items {
        fs::write(dir.join(item), format!("{} of {}", item, name)).unwrap();
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
