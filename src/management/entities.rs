//! Mapping between management records and configuration entities.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::management::message::{Record, Value};
use crate::management::types::{ManagementError, ManagementResult};
use crate::router::SiteMetadata;

/// Identity of a router in the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Router {
    pub id: String,
    pub address: String,
    pub edge: bool,
    pub site: SiteMetadata,
    pub version: String,
    /// Ids of the routers this one has outbound links to.
    pub connected_to: Vec<String>,
}

impl Router {
    pub fn from_record(record: &Record) -> ManagementResult<Self> {
        let id = record.string("id")?;
        let edge = record.string("mode")? == "edge";
        Ok(Router {
            address: router_address(&id, edge),
            site: SiteMetadata::parse(&record.string("metadata")?),
            version: record.string("version")?,
            connected_to: Vec::new(),
            id,
            edge,
        })
    }

    /// Address of this router's management node.
    pub fn agent_address(&self) -> String {
        agent_address(&self.id, self.edge)
    }
}

pub fn router_address(id: &str, edge: bool) -> String {
    if edge {
        format!("amqp:/_edge/{}", id)
    } else {
        format!("amqp:/_topo/0/{}", id)
    }
}

pub fn agent_address(id: &str, edge: bool) -> String {
    format!("{}/$management", router_address(id, edge))
}

/// A live AMQP connection on a router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub container: String,
    pub oper_status: String,
    pub host: String,
    pub role: String,
    pub dir: String,
    pub active: bool,
}

impl Connection {
    pub fn from_record(record: &Record) -> ManagementResult<Self> {
        Ok(Connection {
            container: record.string("container")?,
            oper_status: record.string("operStatus")?,
            host: record.string("host")?,
            role: record.string("role")?,
            dir: record.string("dir")?,
            active: record.boolean("active")?,
        })
    }

    pub fn is_outbound(&self) -> bool {
        self.dir == "out"
    }

    pub fn is_inbound(&self) -> bool {
        self.dir == "in"
    }
}

/// An interior router known to the local routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterNode {
    pub id: String,
    pub next_hop: String,
}

impl RouterNode {
    pub fn from_record(record: &Record) -> ManagementResult<Self> {
        Ok(RouterNode {
            id: record.string("id")?,
            next_hop: record.string("nextHop")?,
        })
    }

    pub fn agent_address(&self) -> String {
        agent_address(&self.id, false)
    }
}

/// Decode a record into a configuration entity.
///
/// The router reports ports as strings; `numeric_port` converts them for
/// entities that model the port as an integer.
pub fn from_record<T: DeserializeOwned>(
    record: &Record,
    entity_type: &str,
    numeric_port: bool,
) -> ManagementResult<T> {
    let mut json = record.to_json();
    if record.get("port").is_some() {
        let port = record.port("port")?;
        let value = if numeric_port {
            port.parse::<i64>()
                .map(serde_json::Value::from)
                .map_err(|_| ManagementError::FieldType {
                    field: "port".to_string(),
                    expected: "a numeric port",
                })?
        } else {
            serde_json::Value::String(port)
        };
        if let Some(fields) = json.as_object_mut() {
            fields.insert("port".to_string(), value);
        }
    }
    serde_json::from_value(json)
        .map_err(|e| ManagementError::Malformed(format!("{} record: {}", entity_type, e)))
}

/// Encode an entity as request attributes. Ports are always sent as strings.
pub fn attributes<T: Serialize>(entity: &T) -> ManagementResult<BTreeMap<String, Value>> {
    let json = serde_json::to_value(entity).map_err(|e| ManagementError::Invalid(e.to_string()))?;
    let mut fields = match Value::from_json(json) {
        Value::Map(fields) => fields,
        other => {
            return Err(ManagementError::Invalid(format!(
                "entity does not encode as a map: {:?}",
                other
            )))
        }
    };
    if let Some(port) = fields.get("port").and_then(Value::as_i64) {
        fields.insert("port".to_string(), Value::String(port.to_string()));
    }
    Ok(fields)
}
