//! Encoding of a router configuration as its JSON document.
//!
//! The document is an array of `[entityType, attributes]` tuples and is
//! stored under a single well-known key of a key/value data map.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::router::model::{Address, Connector, Listener, LogConfig, RouterConfig, SslProfile};

/// Key holding the encoded document in a key/value data map.
pub const CONFIG_KEY: &str = "skrouterd.json";

/// Errors raised while decoding or encoding a configuration document.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The document is not valid JSON.
    #[error("invalid router configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON does not have the expected tuple structure.
    #[error("invalid router configuration: {0}")]
    Structure(String),

    /// An entity could not be mapped onto its type.
    #[error("invalid {entity_type} entity: {source}")]
    Entity {
        entity_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

fn entity<T: DeserializeOwned>(entity_type: &str, value: Value) -> ModelResult<T> {
    serde_json::from_value(value).map_err(|source| ModelError::Entity {
        entity_type: entity_type.to_string(),
        source,
    })
}

fn tuple<T: Serialize>(entity_type: &str, value: &T) -> ModelResult<Value> {
    Ok(Value::Array(vec![
        Value::String(entity_type.to_string()),
        serde_json::to_value(value)?,
    ]))
}

impl RouterConfig {
    /// Decode a document. Unknown entity types are skipped.
    pub fn decode(document: &str) -> ModelResult<Self> {
        let top: Value = serde_json::from_str(document)?;
        let elements = match top {
            Value::Array(elements) => elements,
            other => {
                return Err(ModelError::Structure(format!(
                    "expected array at top level, got {}",
                    other
                )))
            }
        };

        let mut config = RouterConfig::default();
        for element in elements {
            let (entity_type, value) = match element {
                Value::Array(mut pair) if pair.len() == 2 => {
                    let value = pair.pop().unwrap_or(Value::Null);
                    let entity_type = pair.pop().unwrap_or(Value::Null);
                    (entity_type, value)
                }
                other => {
                    return Err(ModelError::Structure(format!(
                        "expected [type, entity] pair, got {}",
                        other
                    )))
                }
            };
            let entity_type = match entity_type {
                Value::String(t) => t,
                other => {
                    return Err(ModelError::Structure(format!(
                        "expected entity type as string, got {}",
                        other
                    )))
                }
            };
            if !value.is_object() {
                return Err(ModelError::Structure(format!(
                    "expected {} entity as map, got {}",
                    entity_type, value
                )));
            }

            match entity_type.as_str() {
                "router" => config.metadata = entity(&entity_type, value)?,
                "sslProfile" => {
                    let profile: SslProfile = entity(&entity_type, value)?;
                    config.ssl_profiles.insert(profile.name.clone(), profile);
                }
                "listener" => {
                    let listener: Listener = entity(&entity_type, value)?;
                    config.listeners.insert(listener.name.clone(), listener);
                }
                "connector" => {
                    let connector: Connector = entity(&entity_type, value)?;
                    config.connectors.insert(connector.name.clone(), connector);
                }
                "address" => {
                    let address: Address = entity(&entity_type, value)?;
                    config.addresses.insert(address.prefix.clone(), address);
                }
                "log" => {
                    let log: LogConfig = entity(&entity_type, value)?;
                    config.log_config.insert(log.module.clone(), log);
                }
                "tcpListener" => config.bridges.add_tcp_listener(entity(&entity_type, value)?),
                "tcpConnector" => config.bridges.add_tcp_connector(entity(&entity_type, value)?),
                "httpListener" => config.bridges.add_http_listener(entity(&entity_type, value)?),
                "httpConnector" => config.bridges.add_http_connector(entity(&entity_type, value)?),
                other => {
                    tracing::debug!(entity_type = %other, "Ignoring unknown entity type");
                }
            }
        }
        Ok(config)
    }

    /// Encode as a pretty-printed document with a stable entity order.
    pub fn encode(&self) -> ModelResult<String> {
        let mut elements = vec![tuple("router", &self.metadata)?];
        for profile in self.ssl_profiles.values() {
            elements.push(tuple("sslProfile", profile)?);
        }
        for connector in self.connectors.values() {
            elements.push(tuple("connector", connector)?);
        }
        for listener in self.listeners.values() {
            elements.push(tuple("listener", listener)?);
        }
        for address in self.addresses.values() {
            elements.push(tuple("address", address)?);
        }
        for endpoint in self.bridges.tcp_connectors.values() {
            elements.push(tuple("tcpConnector", endpoint)?);
        }
        for endpoint in self.bridges.tcp_listeners.values() {
            elements.push(tuple("tcpListener", endpoint)?);
        }
        for endpoint in self.bridges.http_connectors.values() {
            elements.push(tuple("httpConnector", endpoint)?);
        }
        for endpoint in self.bridges.http_listeners.values() {
            elements.push(tuple("httpListener", endpoint)?);
        }
        for log in self.log_config.values() {
            elements.push(tuple("log", log)?);
        }
        Ok(serde_json::to_string_pretty(&Value::Array(elements))?)
    }

    /// Semantic comparison of two documents; unparseable input never matches.
    pub fn equals_document(actual: &str, desired: &str) -> bool {
        match (RouterConfig::decode(actual), RouterConfig::decode(desired)) {
            (Ok(a), Ok(d)) => a == d,
            _ => false,
        }
    }

    pub fn as_config_map_data(&self) -> ModelResult<BTreeMap<String, String>> {
        let mut data = BTreeMap::new();
        data.insert(CONFIG_KEY.to_string(), self.encode()?);
        Ok(data)
    }

    /// Decode the configuration held in `data`, if any.
    pub fn from_config_map_data(data: &BTreeMap<String, String>) -> ModelResult<Option<Self>> {
        from_data(data, CONFIG_KEY)
    }

    /// Write this configuration into `data` unless it already holds an
    /// equal one. Returns whether `data` changed.
    pub fn update_config_map_data(&self, data: &mut BTreeMap<String, String>) -> ModelResult<bool> {
        write_data(self, data, CONFIG_KEY)
    }
}

pub(crate) fn from_data(data: &BTreeMap<String, String>, key: &str) -> ModelResult<Option<RouterConfig>> {
    match data.get(key) {
        Some(document) if !document.is_empty() => RouterConfig::decode(document).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn write_data(
    config: &RouterConfig,
    data: &mut BTreeMap<String, String>,
    key: &str,
) -> ModelResult<bool> {
    if let Some(existing) = from_data(data, key)? {
        if &existing == config {
            return Ok(false);
        }
    }
    data.insert(key.to_string(), config.encode()?);
    Ok(true)
}
