//! Bridge listener to router port allocation.

use std::collections::BTreeMap;
use std::fmt;

use crate::ports::free_ports::FreePorts;
use crate::ports::PortResult;
use crate::router::RouterConfig;

/// Ports allocated on the router for bridge listeners.
///
/// Owned by a single reconciler; callers serialise access.
#[derive(Debug, Clone, Default)]
pub struct PortMapping {
    free: FreePorts,
    mappings: BTreeMap<String, u16>,
}

impl PortMapping {
    pub fn new(free: FreePorts) -> Self {
        Self {
            free,
            mappings: BTreeMap::new(),
        }
    }

    /// Existing allocation for `key`, or the next free port.
    pub fn get_port_for_key(&mut self, key: &str) -> PortResult<u16> {
        if let Some(port) = self.mappings.get(key) {
            return Ok(*port);
        }
        let port = self.free.next_free()?;
        tracing::debug!(key = %key, port, "Allocated router port");
        self.mappings.insert(key.to_string(), port);
        Ok(port)
    }

    /// Forget `key` and return its port to the pool.
    pub fn release_port_for_key(&mut self, key: &str) -> Option<u16> {
        let port = self.mappings.remove(key)?;
        if let Err(e) = self.free.release(port) {
            tracing::warn!(key = %key, port, error = %e, "Released port outside managed range");
        }
        Some(port)
    }

    pub fn port_for_key(&self, key: &str) -> Option<u16> {
        self.mappings.get(key).copied()
    }

    pub fn mappings(&self) -> &BTreeMap<String, u16> {
        &self.mappings
    }

    pub fn free_ports(&self) -> &FreePorts {
        &self.free
    }

    /// Rebuild the table from a live configuration.
    ///
    /// Every listener port is marked in use, and bridge listeners restore
    /// their name to port mapping.
    pub fn recover(&mut self, config: &RouterConfig) {
        for listener in config.listeners.values() {
            if let Ok(port) = u16::try_from(listener.port) {
                self.free.mark_in_use(port);
            }
        }
        for (name, port) in config.bridges.listener_ports() {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.free.mark_in_use(port);
                    if !name.is_empty() {
                        self.mappings.insert(name, port);
                    }
                }
                Err(_) => {
                    tracing::warn!(listener = %name, port = %port, "Ignoring bridge listener with invalid port");
                }
            }
        }
        tracing::debug!(
            mappings = self.mappings.len(),
            free = %self.free,
            "Recovered port mapping"
        );
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, port) in &self.mappings {
            writeln!(f, "{} => {}", key, port)?;
        }
        write!(f, "free: {}", self.free)
    }
}
