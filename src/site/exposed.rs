//! Ports exposed per host for bridge listeners.

use std::collections::BTreeMap;

use crate::site::bindings::BindingKind;

/// A listener port and the router port it forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub kind: BindingKind,
}

/// Everything exposed under one host name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposedPortSet {
    pub host: String,
    pub ports: BTreeMap<String, Port>,
}

impl ExposedPortSet {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExposedPorts {
    hosts: BTreeMap<String, ExposedPortSet>,
}

impl ExposedPorts {
    /// Add or update a port. Returns the host's set if it changed.
    pub fn expose(&mut self, host: &str, port: Port) -> Option<ExposedPortSet> {
        let set = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| ExposedPortSet {
                host: host.to_string(),
                ports: BTreeMap::new(),
            });
        if set.ports.get(&port.name) == Some(&port) {
            return None;
        }
        set.ports.insert(port.name.clone(), port);
        Some(set.clone())
    }

    /// Remove a port. Returns what remains for the host if it was exposed.
    pub fn unexpose(&mut self, host: &str, name: &str) -> Option<ExposedPortSet> {
        let set = self.hosts.get_mut(host)?;
        set.ports.remove(name)?;
        let remaining = set.clone();
        if remaining.is_empty() {
            self.hosts.remove(host);
        }
        Some(remaining)
    }

    pub fn is_exposed(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    pub fn get(&self, host: &str) -> Option<&ExposedPortSet> {
        self.hosts.get(host)
    }
}
