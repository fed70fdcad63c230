//! Protocol bridges between raw TCP/HTTP endpoints and routing addresses.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::router::model::{is_false, Extra};

pub const HTTP_VERSION_1: &str = "HTTP1";
pub const HTTP_VERSION_2: &str = "HTTP2";

const DEFAULT_OBSERVER: &str = "auto";

/// Behaviour shared by every bridge endpoint kind.
pub trait Endpoint: Clone {
    fn name(&self) -> &str;
    fn ssl_profile(&self) -> &str;

    /// Whether `self` (desired) and `other` (actual) configure the same endpoint.
    fn equivalent(&self, other: &Self) -> bool;
}

fn is_addr_any(host: &str) -> bool {
    host.parse::<IpAddr>()
        .map(|ip| ip.is_unspecified())
        .unwrap_or(false)
}

/// An empty host and the wildcard address are interchangeable.
pub fn equivalent_host(a: &str, b: &str) -> bool {
    if a == b {
        true
    } else if a.is_empty() {
        is_addr_any(b)
    } else if b.is_empty() {
        is_addr_any(a)
    } else {
        false
    }
}

fn equivalent_verify_hostname(a: Option<bool>, b: Option<bool>) -> bool {
    a.unwrap_or(true) == b.unwrap_or(true)
}

fn observer_or_default(observer: &str) -> &str {
    if observer.is_empty() {
        DEFAULT_OBSERVER
    } else {
        observer
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TcpEndpoint {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub site_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_profile: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub observer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub process_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_hostname: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Endpoint for TcpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn ssl_profile(&self) -> &str {
        &self.ssl_profile
    }

    fn equivalent(&self, other: &Self) -> bool {
        equivalent_host(&self.host, &other.host)
            && self.port == other.port
            && self.address == other.address
            && self.site_id == other.site_id
            && self.process_id == other.process_id
            && self.ssl_profile == other.ssl_profile
            && equivalent_verify_hostname(self.verify_hostname, other.verify_hostname)
            && observer_or_default(&self.observer) == observer_or_default(&other.observer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpEndpoint {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub site_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub aggregation: String,
    #[serde(skip_serializing_if = "is_false")]
    pub event_channel: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_override: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_profile: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub process_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_hostname: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl HttpEndpoint {
    pub fn is_http2(&self) -> bool {
        self.protocol_version == HTTP_VERSION_2
    }
}

impl Endpoint for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn ssl_profile(&self) -> &str {
        &self.ssl_profile
    }

    fn equivalent(&self, other: &Self) -> bool {
        if !equivalent_host(&self.host, &other.host)
            || self.port != other.port
            || self.address != other.address
            || self.site_id != other.site_id
            || self.process_id != other.process_id
            || self.ssl_profile != other.ssl_profile
            || self.aggregation != other.aggregation
            || self.event_channel != other.event_channel
            || self.host_override != other.host_override
            || !equivalent_verify_hostname(self.verify_hostname, other.verify_hostname)
        {
            return false;
        }
        // The router omits the version for HTTP/1, so only HTTP/2 is checked.
        !(self.is_http2() && !other.is_http2())
    }
}

/// Bridge section of a router configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeConfig {
    pub tcp_listeners: BTreeMap<String, TcpEndpoint>,
    pub tcp_connectors: BTreeMap<String, TcpEndpoint>,
    pub http_listeners: BTreeMap<String, HttpEndpoint>,
    pub http_connectors: BTreeMap<String, HttpEndpoint>,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tcp_listener(&mut self, endpoint: TcpEndpoint) {
        self.tcp_listeners.insert(endpoint.name.clone(), endpoint);
    }

    pub fn remove_tcp_listener(&mut self, name: &str) -> Option<TcpEndpoint> {
        self.tcp_listeners.remove(name)
    }

    pub fn add_tcp_connector(&mut self, endpoint: TcpEndpoint) {
        self.tcp_connectors.insert(endpoint.name.clone(), endpoint);
    }

    pub fn remove_tcp_connector(&mut self, name: &str) -> Option<TcpEndpoint> {
        self.tcp_connectors.remove(name)
    }

    pub fn add_http_listener(&mut self, endpoint: HttpEndpoint) {
        self.http_listeners.insert(endpoint.name.clone(), endpoint);
    }

    pub fn remove_http_listener(&mut self, name: &str) -> Option<HttpEndpoint> {
        self.http_listeners.remove(name)
    }

    pub fn add_http_connector(&mut self, endpoint: HttpEndpoint) {
        self.http_connectors.insert(endpoint.name.clone(), endpoint);
    }

    pub fn remove_http_connector(&mut self, name: &str) -> Option<HttpEndpoint> {
        self.http_connectors.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tcp_listeners.is_empty()
            && self.tcp_connectors.is_empty()
            && self.http_listeners.is_empty()
            && self.http_connectors.is_empty()
    }

    /// Profiles referenced by any endpoint in the four maps.
    pub fn referenced_ssl_profiles(&self) -> BTreeSet<String> {
        let tcp = self
            .tcp_listeners
            .values()
            .chain(self.tcp_connectors.values())
            .map(|e| e.ssl_profile.as_str());
        let http = self
            .http_listeners
            .values()
            .chain(self.http_connectors.values())
            .map(|e| e.ssl_profile.as_str());
        tcp.chain(http)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Ports claimed on the router by TCP and HTTP listeners, keyed by name.
    pub fn listener_ports(&self) -> Vec<(String, String)> {
        let tcp = self.tcp_listeners.values().map(|e| (e.name.clone(), e.port.clone()));
        let http = self.http_listeners.values().map(|e| (e.name.clone(), e.port.clone()));
        tcp.chain(http).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(name: &str, host: &str, port: &str) -> TcpEndpoint {
        TcpEndpoint {
            name: name.into(),
            host: host.into(),
            port: port.into(),
            address: "echo:9090".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_equivalent_host() {
        assert!(equivalent_host("", "0.0.0.0"));
        assert!(equivalent_host("::", ""));
        assert!(equivalent_host("10.0.0.1", "10.0.0.1"));
        assert!(!equivalent_host("", "10.0.0.1"));
        assert!(!equivalent_host("", "backend"));
    }

    #[test]
    fn test_tcp_defaults_are_equivalent() {
        let mut a = tcp("echo", "", "9090");
        let mut b = tcp("echo", "0.0.0.0", "9090");
        b.verify_hostname = Some(true);
        b.observer = "auto".into();
        assert!(a.equivalent(&b));

        a.verify_hostname = Some(false);
        assert!(!a.equivalent(&b));
    }

    #[test]
    fn test_tcp_port_change_is_not_equivalent() {
        assert!(!tcp("echo", "", "9090").equivalent(&tcp("echo", "", "9091")));
    }

    #[test]
    fn test_http2_must_be_preserved() {
        let desired = HttpEndpoint {
            name: "web".into(),
            port: "8080".into(),
            protocol_version: HTTP_VERSION_2.into(),
            ..Default::default()
        };
        let mut actual = desired.clone();
        actual.protocol_version.clear();
        assert!(!desired.equivalent(&actual));
        assert!(actual.equivalent(&desired));
    }

    #[test]
    fn test_referenced_profiles_ignore_empty() {
        let mut bridges = BridgeConfig::new();
        bridges.add_tcp_listener(tcp("a", "", "1024"));
        let mut secured = tcp("b", "", "1025");
        secured.ssl_profile = "skupper-tls-b".into();
        bridges.add_tcp_connector(secured);
        let referenced = bridges.referenced_ssl_profiles();
        assert_eq!(referenced.len(), 1);
        assert!(referenced.contains("skupper-tls-b"));
    }
}
