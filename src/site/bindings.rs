//! Connector and listener bindings rendered into the router's bridge section.
//!
//! # Design Decisions
//! - A connector with a selector has no endpoints until its selection has
//!   reported targets; `targets_changed` triggers the rewrite
//! - Listener ports on the router come from a `PortMapping` keyed by
//!   listener name, so a restart recovers the same ports from the live config

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ports::PortMapping;
use crate::router::bridge::{HTTP_VERSION_1, HTTP_VERSION_2};
use crate::router::{BridgeConfig, ConfigUpdate, HttpEndpoint, RouterConfig, SslProfile, TcpEndpoint};
use crate::site::exposed::{ExposedPortSet, ExposedPorts, Port};
use crate::site::SiteResult;

/// Host the router binds bridge listeners on.
const LISTENER_BIND_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    #[default]
    Tcp,
    Http,
    Http2,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingKind::Tcp => "tcp",
            BindingKind::Http => "http",
            BindingKind::Http2 => "http2",
        }
    }

    fn protocol_version(&self) -> &'static str {
        match self {
            BindingKind::Http2 => HTTP_VERSION_2,
            _ => HTTP_VERSION_1,
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent to forward a routing key to a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorBinding {
    pub name: String,
    pub routing_key: String,
    pub selector: String,
    pub host: String,
    pub port: u16,
    pub kind: BindingKind,
    pub tls_credentials: String,
    pub use_client_cert: bool,
    pub include_not_ready: bool,
}

/// Intent to accept traffic for a routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerBinding {
    pub name: String,
    pub routing_key: String,
    pub host: String,
    pub port: u16,
    pub kind: BindingKind,
    pub tls_credentials: String,
}

/// Live set of hosts matching a connector's selector.
pub trait TargetSelection: Send {
    fn selector(&self) -> &str;
    fn list(&self) -> Vec<String>;
    fn close(&mut self);
}

/// Environment hooks used while bindings change.
pub trait BindingContext: Send {
    fn select(&mut self, connector: &ConnectorBinding) -> Box<dyn TargetSelection>;
    fn expose(&mut self, ports: &ExposedPortSet) -> SiteResult<()>;
    fn unexpose(&mut self, host: &str) -> SiteResult<()>;
}

/// Profile a connector references. Without a client certificate only the
/// CA is needed, so the profile gets its own name.
pub fn ssl_profile_name(tls_credentials: &str, use_client_cert: bool) -> String {
    if use_client_cert {
        tls_credentials.to_string()
    } else {
        format!("{}-profile", tls_credentials)
    }
}

pub struct Bindings {
    site_id: String,
    profile_path: String,
    connectors: BTreeMap<String, ConnectorBinding>,
    listeners: BTreeMap<String, ListenerBinding>,
    mapping: PortMapping,
    exposed: ExposedPorts,
    selections: BTreeMap<String, Box<dyn TargetSelection>>,
    context: Option<Box<dyn BindingContext>>,
}

impl Bindings {
    pub fn new(site_id: &str, profile_path: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            profile_path: profile_path.to_string(),
            connectors: BTreeMap::new(),
            listeners: BTreeMap::new(),
            mapping: PortMapping::default(),
            exposed: ExposedPorts::default(),
            selections: BTreeMap::new(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Box<dyn BindingContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn connector(&self, name: &str) -> Option<&ConnectorBinding> {
        self.connectors.get(name)
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerBinding> {
        self.listeners.get(name)
    }

    pub fn port_mapping(&self) -> &PortMapping {
        &self.mapping
    }

    pub fn exposed(&self) -> &ExposedPorts {
        &self.exposed
    }

    /// Restore listener port allocations from the live router configuration.
    pub fn recover(&mut self, config: &RouterConfig) {
        self.mapping.recover(config);
    }

    /// Record a connector change. `None` deletes it.
    ///
    /// Returns the update to apply when the router config needs rewriting.
    pub fn update_connector(
        &mut self,
        name: &str,
        connector: Option<ConnectorBinding>,
    ) -> Option<&mut Self> {
        match connector {
            Some(connector) => self.connector_updated(name, connector),
            None => self.connector_deleted(name),
        }
    }

    fn connector_updated(&mut self, name: &str, connector: ConnectorBinding) -> Option<&mut Self> {
        if self.connectors.get(name) == Some(&connector) {
            return None;
        }
        self.connectors.insert(name.to_string(), connector.clone());

        let tracked = self
            .selections
            .get(name)
            .map(|selection| selection.selector() == connector.selector);
        match tracked {
            Some(true) => return Some(self),
            Some(false) => {
                if let Some(mut selection) = self.selections.remove(name) {
                    selection.close();
                }
            }
            None => {}
        }
        if connector.selector.is_empty() {
            return Some(self);
        }
        let Some(context) = self.context.as_mut() else {
            tracing::warn!(connector = %name, "No binding context to resolve selector");
            return Some(self);
        };
        let selection = context.select(&connector);
        self.selections.insert(name.to_string(), selection);
        // Endpoints follow once the selection reports targets.
        None
    }

    fn connector_deleted(&mut self, name: &str) -> Option<&mut Self> {
        self.connectors.remove(name)?;
        if let Some(mut selection) = self.selections.remove(name) {
            selection.close();
        }
        Some(self)
    }

    /// The targets of a connector's selection changed.
    pub fn targets_changed(&mut self, name: &str) -> Option<&mut Self> {
        if self.connectors.contains_key(name) && self.selections.contains_key(name) {
            Some(self)
        } else {
            None
        }
    }

    /// Record a listener change. `None` deletes it.
    pub fn update_listener(
        &mut self,
        name: &str,
        listener: Option<ListenerBinding>,
    ) -> Option<&mut Self> {
        match listener {
            Some(listener) => self.listener_updated(name, listener),
            None => self.listener_deleted(name),
        }
    }

    fn listener_updated(&mut self, name: &str, listener: ListenerBinding) -> Option<&mut Self> {
        let previous = self.listeners.insert(name.to_string(), listener.clone());
        if previous.as_ref() == Some(&listener) {
            return None;
        }
        if let Some(previous) = previous.filter(|p| p.host != listener.host) {
            self.unexpose_port(&previous.host, name);
        }
        match self.mapping.get_port_for_key(name) {
            Ok(target_port) => {
                let port = Port {
                    name: name.to_string(),
                    port: listener.port,
                    target_port,
                    kind: listener.kind,
                };
                if let Some(set) = self.exposed.expose(&listener.host, port) {
                    if let Some(context) = self.context.as_mut() {
                        match context.expose(&set) {
                            Ok(()) => tracing::info!(listener = %name, host = %listener.host, "Exposed listener"),
                            Err(e) => tracing::error!(listener = %name, error = %e, "Error exposing listener"),
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(listener = %name, error = %e, "Unable to allocate port for listener");
            }
        }
        Some(self)
    }

    fn listener_deleted(&mut self, name: &str) -> Option<&mut Self> {
        let listener = self.listeners.remove(name)?;
        self.unexpose_port(&listener.host, name);
        self.mapping.release_port_for_key(name);
        Some(self)
    }

    fn unexpose_port(&mut self, host: &str, name: &str) {
        let Some(remaining) = self.exposed.unexpose(host, name) else {
            return;
        };
        let Some(context) = self.context.as_mut() else {
            return;
        };
        let result = if remaining.is_empty() {
            context.unexpose(host)
        } else {
            context.expose(&remaining)
        };
        if let Err(e) = result {
            tracing::error!(listener = %name, host = %host, error = %e, "Error updating exposed ports");
        }
    }

    /// Bridge section for the current bindings.
    pub fn to_bridge_config(&mut self) -> BridgeConfig {
        let mut config = BridgeConfig::new();
        for (name, connector) in &self.connectors {
            let ssl_profile = if connector.tls_credentials.is_empty() {
                String::new()
            } else {
                ssl_profile_name(&connector.tls_credentials, connector.use_client_cert)
            };
            if !connector.host.is_empty() {
                add_connector(&mut config, &self.site_id, name, &connector.host, connector, &ssl_profile);
            } else if let Some(selection) = self.selections.get(name) {
                for host in selection.list() {
                    let endpoint = format!("{}_{}", name, host);
                    add_connector(&mut config, &self.site_id, &endpoint, &host, connector, &ssl_profile);
                }
            } else if connector.selector.is_empty() {
                tracing::error!(connector = %name, "Connector has neither host nor selector set");
            } else {
                tracing::warn!(connector = %name, "Not yet tracking targets for connector");
            }
        }
        for (name, listener) in &self.listeners {
            let port = match self.mapping.get_port_for_key(name) {
                Ok(port) => port,
                Err(e) => {
                    tracing::error!(listener = %name, error = %e, "Could not allocate port");
                    continue;
                }
            };
            match listener.kind {
                BindingKind::Tcp => config.add_tcp_listener(TcpEndpoint {
                    name: name.clone(),
                    host: LISTENER_BIND_HOST.to_string(),
                    port: port.to_string(),
                    address: listener.routing_key.clone(),
                    site_id: self.site_id.clone(),
                    ssl_profile: listener.tls_credentials.clone(),
                    ..Default::default()
                }),
                kind => config.add_http_listener(HttpEndpoint {
                    name: name.clone(),
                    host: LISTENER_BIND_HOST.to_string(),
                    port: port.to_string(),
                    address: listener.routing_key.clone(),
                    site_id: self.site_id.clone(),
                    protocol_version: kind.protocol_version().to_string(),
                    ssl_profile: listener.tls_credentials.clone(),
                    ..Default::default()
                }),
            }
        }
        config
    }

    /// Add the profiles TLS bindings need. Connectors without a client
    /// certificate only trust the CA.
    pub fn add_ssl_profiles(&self, config: &mut RouterConfig) -> bool {
        let mut profiles: BTreeMap<String, SslProfile> = BTreeMap::new();
        for connector in self.connectors.values() {
            if connector.tls_credentials.is_empty() {
                continue;
            }
            let name = ssl_profile_name(&connector.tls_credentials, connector.use_client_cert);
            profiles.entry(name.clone()).or_insert_with(|| {
                SslProfile::configure(&name, &self.profile_path, connector.use_client_cert)
            });
        }
        for listener in self.listeners.values() {
            if listener.tls_credentials.is_empty() {
                continue;
            }
            profiles
                .entry(listener.tls_credentials.clone())
                .or_insert_with(|| SslProfile::configure(&listener.tls_credentials, &self.profile_path, true));
        }
        let mut changed = false;
        for profile in profiles.into_values() {
            changed |= config.add_ssl_profile(profile);
        }
        changed
    }

    /// Release every selection.
    pub fn close(&mut self) {
        for selection in self.selections.values_mut() {
            selection.close();
        }
        self.selections.clear();
    }
}

fn add_connector(
    config: &mut BridgeConfig,
    site_id: &str,
    name: &str,
    host: &str,
    connector: &ConnectorBinding,
    ssl_profile: &str,
) {
    match connector.kind {
        BindingKind::Tcp => config.add_tcp_connector(TcpEndpoint {
            name: name.to_string(),
            host: host.to_string(),
            port: connector.port.to_string(),
            address: connector.routing_key.clone(),
            site_id: site_id.to_string(),
            ssl_profile: ssl_profile.to_string(),
            ..Default::default()
        }),
        kind => config.add_http_connector(HttpEndpoint {
            name: name.to_string(),
            host: host.to_string(),
            port: connector.port.to_string(),
            address: connector.routing_key.clone(),
            site_id: site_id.to_string(),
            protocol_version: kind.protocol_version().to_string(),
            ssl_profile: ssl_profile.to_string(),
            ..Default::default()
        }),
    }
}

impl ConfigUpdate for Bindings {
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        let profiles_added = self.add_ssl_profiles(config);
        let bridges_changed = config.update_bridge_config(self.to_bridge_config());
        let profiles_removed = config.remove_unreferenced_ssl_profiles();
        profiles_added || bridges_changed || profiles_removed
    }
}

impl Drop for Bindings {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("site_id", &self.site_id)
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .field("selections", &self.selections.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::router::model::DEFAULT_CERT_PATH;

    #[derive(Default)]
    struct Recorded {
        exposed: Vec<ExposedPortSet>,
        unexposed: Vec<String>,
        closed: Vec<String>,
    }

    struct FixedSelection {
        selector: String,
        hosts: Arc<Mutex<Vec<String>>>,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl TargetSelection for FixedSelection {
        fn selector(&self) -> &str {
            &self.selector
        }

        fn list(&self) -> Vec<String> {
            self.hosts.lock().unwrap().clone()
        }

        fn close(&mut self) {
            self.recorded.lock().unwrap().closed.push(self.selector.clone());
        }
    }

    struct TestContext {
        hosts: Arc<Mutex<Vec<String>>>,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl BindingContext for TestContext {
        fn select(&mut self, connector: &ConnectorBinding) -> Box<dyn TargetSelection> {
            Box::new(FixedSelection {
                selector: connector.selector.clone(),
                hosts: self.hosts.clone(),
                recorded: self.recorded.clone(),
            })
        }

        fn expose(&mut self, ports: &ExposedPortSet) -> SiteResult<()> {
            self.recorded.lock().unwrap().exposed.push(ports.clone());
            Ok(())
        }

        fn unexpose(&mut self, host: &str) -> SiteResult<()> {
            self.recorded.lock().unwrap().unexposed.push(host.to_string());
            Ok(())
        }
    }

    fn context() -> (TestContext, Arc<Mutex<Vec<String>>>, Arc<Mutex<Recorded>>) {
        let hosts = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let ctx = TestContext {
            hosts: hosts.clone(),
            recorded: recorded.clone(),
        };
        (ctx, hosts, recorded)
    }

    fn tcp_connector(name: &str, host: &str) -> ConnectorBinding {
        ConnectorBinding {
            name: name.into(),
            routing_key: format!("{}-key", name),
            host: host.into(),
            port: 8080,
            ..Default::default()
        }
    }

    fn listener(name: &str, host: &str) -> ListenerBinding {
        ListenerBinding {
            name: name.into(),
            routing_key: format!("{}-key", name),
            host: host.into(),
            port: 9090,
            ..Default::default()
        }
    }

    #[test]
    fn test_unchanged_connector_yields_no_update() {
        let mut bindings = Bindings::new("site-1", DEFAULT_CERT_PATH);
        assert!(bindings.update_connector("db", Some(tcp_connector("db", "10.0.0.1"))).is_some());
        assert!(bindings.update_connector("db", Some(tcp_connector("db", "10.0.0.1"))).is_none());
        assert!(bindings.update_connector("db", None).is_some());
        assert!(bindings.update_connector("db", None).is_none());
    }

    #[test]
    fn test_host_connector_bridge_config() {
        let mut bindings = Bindings::new("site-1", DEFAULT_CERT_PATH);
        let mut web = tcp_connector("web", "web.local");
        web.kind = BindingKind::Http2;
        bindings.update_connector("db", Some(tcp_connector("db", "10.0.0.1")));
        bindings.update_connector("web", Some(web));

        let bridges = bindings.to_bridge_config();
        let db = &bridges.tcp_connectors["db"];
        assert_eq!(db.host, "10.0.0.1");
        assert_eq!(db.port, "8080");
        assert_eq!(db.address, "db-key");
        assert_eq!(db.site_id, "site-1");
        assert!(bridges.http_connectors["web"].is_http2());
    }

    #[test]
    fn test_selector_connector_waits_for_targets() {
        let (ctx, hosts, recorded) = context();
        let mut bindings = Bindings::new("site-1", DEFAULT_CERT_PATH).with_context(Box::new(ctx));
        let mut backend = tcp_connector("backend", "");
        backend.selector = "app=backend".into();

        assert!(bindings.update_connector("backend", Some(backend.clone())).is_none());
        assert!(bindings.to_bridge_config().tcp_connectors.is_empty());

        hosts.lock().unwrap().extend(["10.1.0.4".to_string(), "10.1.0.5".to_string()]);
        let update = bindings.targets_changed("backend").unwrap();
        let bridges = update.to_bridge_config();
        assert!(bridges.tcp_connectors.contains_key("backend_10.1.0.4"));
        assert!(bridges.tcp_connectors.contains_key("backend_10.1.0.5"));

        backend.selector = "app=other".into();
        assert!(bindings.update_connector("backend", Some(backend)).is_none());
        assert_eq!(recorded.lock().unwrap().closed, vec!["app=backend".to_string()]);

        bindings.update_connector("backend", None);
        assert_eq!(recorded.lock().unwrap().closed.len(), 2);
        assert!(bindings.targets_changed("backend").is_none());
    }

    #[test]
    fn test_listener_ports_and_exposure() {
        let (ctx, _, recorded) = context();
        let mut bindings = Bindings::new("site-1", DEFAULT_CERT_PATH).with_context(Box::new(ctx));
        bindings.update_listener("a", Some(listener("a", "backend")));
        bindings.update_listener("b", Some(listener("b", "backend")));

        let bridges = bindings.to_bridge_config();
        assert_eq!(bridges.tcp_listeners["a"].port, "1024");
        assert_eq!(bridges.tcp_listeners["b"].port, "1025");
        assert_eq!(bridges.tcp_listeners["a"].host, "0.0.0.0");
        assert_eq!(recorded.lock().unwrap().exposed.len(), 2);

        bindings.update_listener("a", None);
        assert_eq!(bindings.port_mapping().port_for_key("a"), None);
        bindings.update_listener("b", None);
        assert_eq!(recorded.lock().unwrap().unexposed, vec!["backend".to_string()]);
        assert!(!bindings.exposed().is_exposed("backend"));
    }

    #[test]
    fn test_listener_host_change_moves_exposure() {
        let (ctx, _, recorded) = context();
        let mut bindings = Bindings::new("site-1", DEFAULT_CERT_PATH).with_context(Box::new(ctx));
        bindings.update_listener("a", Some(listener("a", "old")));
        bindings.update_listener("a", Some(listener("a", "new")));

        assert!(!bindings.exposed().is_exposed("old"));
        assert!(bindings.exposed().is_exposed("new"));
        assert_eq!(recorded.lock().unwrap().unexposed, vec!["old".to_string()]);
        assert_eq!(bindings.port_mapping().port_for_key("a"), Some(1024));
    }

    #[test]
    fn test_recovered_ports_are_reused() {
        let mut live = RouterConfig::default();
        live.bridges.add_tcp_listener(TcpEndpoint {
            name: "a".into(),
            port: "1030".into(),
            address: "a-key".into(),
            ..Default::default()
        });
        let mut bindings = Bindings::new("site-1", DEFAULT_CERT_PATH);
        bindings.recover(&live);
        bindings.update_listener("a", Some(listener("a", "backend")));
        bindings.update_listener("b", Some(listener("b", "backend")));

        let bridges = bindings.to_bridge_config();
        assert_eq!(bridges.tcp_listeners["a"].port, "1030");
        assert_eq!(bridges.tcp_listeners["b"].port, "1024");
    }

    #[test]
    fn test_apply_manages_tls_profiles() {
        let mut bindings = Bindings::new("site-1", DEFAULT_CERT_PATH);
        let mut db = tcp_connector("db", "10.0.0.1");
        db.tls_credentials = "db-tls".into();
        let mut api = tcp_connector("api", "10.0.0.2");
        api.tls_credentials = "api-tls".into();
        api.use_client_cert = true;
        let mut front = listener("front", "frontend");
        front.tls_credentials = "front-tls".into();

        bindings.update_connector("db", Some(db));
        bindings.update_connector("api", Some(api));
        bindings.update_listener("front", Some(front));

        let mut config = RouterConfig::default();
        assert!(bindings.apply(&mut config));
        assert!(config.ssl_profiles["db-tls-profile"].is_ca_only());
        assert!(!config.ssl_profiles["api-tls"].is_ca_only());
        assert!(!config.ssl_profiles["front-tls"].is_ca_only());
        assert_eq!(config.bridges.tcp_connectors["db"].ssl_profile, "db-tls-profile");

        assert!(!bindings.apply(&mut config));

        bindings.update_connector("db", None);
        assert!(bindings.apply(&mut config));
        assert!(!config.ssl_profiles.contains_key("db-tls-profile"));
    }
}
