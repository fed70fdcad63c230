//! Router entities and configuration-level mutation helpers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::router::bridge::{BridgeConfig, Endpoint};

/// Attributes carried through unchanged because the model does not name them.
pub type Extra = BTreeMap<String, serde_json::Value>;

/// Profile shared by every TLS-enabled HTTP/2 connector; only its CA is synced.
pub const SERVICE_CLIENT_PROFILE: &str = "skupper-service-client";

/// Prefix of profiles generated for exposed services.
pub const GENERATED_PROFILE_PREFIX: &str = "skupper-tls-";

/// Default directory the router reads certificates from.
pub const DEFAULT_CERT_PATH: &str = "/etc/skupper-router-certs";

const PROTECTED_LISTENERS: [&str; 3] = ["@9090", "amqp", "amqps"];

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

pub(crate) fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// Role of a listener or connector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    #[default]
    Unspecified,
    Normal,
    InterRouter,
    Edge,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Unspecified => "",
            Role::Normal => "normal",
            Role::InterRouter => "inter-router",
            Role::Edge => "edge",
            Role::Other(value) => value,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, Role::Unspecified)
    }

    /// Roles used for site-to-site links.
    pub fn is_link(&self) -> bool {
        matches!(self, Role::InterRouter | Role::Edge)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" => Role::Unspecified,
            "normal" => Role::Normal,
            "inter-router" => Role::InterRouter,
            "edge" => Role::Edge,
            _ => Role::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Interior,
    Edge,
}

/// Identity of the site a router belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl SiteMetadata {
    /// Parse the router `metadata` attribute.
    ///
    /// Older routers store the bare site id instead of a JSON object.
    pub fn parse(metadata: &str) -> Self {
        match serde_json::from_str::<SiteMetadata>(metadata) {
            Ok(site) => site,
            Err(e) => {
                tracing::debug!(metadata = %metadata, error = %e, "Assuming plain site id in router metadata");
                SiteMetadata {
                    id: metadata.to_string(),
                    version: String::new(),
                }
            }
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The `router` entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub mode: Mode,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hello_max_age_seconds: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data_connection_count: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Named bundle of certificate file paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SslProfile {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cert_file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key_file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca_cert_file: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl SslProfile {
    /// Build the conventional profile rooted at `{path}/{name}/`.
    ///
    /// Without client auth only the CA is referenced.
    pub fn configure(name: &str, path: &str, client_auth: bool) -> Self {
        let base = format!("{}/{}", path.trim_end_matches('/'), name);
        let mut profile = SslProfile {
            name: name.to_string(),
            ca_cert_file: format!("{}/ca.crt", base),
            ..Default::default()
        };
        if client_auth {
            profile.cert_file = format!("{}/tls.crt", base);
            profile.private_key_file = format!("{}/tls.key", base);
        }
        profile
    }

    /// True when the profile only trusts a CA and carries no key pair.
    pub fn is_ca_only(&self) -> bool {
        self.name == SERVICE_CLIENT_PROFILE
            || (self.cert_file.is_empty() && self.private_key_file.is_empty())
    }
}

/// The `log` entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub module: String,
    pub enable: String,
}

/// Inbound router endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Listener {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Role::is_unspecified")]
    pub role: Role,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    pub port: i32,
    #[serde(skip_serializing_if = "is_false")]
    pub route_container: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub http: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub cost: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_profile: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sasl_mechanisms: String,
    #[serde(skip_serializing_if = "is_false")]
    pub authenticate_peer: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub link_capacity: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http_root_dir: String,
    #[serde(skip_serializing_if = "is_false")]
    pub websockets: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub healthz: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub metrics: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub max_frame_size: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub max_session_frames: i32,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Listener {
    /// Compare a desired listener against the live one.
    ///
    /// Tuning attributes only count when the desired side sets them.
    /// Websockets, healthz and metrics are always reported as enabled by
    /// the router and are not compared.
    pub fn equivalent(&self, actual: &Listener) -> bool {
        self.name == actual.name
            && self.role == actual.role
            && self.host == actual.host
            && self.port == actual.port
            && self.route_container == actual.route_container
            && self.http == actual.http
            && self.ssl_profile == actual.ssl_profile
            && self.sasl_mechanisms == actual.sasl_mechanisms
            && self.authenticate_peer == actual.authenticate_peer
            && (self.cost == 0 || self.cost == actual.cost)
            && (self.max_frame_size == 0 || self.max_frame_size == actual.max_frame_size)
            && (self.max_session_frames == 0 || self.max_session_frames == actual.max_session_frames)
            && (self.link_capacity == 0 || self.link_capacity == actual.link_capacity)
            && (self.http_root_dir.is_empty() || self.http_root_dir == actual.http_root_dir)
    }
}

/// Outbound router endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Connector {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Role::is_unspecified")]
    pub role: Role,
    pub host: String,
    pub port: String,
    #[serde(skip_serializing_if = "is_false")]
    pub route_container: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub cost: i32,
    #[serde(skip_serializing_if = "is_false")]
    pub verify_hostname: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_profile: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub link_capacity: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub max_frame_size: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub max_session_frames: i32,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Connector {
    /// Attributes that force a connector to be recreated when they change.
    pub fn equivalent(&self, actual: &Connector) -> bool {
        self.name == actual.name
            && self.role == actual.role
            && self.host == actual.host
            && self.port == actual.port
            && self.cost == actual.cost
            && self.ssl_profile == actual.ssl_profile
    }
}

/// Distribution policy for an address prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub distribution: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A change that can be folded into a router configuration.
pub trait ConfigUpdate {
    /// Apply the change, returning true if the configuration was modified.
    fn apply(&mut self, config: &mut RouterConfig) -> bool;
}

impl<F> ConfigUpdate for F
where
    F: FnMut(&mut RouterConfig) -> bool,
{
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        self(config)
    }
}

/// Removes a connector and any profile it leaves unreferenced.
#[derive(Debug, Clone)]
pub struct RemoveConnector {
    pub name: String,
}

impl ConfigUpdate for RemoveConnector {
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        match config.remove_connector(&self.name) {
            Some(removed) => {
                if !removed.ssl_profile.is_empty()
                    && !config.referenced_ssl_profiles().contains(&removed.ssl_profile)
                {
                    config.remove_ssl_profile(&removed.ssl_profile);
                }
                true
            }
            None => false,
        }
    }
}

/// Full configuration of one router.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterConfig {
    pub metadata: RouterMetadata,
    pub ssl_profiles: BTreeMap<String, SslProfile>,
    pub listeners: BTreeMap<String, Listener>,
    pub connectors: BTreeMap<String, Connector>,
    pub addresses: BTreeMap<String, Address>,
    pub log_config: BTreeMap<String, LogConfig>,
    pub bridges: BridgeConfig,
}

impl RouterConfig {
    /// Initial configuration for a freshly created router.
    pub fn new(id: &str, site: &SiteMetadata, mode: Mode, hello_max_age_secs: u32) -> Self {
        Self {
            metadata: RouterMetadata {
                id: id.to_string(),
                mode,
                hello_max_age_seconds: hello_max_age_secs.to_string(),
                metadata: site.encode(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn is_edge(&self) -> bool {
        self.metadata.mode == Mode::Edge
    }

    pub fn site_metadata(&self) -> SiteMetadata {
        SiteMetadata::parse(&self.metadata.metadata)
    }

    pub fn set_site_metadata(&mut self, site: &SiteMetadata) {
        self.metadata.metadata = site.encode();
    }

    /// Add or replace a listener; unnamed listeners are named `host@port`.
    pub fn add_listener(&mut self, mut listener: Listener) -> bool {
        if listener.name.is_empty() {
            listener.name = format!("{}@{}", listener.host, listener.port);
        }
        if self.listeners.get(&listener.name) == Some(&listener) {
            return false;
        }
        self.listeners.insert(listener.name.clone(), listener);
        true
    }

    pub fn remove_listener(&mut self, name: &str) -> Option<Listener> {
        self.listeners.remove(name)
    }

    pub fn add_connector(&mut self, connector: Connector) -> bool {
        if self.connectors.get(&connector.name) == Some(&connector) {
            return false;
        }
        self.connectors.insert(connector.name.clone(), connector);
        true
    }

    pub fn remove_connector(&mut self, name: &str) -> Option<Connector> {
        self.connectors.remove(name)
    }

    pub fn add_ssl_profile(&mut self, profile: SslProfile) -> bool {
        if self.ssl_profiles.get(&profile.name) == Some(&profile) {
            return false;
        }
        self.ssl_profiles.insert(profile.name.clone(), profile);
        true
    }

    pub fn remove_ssl_profile(&mut self, name: &str) -> Option<SslProfile> {
        self.ssl_profiles.remove(name)
    }

    pub fn add_address(&mut self, address: Address) -> bool {
        if self.addresses.get(&address.prefix) == Some(&address) {
            return false;
        }
        self.addresses.insert(address.prefix.clone(), address);
        true
    }

    /// Replace the bridge section if it differs from `desired`.
    pub fn update_bridge_config(&mut self, desired: BridgeConfig) -> bool {
        if self.bridges == desired {
            return false;
        }
        self.bridges = desired;
        true
    }

    /// Set the level for one log module. An empty module means `DEFAULT`.
    pub fn set_log_level(&mut self, module: &str, level: &str) -> bool {
        if level.is_empty() {
            return false;
        }
        let module = if module.is_empty() { "DEFAULT" } else { module };
        let enable = if level.ends_with('+') {
            level.to_string()
        } else {
            format!("{}+", level)
        };
        let config = LogConfig {
            module: module.to_string(),
            enable,
        };
        if self.log_config.get(module) == Some(&config) {
            return false;
        }
        self.log_config.insert(module.to_string(), config);
        true
    }

    /// Set every level in `levels` and drop modules not mentioned.
    pub fn set_log_levels(&mut self, levels: &BTreeMap<String, String>) -> bool {
        let keep: BTreeSet<String> = levels
            .keys()
            .map(|k| if k.is_empty() { "DEFAULT".to_string() } else { k.clone() })
            .collect();
        let mut changed = false;
        for (module, level) in levels {
            if self.set_log_level(module, level) {
                changed = true;
            }
        }
        let before = self.log_config.len();
        self.log_config.retain(|module, _| keep.contains(module));
        changed || before != self.log_config.len()
    }

    /// Names of every profile referenced by a listener, connector or bridge endpoint.
    pub fn referenced_ssl_profiles(&self) -> BTreeSet<String> {
        let mut referenced: BTreeSet<String> = self
            .listeners
            .values()
            .map(|l| l.ssl_profile.as_str())
            .chain(self.connectors.values().map(|c| c.ssl_profile.as_str()))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        referenced.extend(self.bridges.referenced_ssl_profiles());
        referenced
    }

    /// Profiles no entity refers to.
    pub fn unreferenced_ssl_profiles(&self) -> BTreeMap<String, SslProfile> {
        let referenced = self.referenced_ssl_profiles();
        self.ssl_profiles
            .iter()
            .filter(|(name, _)| !referenced.contains(*name))
            .map(|(name, profile)| (name.clone(), profile.clone()))
            .collect()
    }

    pub fn remove_unreferenced_ssl_profiles(&mut self) -> bool {
        let unreferenced = self.unreferenced_ssl_profiles();
        for name in unreferenced.keys() {
            self.ssl_profiles.remove(name);
        }
        !unreferenced.is_empty()
    }

    pub fn matching_listeners<P>(&self, predicate: P) -> BTreeMap<String, Listener>
    where
        P: Fn(&Listener) -> bool,
    {
        filter_listeners(&self.listeners, predicate)
    }
}

/// Listeners that belong to the router's own bootstrap configuration.
pub fn is_not_protected_listener(listener: &Listener) -> bool {
    !PROTECTED_LISTENERS.contains(&listener.name.as_str())
}

pub fn filter_listeners<P>(listeners: &BTreeMap<String, Listener>, predicate: P) -> BTreeMap<String, Listener>
where
    P: Fn(&Listener) -> bool,
{
    listeners
        .iter()
        .filter(|(_, l)| predicate(l))
        .map(|(k, l)| (k.clone(), l.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::bridge::TcpEndpoint;

    fn profile(name: &str) -> SslProfile {
        SslProfile::configure(name, DEFAULT_CERT_PATH, true)
    }

    #[test]
    fn test_unnamed_listener_gets_host_port_name() {
        let mut config = RouterConfig::default();
        assert!(config.add_listener(Listener {
            host: "0.0.0.0".into(),
            port: 5671,
            ..Default::default()
        }));
        let existing = config.listeners["0.0.0.0@5671"].clone();
        assert!(!config.add_listener(existing));
    }

    #[test]
    fn test_configure_ssl_profile() {
        let p = SslProfile::configure("link1-profile", "/certs/", false);
        assert_eq!(p.ca_cert_file, "/certs/link1-profile/ca.crt");
        assert!(p.cert_file.is_empty());
        assert!(p.is_ca_only());

        let p = SslProfile::configure("link1-profile", "/certs", true);
        assert_eq!(p.private_key_file, "/certs/link1-profile/tls.key");
        assert!(!p.is_ca_only());
    }

    #[test]
    fn test_set_log_level() {
        let mut config = RouterConfig::default();
        assert!(config.set_log_level("", "info"));
        assert_eq!(config.log_config["DEFAULT"].enable, "info+");
        assert!(!config.set_log_level("DEFAULT", "info+"));
        assert!(!config.set_log_level("ROUTER", ""));
    }

    #[test]
    fn test_set_log_levels_removes_unlisted_modules() {
        let mut config = RouterConfig::default();
        config.set_log_level("ROUTER", "debug");
        config.set_log_level("", "info");

        let mut levels = BTreeMap::new();
        levels.insert(String::new(), "info".to_string());
        assert!(config.set_log_levels(&levels));
        assert_eq!(config.log_config.len(), 1);
        assert!(!config.set_log_levels(&levels));
    }

    #[test]
    fn test_unreferenced_profiles_consider_every_category() {
        let mut config = RouterConfig::default();
        for name in ["used-by-listener", "used-by-connector", "used-by-bridge", "unused"] {
            config.add_ssl_profile(profile(name));
        }
        config.add_listener(Listener {
            name: "l".into(),
            ssl_profile: "used-by-listener".into(),
            ..Default::default()
        });
        config.add_connector(Connector {
            name: "c".into(),
            ssl_profile: "used-by-connector".into(),
            ..Default::default()
        });
        config.bridges.add_tcp_connector(TcpEndpoint {
            name: "b".into(),
            ssl_profile: "used-by-bridge".into(),
            ..Default::default()
        });

        let unreferenced = config.unreferenced_ssl_profiles();
        assert_eq!(unreferenced.keys().collect::<Vec<_>>(), vec!["unused"]);

        assert!(config.remove_unreferenced_ssl_profiles());
        assert_eq!(config.ssl_profiles.len(), 3);
        assert!(!config.remove_unreferenced_ssl_profiles());
    }

    #[test]
    fn test_remove_connector_drops_orphaned_profile() {
        let mut config = RouterConfig::default();
        config.add_ssl_profile(profile("link1-profile"));
        config.add_connector(Connector {
            name: "link1".into(),
            role: Role::InterRouter,
            host: "remote".into(),
            port: "55671".into(),
            ssl_profile: "link1-profile".into(),
            ..Default::default()
        });

        let mut update = RemoveConnector { name: "link1".into() };
        assert!(update.apply(&mut config));
        assert!(config.connectors.is_empty());
        assert!(config.ssl_profiles.is_empty());
        assert!(!update.apply(&mut config));
    }

    #[test]
    fn test_protected_listeners_are_filtered() {
        let mut config = RouterConfig::default();
        for name in ["amqp", "amqps", "@9090", "site-listener"] {
            config.add_listener(Listener {
                name: name.into(),
                ..Default::default()
            });
        }
        let owned = config.matching_listeners(is_not_protected_listener);
        assert_eq!(owned.keys().collect::<Vec<_>>(), vec!["site-listener"]);
    }

    #[test]
    fn test_site_metadata_fallback() {
        let site = SiteMetadata::parse("plain-site-id");
        assert_eq!(site.id, "plain-site-id");

        let mut config = RouterConfig::new(
            "router-1",
            &SiteMetadata { id: "s1".into(), version: "1.4".into() },
            Mode::Edge,
            3,
        );
        assert!(config.is_edge());
        assert_eq!(config.site_metadata().version, "1.4");
        config.set_site_metadata(&SiteMetadata { id: "s2".into(), version: String::new() });
        assert_eq!(config.site_metadata().id, "s2");
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::from("inter-router"), Role::InterRouter);
        assert_eq!(Role::from("route-container"), Role::Other("route-container".into()));
        assert_eq!(String::from(Role::Edge), "edge");
        assert!(Role::Edge.is_link());
        assert!(!Role::Normal.is_link());
    }
}
