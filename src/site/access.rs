//! Listeners that let other sites and clients reach this router.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::router::{ConfigUpdate, Connector, Listener, Role, RouterConfig, SslProfile};

const SASL_EXTERNAL: &str = "EXTERNAL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessRole {
    pub name: String,
    pub port: i32,
}

/// Definition of how a router is reached: one listener per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterAccess {
    pub name: String,
    pub roles: Vec<AccessRole>,
    pub tls_credentials: String,
    pub bind_host: String,
}

/// Listeners (and inter-router connectors to peer groups) derived from
/// router access definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterAccessConfig {
    listeners: BTreeMap<String, Listener>,
    connectors: Vec<Connector>,
    profile_path: String,
}

impl RouterAccessConfig {
    pub fn new(profile_path: &str) -> Self {
        Self {
            profile_path: profile_path.to_string(),
            ..Default::default()
        }
    }

    /// Build the desired listeners for `accesses`. Inter-router roles also
    /// connect to every member of `target_groups`.
    pub fn desired<'a, I>(accesses: I, target_groups: &[String], profile_path: &str) -> Self
    where
        I: IntoIterator<Item = &'a RouterAccess>,
    {
        let mut config = Self::new(profile_path);
        for access in accesses {
            for role in &access.roles {
                let name = format!("{}-{}", access.name, role.name);
                config.listeners.insert(
                    name.clone(),
                    Listener {
                        name,
                        role: Role::from(role.name.as_str()),
                        host: access.bind_host.clone(),
                        port: role.port,
                        ssl_profile: access.tls_credentials.clone(),
                        sasl_mechanisms: SASL_EXTERNAL.to_string(),
                        authenticate_peer: true,
                        ..Default::default()
                    },
                );
                if Role::from(role.name.as_str()) == Role::InterRouter {
                    for group in target_groups {
                        config.connectors.push(Connector {
                            name: group.clone(),
                            role: Role::InterRouter,
                            host: group.clone(),
                            port: role.port.to_string(),
                            cost: 1,
                            ssl_profile: access.tls_credentials.clone(),
                            ..Default::default()
                        });
                    }
                }
            }
        }
        config
    }

    pub fn add_listener(&mut self, listener: Listener) {
        self.listeners.insert(listener.name.clone(), listener);
    }

    pub fn add_connector(&mut self, connector: Connector) {
        self.connectors.push(connector);
    }

    pub fn listeners(&self) -> &BTreeMap<String, Listener> {
        &self.listeners
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    fn ensure_profile(&self, config: &mut RouterConfig, name: &str) -> bool {
        if name.is_empty() || config.ssl_profiles.contains_key(name) {
            return false;
        }
        config.add_ssl_profile(SslProfile::configure(name, &self.profile_path, true))
    }
}

impl ConfigUpdate for RouterAccessConfig {
    /// Add every desired listener and connector with its profile, and drop
    /// link listeners no access definition asks for anymore.
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        let mut changed = false;
        let mut profiles = BTreeSet::new();

        for listener in self.listeners.values() {
            changed |= config.add_listener(listener.clone());
            profiles.insert(listener.ssl_profile.clone());
        }
        for connector in &self.connectors {
            changed |= config.add_connector(connector.clone());
            profiles.insert(connector.ssl_profile.clone());
        }
        for profile in &profiles {
            changed |= self.ensure_profile(config, profile);
        }

        let stale: Vec<String> = config
            .listeners
            .values()
            .filter(|l| l.role.is_link() && !self.listeners.contains_key(&l.name))
            .map(|l| l.name.clone())
            .collect();
        for name in stale {
            tracing::info!(listener = %name, "Removing listener no longer granted access");
            config.remove_listener(&name);
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(name: &str, role: Role, profile: &str) -> Listener {
        Listener {
            name: name.into(),
            role,
            host: "10.10.10.1".into(),
            port: 9090,
            ssl_profile: profile.into(),
            ..Default::default()
        }
    }

    fn skupper_profile() -> SslProfile {
        SslProfile {
            name: "skupper".into(),
            cert_file: "/etc/skupper/skupper/tls.crt".into(),
            private_key_file: "/etc/skupper/skupper/tls.key".into(),
            ca_cert_file: "/etc/skupper/skupper/ca.crt".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_access_is_noop() {
        let mut access = RouterAccessConfig::new("");
        assert!(!access.apply(&mut RouterConfig::default()));
    }

    #[test]
    fn test_listener_added_once() {
        let mut access = RouterAccessConfig::new("/etc/skupper/skupper");
        access.add_listener(listener("listener1", Role::Normal, "skupper"));

        let mut config = RouterConfig::default();
        config.add_ssl_profile(skupper_profile());
        assert!(access.apply(&mut config));
        assert_eq!(config.ssl_profiles["skupper"], skupper_profile());
        assert!(!access.apply(&mut config));
    }

    #[test]
    fn test_missing_profile_is_created() {
        let mut access = RouterAccessConfig::new("/etc/skupper");
        access.add_listener(listener("listener1", Role::Normal, "skupper-other"));

        let mut config = RouterConfig::default();
        assert!(access.apply(&mut config));
        assert_eq!(
            config.ssl_profiles["skupper-other"].cert_file,
            "/etc/skupper/skupper-other/tls.crt"
        );
    }

    #[test]
    fn test_stale_link_listener_removed() {
        let mut access = RouterAccessConfig::new("");
        let mut config = RouterConfig::default();
        config.add_listener(listener("listener1", Role::InterRouter, "skupper"));
        config.add_listener(listener("amqp", Role::Normal, ""));

        assert!(access.apply(&mut config));
        assert!(!config.listeners.contains_key("listener1"));
        assert!(config.listeners.contains_key("amqp"));
    }

    #[test]
    fn test_connector_same_and_different() {
        let connector = |name: &str, host: &str| Connector {
            name: name.into(),
            role: Role::Normal,
            host: host.into(),
            port: "9090".into(),
            ssl_profile: "skupper".into(),
            ..Default::default()
        };
        let mut access = RouterAccessConfig::new("/etc/skupper/skupper");
        access.add_connector(connector("connector1", "10.10.10.1"));

        let mut config = RouterConfig::default();
        config.add_ssl_profile(skupper_profile());
        config.add_connector(connector("connector1", "10.10.10.1"));
        assert!(!access.apply(&mut config));

        let mut other = RouterAccessConfig::new("/etc/skupper/skupper");
        other.add_connector(connector("connector2", "10.10.10.2"));
        assert!(other.apply(&mut config));
    }

    #[test]
    fn test_desired_from_access_definitions() {
        let access = RouterAccess {
            name: "my-ra".into(),
            roles: vec![AccessRole {
                name: "inter-router".into(),
                port: 55671,
            }],
            tls_credentials: "skupper".into(),
            bind_host: "10.10.10.1".into(),
        };
        let groups = vec!["my-target-group".to_string()];
        let desired = RouterAccessConfig::desired([&access], &groups, "");

        let listener = &desired.listeners()["my-ra-inter-router"];
        assert_eq!(listener.role, Role::InterRouter);
        assert_eq!(listener.port, 55671);
        assert_eq!(listener.sasl_mechanisms, "EXTERNAL");
        assert!(listener.authenticate_peer);
        assert_eq!(desired.connectors().len(), 1);
        assert_eq!(desired.connectors()[0].port, "55671");
        assert_eq!(desired.connectors()[0].cost, 1);

        let edge = RouterAccess {
            roles: vec![AccessRole {
                name: "edge".into(),
                port: 45671,
            }],
            ..access
        };
        let desired = RouterAccessConfig::desired([&edge], &groups, "");
        assert!(desired.listeners().contains_key("my-ra-edge"));
        assert!(desired.connectors().is_empty());
    }
}
