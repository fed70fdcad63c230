//! Differences between actual and desired router state.
//!
//! Every category is compared independently. A changed entry is expressed
//! as a delete followed by an add so the same difference can be pushed
//! over the management protocol, which has no in-place update for most
//! entity types.

use std::collections::{BTreeMap, BTreeSet};

use crate::router::bridge::{BridgeConfig, Endpoint, HttpEndpoint, TcpEndpoint};
use crate::router::model::{
    Connector, Listener, RouterConfig, SslProfile, GENERATED_PROFILE_PREFIX, SERVICE_CLIENT_PROFILE,
};

/// Added and deleted entries for one bridge endpoint map.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDifference<E> {
    pub added: Vec<E>,
    pub deleted: Vec<String>,
}

impl<E> Default for EndpointDifference<E> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<E: Endpoint> EndpointDifference<E> {
    pub fn compute(actual: &BTreeMap<String, E>, desired: &BTreeMap<String, E>) -> Self {
        let mut result = Self::default();
        for (key, wanted) in desired {
            match actual.get(key) {
                None => result.added.push(wanted.clone()),
                Some(live) if !wanted.equivalent(live) => {
                    result.deleted.push(key.clone());
                    result.added.push(wanted.clone());
                }
                Some(_) => {}
            }
        }
        for key in actual.keys() {
            if !desired.contains_key(key) {
                result.deleted.push(key.clone());
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }

    pub fn apply(&self, actual: &mut BTreeMap<String, E>) {
        for name in &self.deleted {
            actual.remove(name);
        }
        for endpoint in &self.added {
            actual.insert(endpoint.name().to_string(), endpoint.clone());
        }
    }

    fn added_names(&self) -> Vec<&str> {
        self.added.iter().map(|e| e.name()).collect()
    }
}

/// Difference between two bridge configurations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeConfigDifference {
    pub tcp_listeners: EndpointDifference<TcpEndpoint>,
    pub tcp_connectors: EndpointDifference<TcpEndpoint>,
    pub http_listeners: EndpointDifference<HttpEndpoint>,
    pub http_connectors: EndpointDifference<HttpEndpoint>,
    /// Profiles newly referenced by bridge endpoints.
    pub added_ssl_profiles: Vec<String>,
    /// Generated profiles no endpoint references any more.
    pub deleted_ssl_profiles: Vec<String>,
}

fn is_generated_profile(name: &str) -> bool {
    name.starts_with(GENERATED_PROFILE_PREFIX) && name != SERVICE_CLIENT_PROFILE
}

impl BridgeConfig {
    /// Compute what must change to turn `self` (actual) into `desired`.
    pub fn difference(&self, desired: &BridgeConfig) -> BridgeConfigDifference {
        let before = self.referenced_ssl_profiles();
        let after = desired.referenced_ssl_profiles();

        BridgeConfigDifference {
            tcp_listeners: EndpointDifference::compute(&self.tcp_listeners, &desired.tcp_listeners),
            tcp_connectors: EndpointDifference::compute(&self.tcp_connectors, &desired.tcp_connectors),
            http_listeners: EndpointDifference::compute(&self.http_listeners, &desired.http_listeners),
            http_connectors: EndpointDifference::compute(&self.http_connectors, &desired.http_connectors),
            added_ssl_profiles: after
                .difference(&before)
                .filter(|name| name.as_str() != SERVICE_CLIENT_PROFILE)
                .cloned()
                .collect(),
            deleted_ssl_profiles: before
                .difference(&after)
                .filter(|name| is_generated_profile(name))
                .cloned()
                .collect(),
        }
    }
}

impl BridgeConfigDifference {
    pub fn is_empty(&self) -> bool {
        self.tcp_listeners.is_empty()
            && self.tcp_connectors.is_empty()
            && self.http_listeners.is_empty()
            && self.http_connectors.is_empty()
    }

    pub fn apply(&self, actual: &mut BridgeConfig) {
        self.tcp_listeners.apply(&mut actual.tcp_listeners);
        self.tcp_connectors.apply(&mut actual.tcp_connectors);
        self.http_listeners.apply(&mut actual.http_listeners);
        self.http_connectors.apply(&mut actual.http_connectors);
    }

    pub fn log(&self) {
        tracing::info!(
            added = ?self.tcp_connectors.added_names(),
            deleted = ?self.tcp_connectors.deleted,
            "TCP connectors differ"
        );
        tracing::info!(
            added = ?self.tcp_listeners.added_names(),
            deleted = ?self.tcp_listeners.deleted,
            "TCP listeners differ"
        );
        tracing::info!(
            added = ?self.http_connectors.added_names(),
            deleted = ?self.http_connectors.deleted,
            "HTTP connectors differ"
        );
        tracing::info!(
            added = ?self.http_listeners.added_names(),
            deleted = ?self.http_listeners.deleted,
            "HTTP listeners differ"
        );
        tracing::info!(
            added = ?self.added_ssl_profiles,
            deleted = ?self.deleted_ssl_profiles,
            "Bridge SSL profiles differ"
        );
    }
}

/// Connector changes plus the profiles new connectors depend on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorDifference {
    pub added: Vec<Connector>,
    pub deleted: Vec<Connector>,
    pub added_ssl_profiles: BTreeMap<String, SslProfile>,
}

impl ConnectorDifference {
    /// Compare live connectors against the desired configuration.
    ///
    /// Connectors are recreated when their addressing changes. Live
    /// connectors whose name starts with `ignore_prefix` belong to another
    /// subsystem and are never deleted.
    pub fn compute(
        actual: &BTreeMap<String, Connector>,
        desired: &RouterConfig,
        ignore_prefix: Option<&str>,
    ) -> Self {
        let mut result = Self::default();
        for (key, wanted) in &desired.connectors {
            match actual.get(key) {
                None => {
                    result.added.push(wanted.clone());
                    if let Some(profile) = desired.ssl_profiles.get(&wanted.ssl_profile) {
                        result
                            .added_ssl_profiles
                            .insert(profile.name.clone(), profile.clone());
                    }
                }
                Some(live) if !wanted.equivalent(live) => {
                    result.deleted.push(wanted.clone());
                    result.added.push(wanted.clone());
                }
                Some(_) => {}
            }
        }
        for (key, live) in actual {
            let owned_elsewhere = ignore_prefix
                .filter(|prefix| !prefix.is_empty())
                .map(|prefix| live.name.starts_with(prefix))
                .unwrap_or(false);
            if !desired.connectors.contains_key(key) && !owned_elsewhere {
                result.deleted.push(live.clone());
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }

    pub fn apply(&self, actual: &mut BTreeMap<String, Connector>) {
        for connector in &self.deleted {
            actual.remove(&connector.name);
        }
        for connector in &self.added {
            actual.insert(connector.name.clone(), connector.clone());
        }
    }
}

/// Listener changes for the listeners a control path owns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListenerDifference {
    pub added: Vec<Listener>,
    pub deleted: Vec<Listener>,
}

impl ListenerDifference {
    /// Both maps must already be filtered down to the owned listeners.
    pub fn compute(actual: &BTreeMap<String, Listener>, desired: &BTreeMap<String, Listener>) -> Self {
        let mut result = Self::default();
        for (key, wanted) in desired {
            match actual.get(key) {
                None => result.added.push(wanted.clone()),
                Some(live) if !wanted.equivalent(live) => {
                    tracing::info!(listener = %key, "Listener definition does not match");
                    result.deleted.push(wanted.clone());
                    result.added.push(wanted.clone());
                }
                Some(_) => {}
            }
        }
        for (key, live) in actual {
            if !desired.contains_key(key) {
                result.deleted.push(live.clone());
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }

    pub fn apply(&self, actual: &mut BTreeMap<String, Listener>) {
        for listener in &self.deleted {
            actual.remove(&listener.name);
        }
        for listener in &self.added {
            actual.insert(listener.name.clone(), listener.clone());
        }
    }
}

/// Profiles to register on, or remove from, the live router.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SslProfileDifference {
    pub added: Vec<SslProfile>,
    pub deleted: Vec<String>,
}

impl SslProfileDifference {
    /// A live profile is only deleted when the desired configuration neither
    /// declares nor references it. Excluded profiles are never touched.
    pub fn compute(
        live: &BTreeMap<String, SslProfile>,
        desired: &RouterConfig,
        excluded: &[String],
    ) -> Self {
        let excluded: BTreeSet<&str> = excluded.iter().map(String::as_str).collect();
        let referenced = desired.referenced_ssl_profiles();

        let added = desired
            .ssl_profiles
            .values()
            .filter(|p| !live.contains_key(&p.name) && !excluded.contains(p.name.as_str()))
            .cloned()
            .collect();
        let deleted = live
            .keys()
            .filter(|name| {
                !desired.ssl_profiles.contains_key(*name)
                    && !referenced.contains(*name)
                    && !excluded.contains(name.as_str())
            })
            .cloned()
            .collect();
        Self { added, deleted }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }
}
