//! Writes binding, link and access changes into the desired document.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::router::{ConfigUpdate, RemoveConnector};
use crate::site::access::RouterAccessConfig;
use crate::site::bindings::{Bindings, ConnectorBinding, ListenerBinding};
use crate::site::link::{LinkConfig, LinkDefinition};
use crate::site::SiteResult;
use crate::sync::{read_router_config, update_router_config, DesiredStateSource};

/// Owns the site's producers and persists what they change.
///
/// Every update is a read-modify-write of the desired document, so several
/// reconcilers may share one source.
pub struct BindingReconciler {
    source: Arc<dyn DesiredStateSource>,
    key: String,
    max_retries: u32,
    profile_path: String,
    bindings: Bindings,
    links: BTreeMap<String, LinkConfig>,
}

fn persist(
    source: &dyn DesiredStateSource,
    key: &str,
    max_retries: u32,
    update: &mut dyn ConfigUpdate,
) -> SiteResult<bool> {
    let changed = update_router_config(source, key, update, max_retries)?;
    if changed {
        tracing::debug!(key = %key, "Persisted desired router config");
    }
    Ok(changed)
}

impl BindingReconciler {
    pub fn new(
        source: Arc<dyn DesiredStateSource>,
        key: &str,
        max_retries: u32,
        profile_path: &str,
        bindings: Bindings,
    ) -> Self {
        Self {
            source,
            key: key.to_string(),
            max_retries,
            profile_path: profile_path.to_string(),
            bindings,
            links: BTreeMap::new(),
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Restore port allocations from the stored document.
    pub fn recover(&mut self) -> SiteResult<()> {
        if let Some(config) = read_router_config(self.source.as_ref(), &self.key)? {
            self.bindings.recover(&config);
            tracing::info!(ports = %self.bindings.port_mapping(), "Recovered binding state");
        }
        Ok(())
    }

    pub fn update_connector(
        &mut self,
        name: &str,
        connector: Option<ConnectorBinding>,
    ) -> SiteResult<bool> {
        match self.bindings.update_connector(name, connector) {
            Some(update) => persist(self.source.as_ref(), &self.key, self.max_retries, update),
            None => Ok(false),
        }
    }

    pub fn update_listener(
        &mut self,
        name: &str,
        listener: Option<ListenerBinding>,
    ) -> SiteResult<bool> {
        match self.bindings.update_listener(name, listener) {
            Some(update) => persist(self.source.as_ref(), &self.key, self.max_retries, update),
            None => Ok(false),
        }
    }

    pub fn targets_changed(&mut self, name: &str) -> SiteResult<bool> {
        match self.bindings.targets_changed(name) {
            Some(update) => persist(self.source.as_ref(), &self.key, self.max_retries, update),
            None => Ok(false),
        }
    }

    /// Add, change or (with `None`) remove a link.
    pub fn update_link(&mut self, name: &str, definition: Option<LinkDefinition>) -> SiteResult<bool> {
        match definition {
            Some(definition) => {
                let link = self
                    .links
                    .entry(name.to_string())
                    .or_insert_with(|| LinkConfig::new(name, &self.profile_path));
                link.update(definition);
                persist(self.source.as_ref(), &self.key, self.max_retries, link)
            }
            None => {
                self.links.remove(name);
                let mut remove = RemoveConnector {
                    name: name.to_string(),
                };
                persist(self.source.as_ref(), &self.key, self.max_retries, &mut remove)
            }
        }
    }

    pub fn update_access(&mut self, access: &mut RouterAccessConfig) -> SiteResult<bool> {
        persist(self.source.as_ref(), &self.key, self.max_retries, access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::router::model::DEFAULT_CERT_PATH;
    use crate::router::{Mode, Role, RouterConfig, SiteMetadata, CONFIG_KEY};
    use crate::site::bindings::BindingKind;
    use crate::site::link::LinkEndpoint;
    use crate::sync::FileSource;

    fn source(dir: &TempDir) -> Arc<FileSource> {
        let source = Arc::new(FileSource::new(dir.path().join("desired.json")));
        let initial = RouterConfig::new("router-1", &SiteMetadata::default(), Mode::Interior, 10);
        source.write(&initial.as_config_map_data().unwrap(), None).unwrap();
        source
    }

    fn stored(source: &FileSource) -> RouterConfig {
        read_router_config(source, CONFIG_KEY).unwrap().unwrap()
    }

    #[test]
    fn test_connector_persisted_and_removed() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let mut reconciler = BindingReconciler::new(
            source.clone(),
            CONFIG_KEY,
            3,
            DEFAULT_CERT_PATH,
            Bindings::new("site-1", DEFAULT_CERT_PATH),
        );
        let connector = ConnectorBinding {
            name: "db".into(),
            routing_key: "db".into(),
            host: "10.0.0.1".into(),
            port: 5432,
            kind: BindingKind::Tcp,
            ..Default::default()
        };
        assert!(reconciler.update_connector("db", Some(connector.clone())).unwrap());
        assert!(!reconciler.update_connector("db", Some(connector)).unwrap());
        assert!(stored(&source).bridges.tcp_connectors.contains_key("db"));

        assert!(reconciler.update_connector("db", None).unwrap());
        assert!(stored(&source).bridges.tcp_connectors.is_empty());
    }

    #[test]
    fn test_listener_ports_recovered_after_restart() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let listener = |name: &str| ListenerBinding {
            name: name.into(),
            routing_key: name.into(),
            host: "svc".into(),
            port: 8080,
            ..Default::default()
        };

        let mut first = BindingReconciler::new(
            source.clone(),
            CONFIG_KEY,
            3,
            DEFAULT_CERT_PATH,
            Bindings::new("site-1", DEFAULT_CERT_PATH),
        );
        first.update_listener("a", Some(listener("a"))).unwrap();
        first.update_listener("b", Some(listener("b"))).unwrap();
        first.update_listener("a", None).unwrap();

        let mut second = BindingReconciler::new(
            source.clone(),
            CONFIG_KEY,
            3,
            DEFAULT_CERT_PATH,
            Bindings::new("site-1", DEFAULT_CERT_PATH),
        );
        second.recover().unwrap();
        assert_eq!(second.bindings().port_mapping().port_for_key("b"), Some(1025));
        second.update_listener("c", Some(listener("c"))).unwrap();
        assert_eq!(stored(&source).bridges.tcp_listeners["c"].port, "1024");
    }

    #[test]
    fn test_link_lifecycle() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let mut reconciler = BindingReconciler::new(
            source.clone(),
            CONFIG_KEY,
            3,
            DEFAULT_CERT_PATH,
            Bindings::new("site-1", DEFAULT_CERT_PATH),
        );
        let definition = LinkDefinition {
            endpoints: vec![LinkEndpoint {
                name: Role::InterRouter.to_string(),
                host: "peer".into(),
                port: "55671".into(),
            }],
            tls_credentials: "peer-link".into(),
            cost: 2,
        };
        assert!(reconciler.update_link("peer", Some(definition)).unwrap());
        let config = stored(&source);
        assert_eq!(config.connectors["peer"].cost, 2);
        assert!(config.ssl_profiles.contains_key("peer-link"));

        assert!(reconciler.update_link("peer", None).unwrap());
        let config = stored(&source);
        assert!(config.connectors.is_empty());
        assert!(!config.ssl_profiles.contains_key("peer-link"));
    }
}
