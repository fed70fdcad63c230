//! Outbound links to other sites.

use serde::{Deserialize, Serialize};

use crate::router::{ConfigUpdate, Connector, Role, RouterConfig, SslProfile};

/// Link cost used when the definition leaves it unset.
const DEFAULT_LINK_COST: i32 = 1;

/// One reachable endpoint of a remote site, named by the role it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkEndpoint {
    pub name: String,
    pub host: String,
    pub port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkDefinition {
    pub endpoints: Vec<LinkEndpoint>,
    pub tls_credentials: String,
    pub cost: i32,
}

impl LinkDefinition {
    fn endpoint(&self, role: &Role) -> Option<&LinkEndpoint> {
        self.endpoints.iter().find(|e| e.name == role.as_str())
    }
}

/// Adds the connector for a link, choosing the endpoint that matches the
/// local router's mode.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    name: String,
    profile_path: String,
    definition: Option<LinkDefinition>,
}

impl LinkConfig {
    pub fn new(name: &str, profile_path: &str) -> Self {
        Self {
            name: name.to_string(),
            profile_path: profile_path.to_string(),
            definition: None,
        }
    }

    pub fn with_definition(mut self, definition: LinkDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the definition, reporting whether it changed.
    pub fn update(&mut self, definition: LinkDefinition) -> bool {
        if self.definition.as_ref() == Some(&definition) {
            return false;
        }
        self.definition = Some(definition);
        true
    }

    fn connector(&self, role: Role, endpoint: &LinkEndpoint, ssl_profile: &str) -> Connector {
        let cost = self
            .definition
            .as_ref()
            .map(|d| d.cost)
            .filter(|cost| *cost > 0)
            .unwrap_or(DEFAULT_LINK_COST);
        Connector {
            name: self.name.clone(),
            role,
            host: endpoint.host.clone(),
            port: endpoint.port.clone(),
            cost,
            ssl_profile: ssl_profile.to_string(),
            ..Default::default()
        }
    }
}

impl ConfigUpdate for LinkConfig {
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        let Some(definition) = self.definition.as_ref() else {
            return false;
        };
        let role = if config.is_edge() {
            Role::Edge
        } else {
            Role::InterRouter
        };
        let Some(endpoint) = definition.endpoint(&role) else {
            tracing::debug!(link = %self.name, role = %role, "No endpoint for local router role");
            return false;
        };

        let mut changed = false;
        let mut ssl_profile = String::new();
        if !definition.tls_credentials.is_empty() {
            ssl_profile = definition.tls_credentials.clone();
            changed |= config.add_ssl_profile(SslProfile::configure(
                &ssl_profile,
                &self.profile_path,
                true,
            ));
        }
        let connector = self.connector(role, endpoint, &ssl_profile);
        changed |= config.add_connector(connector);
        changed
    }
}
