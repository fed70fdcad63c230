//! Typed operations on a router's live configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::management::agent::Agent;
use crate::management::entities::{self, agent_address, Connection, Router, RouterNode};
use crate::management::message::Record;
use crate::management::types::{entity, ManagementError, ManagementResult, Query};
use crate::router::{
    BridgeConfig, BridgeConfigDifference, Connector, ConnectorDifference, Endpoint, Listener,
    ListenerDifference, SslProfile,
};

fn decode_all<T: DeserializeOwned>(
    records: &[Record],
    entity_type: &str,
    numeric_port: bool,
) -> ManagementResult<Vec<T>> {
    records
        .iter()
        .map(|r| entities::from_record(r, entity_type, numeric_port))
        .collect()
}

fn by_name<E: Endpoint>(items: Vec<E>) -> BTreeMap<String, E> {
    items.into_iter().map(|e| (e.name().to_string(), e)).collect()
}

impl Agent {
    /// Read the four bridge endpoint tables in one batch.
    pub async fn get_local_bridge_config(&mut self) -> ManagementResult<BridgeConfig> {
        let queries = [
            Query::new(entity::TCP_LISTENER),
            Query::new(entity::TCP_CONNECTOR),
            Query::new(entity::HTTP_LISTENER),
            Query::new(entity::HTTP_CONNECTOR),
        ];
        let results: [Vec<Record>; 4] = self
            .batch_query(&queries)
            .await?
            .try_into()
            .map_err(|_| ManagementError::Malformed("incomplete bridge query".to_string()))?;
        let [tcp_listeners, tcp_connectors, http_listeners, http_connectors] = results;
        Ok(BridgeConfig {
            tcp_listeners: by_name(decode_all(&tcp_listeners, entity::TCP_LISTENER, false)?),
            tcp_connectors: by_name(decode_all(&tcp_connectors, entity::TCP_CONNECTOR, false)?),
            http_listeners: by_name(decode_all(&http_listeners, entity::HTTP_LISTENER, false)?),
            http_connectors: by_name(decode_all(&http_connectors, entity::HTTP_CONNECTOR, false)?),
        })
    }

    async fn delete_named(&mut self, entity_type: &str, names: &[String], context: &str) -> ManagementResult<()> {
        for name in names {
            self.delete(entity_type, name)
                .await
                .map_err(|e| e.context(context))?;
        }
        Ok(())
    }

    async fn create_endpoints<E>(&mut self, entity_type: &str, items: &[E], context: &str) -> ManagementResult<()>
    where
        E: Endpoint + Serialize,
    {
        for item in items {
            let attributes = entities::attributes(item).map_err(|e| e.context(context))?;
            self.create(entity_type, item.name(), attributes)
                .await
                .map_err(|e| e.context(context))?;
        }
        Ok(())
    }

    /// Push a bridge difference: every deletion happens before any creation.
    pub async fn update_local_bridge_config(&mut self, changes: &BridgeConfigDifference) -> ManagementResult<()> {
        self.delete_named(entity::TCP_CONNECTOR, &changes.tcp_connectors.deleted, "Error deleting tcp connectors")
            .await?;
        self.delete_named(entity::TCP_LISTENER, &changes.tcp_listeners.deleted, "Error deleting tcp listeners")
            .await?;
        self.delete_named(entity::HTTP_CONNECTOR, &changes.http_connectors.deleted, "Error deleting http connectors")
            .await?;
        self.delete_named(entity::HTTP_LISTENER, &changes.http_listeners.deleted, "Error deleting http listeners")
            .await?;

        self.create_endpoints(entity::TCP_CONNECTOR, &changes.tcp_connectors.added, "Error adding tcp connectors")
            .await?;
        self.create_endpoints(entity::TCP_LISTENER, &changes.tcp_listeners.added, "Error adding tcp listeners")
            .await?;
        self.create_endpoints(entity::HTTP_CONNECTOR, &changes.http_connectors.added, "Error adding http connectors")
            .await?;
        self.create_endpoints(entity::HTTP_LISTENER, &changes.http_listeners.added, "Error adding http listeners")
            .await
    }

    pub async fn get_local_connectors(&mut self) -> ManagementResult<BTreeMap<String, Connector>> {
        let records = self.query(entity::CONNECTOR, &[]).await?;
        let connectors: Vec<Connector> = decode_all(&records, entity::CONNECTOR, false)?;
        Ok(connectors.into_iter().map(|c| (c.name.clone(), c)).collect())
    }

    pub async fn update_connector_config(&mut self, changes: &ConnectorDifference) -> ManagementResult<()> {
        for connector in &changes.deleted {
            self.delete(entity::CONNECTOR, &connector.name)
                .await
                .map_err(|e| e.context(format!("Error deleting connector {}", connector.name)))?;
        }
        for connector in &changes.added {
            if connector.host.is_empty() {
                return Err(ManagementError::Invalid(format!("connector {} has no host", connector.name)));
            }
            if connector.port.is_empty() {
                return Err(ManagementError::Invalid(format!("connector {} has no port", connector.name)));
            }
            let context = format!("Error adding connector {}", connector.name);
            let attributes = entities::attributes(connector).map_err(|e| e.context(context.clone()))?;
            self.create(entity::CONNECTOR, &connector.name, attributes)
                .await
                .map_err(|e| e.context(context))?;
        }
        Ok(())
    }

    pub async fn get_local_listeners(&mut self) -> ManagementResult<BTreeMap<String, Listener>> {
        let records = self.query(entity::LISTENER, &[]).await?;
        let listeners: Vec<Listener> = decode_all(&records, entity::LISTENER, true)?;
        Ok(listeners.into_iter().map(|l| (l.name.clone(), l)).collect())
    }

    pub async fn update_listener_config(&mut self, changes: &ListenerDifference) -> ManagementResult<()> {
        for listener in &changes.deleted {
            self.delete(entity::LISTENER, &listener.name)
                .await
                .map_err(|e| e.context(format!("Error deleting listener {}", listener.name)))?;
        }
        for listener in &changes.added {
            let context = format!("Error adding listener {}", listener.name);
            let attributes = entities::attributes(listener).map_err(|e| e.context(context.clone()))?;
            self.create(entity::LISTENER, &listener.name, attributes)
                .await
                .map_err(|e| e.context(context))?;
        }
        Ok(())
    }

    pub async fn get_local_ssl_profiles(&mut self) -> ManagementResult<BTreeMap<String, SslProfile>> {
        let records = self.query(entity::SSL_PROFILE, &[]).await?;
        let profiles: Vec<SslProfile> = decode_all(&records, entity::SSL_PROFILE, false)?;
        Ok(profiles.into_iter().map(|p| (p.name.clone(), p)).collect())
    }

    /// Register a profile unless the router already has one by that name.
    pub async fn create_ssl_profile(&mut self, profile: &SslProfile) -> ManagementResult<bool> {
        if self.get_local_ssl_profiles().await?.contains_key(&profile.name) {
            return Ok(false);
        }
        self.add_ssl_profile(profile).await?;
        Ok(true)
    }

    /// Register a profile the caller already knows to be absent.
    pub async fn add_ssl_profile(&mut self, profile: &SslProfile) -> ManagementResult<()> {
        let context = format!("Error adding SSL profile {}", profile.name);
        let attributes = entities::attributes(profile).map_err(|e| e.context(context.clone()))?;
        self.create(entity::SSL_PROFILE, &profile.name, attributes)
            .await
            .map_err(|e| e.context(context))
    }

    pub async fn delete_ssl_profile(&mut self, name: &str) -> ManagementResult<()> {
        self.delete(entity::SSL_PROFILE, name)
            .await
            .map_err(|e| e.context(format!("Error deleting SSL profile {}", name)))
    }

    pub async fn get_connections(&mut self) -> ManagementResult<Vec<Connection>> {
        let records = self.query(entity::CONNECTION, &[]).await?;
        records.iter().map(Connection::from_record).collect()
    }

    /// Interior routers known to the network.
    ///
    /// An edge router has no routing table of its own, so the question is
    /// put to the interior router it is uplinked to.
    pub async fn get_interior_nodes(&mut self) -> ManagementResult<Vec<RouterNode>> {
        let agent = if self.local().edge {
            let connections = self.get_connections().await?;
            let uplink = connections
                .iter()
                .find(|c| c.role == "edge" && c.is_outbound())
                .ok_or_else(|| ManagementError::Invalid("edge router has no uplink".to_string()))?;
            Some(agent_address(&uplink.container, false))
        } else {
            None
        };
        let records = self
            .query_by_agent_address(entity::ROUTER_NODE, &[], agent.as_deref())
            .await?;
        records.iter().map(RouterNode::from_record).collect()
    }

    /// Every router in the network with its outbound links.
    pub async fn get_all_routers(&mut self) -> ManagementResult<Vec<Router>> {
        let nodes = self.get_interior_nodes().await?;
        let interior: Vec<String> = nodes.iter().map(RouterNode::agent_address).collect();
        let router_records = self
            .batch_query(&Query::for_all_agents(entity::ROUTER, &interior))
            .await?;
        let connection_records = self
            .batch_query(&Query::for_all_agents(entity::CONNECTION, &interior))
            .await?;

        let mut routers = Vec::new();
        let mut edges: BTreeMap<String, String> = BTreeMap::new();
        for (records, connections) in router_records.iter().zip(connection_records.iter()) {
            let record = records
                .first()
                .ok_or_else(|| ManagementError::Malformed("router query returned no record".to_string()))?;
            let mut router = Router::from_record(record)?;
            let connections = connections
                .iter()
                .map(Connection::from_record)
                .collect::<ManagementResult<Vec<_>>>()?;
            for connection in &connections {
                if connection.role == "inter-router" && connection.is_outbound() {
                    router.connected_to.push(connection.container.clone());
                } else if connection.role == "edge" && connection.is_inbound() {
                    edges.insert(connection.container.clone(), router.id.clone());
                }
            }
            routers.push(router);
        }

        let known: BTreeSet<String> = routers.iter().map(|r| r.id.clone()).collect();
        let edge_ids: Vec<&String> = edges.keys().filter(|id| !known.contains(*id)).collect();
        let edge_agents: Vec<String> = edge_ids.iter().map(|id| agent_address(id, true)).collect();
        let edge_records = self
            .batch_query(&Query::for_all_agents(entity::ROUTER, &edge_agents))
            .await?;
        for (id, records) in edge_ids.iter().zip(edge_records.iter()) {
            if let Some(record) = records.first() {
                let mut router = Router::from_record(record)?;
                if let Some(uplink) = edges.get(*id) {
                    router.connected_to.push(uplink.clone());
                }
                routers.push(router);
            }
        }
        Ok(routers)
    }
}
