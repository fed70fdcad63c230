//! Failure injection tests for the management client.

use std::collections::BTreeMap;
use std::time::Duration;

use router_sync::management::{entity, ManagementError, Query};
use router_sync::router::{Connector, Listener, Role, SslProfile, TcpEndpoint};

mod common;
use common::{MockRouter, ReplyOrder};

const TIMEOUT: Duration = Duration::from_millis(200);

fn tcp(name: &str, port: &str) -> TcpEndpoint {
    TcpEndpoint {
        name: name.into(),
        host: "0.0.0.0".into(),
        port: port.into(),
        address: name.into(),
        site_id: "site-1".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_timeout_closes_agent() {
    let router = MockRouter::new("router-1", "interior");
    let pool = router.pool(4, TIMEOUT);
    let mut agent = pool.get().await.unwrap();

    router.stall(true);
    let err = agent.get_local_connectors().await.unwrap_err();
    assert!(matches!(err, ManagementError::Timeout(_)), "got {:?}", err);
    assert!(agent.is_closed());
    assert!(matches!(agent.get_local_connectors().await, Err(ManagementError::Closed)));

    pool.put(agent);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(router.closed_transports(), 1);
}

#[tokio::test]
async fn test_connect_times_out_when_router_is_silent() {
    let router = MockRouter::new("router-1", "interior");
    router.stall(true);
    let pool = router.pool(4, TIMEOUT);

    assert!(pool.get().await.is_err());
    assert_eq!(router.closed_transports(), 1);
}

#[tokio::test]
async fn test_refused_connection() {
    let router = MockRouter::new("router-1", "interior");
    router.refuse(true);
    let pool = router.pool(4, TIMEOUT);

    match pool.get().await {
        Err(ManagementError::Connect { endpoint, .. }) => {
            assert_eq!(endpoint, "amqp://mock-router:5672");
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_rejection_keeps_agent_open() {
    let router = MockRouter::new("router-1", "interior");
    router.fail_once("CREATE", entity::LISTENER, 500);
    let pool = router.pool(4, TIMEOUT);
    let mut agent = pool.get().await.unwrap();

    let listener = Listener {
        name: "app".into(),
        role: Role::Normal,
        port: 9090,
        ..Default::default()
    };
    let attributes = router_sync::management::entities::attributes(&listener).unwrap();
    match agent.create(entity::LISTENER, "app", attributes.clone()).await {
        Err(ManagementError::Rejected { status, .. }) => assert_eq!(status, 500),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!agent.is_closed());

    agent.create(entity::LISTENER, "app", attributes).await.unwrap();
    let listeners = agent.get_local_listeners().await.unwrap();
    assert_eq!(listeners["app"].port, 9090);

    pool.put(agent);
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test]
async fn test_deleting_missing_entity_is_rejected() {
    let router = MockRouter::new("router-1", "interior");
    let pool = router.pool(4, TIMEOUT);
    let mut agent = pool.get().await.unwrap();

    match agent.delete_ssl_profile("gone").await {
        Err(e) => {
            assert!(e.to_string().starts_with("Error deleting SSL profile gone"));
            assert!(!e.is_fatal());
        }
        Ok(()) => panic!("delete of a missing profile succeeded"),
    }
    assert!(!agent.is_closed());
    assert!(matches!(
        agent.delete(entity::LISTENER, "").await,
        Err(ManagementError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_malformed_reply_closes_agent() {
    let router = MockRouter::new("router-1", "interior");
    let pool = router.pool(4, TIMEOUT);
    let mut agent = pool.get().await.unwrap();

    router.malformed_next();
    let err = agent.get_local_ssl_profiles().await.unwrap_err();
    assert!(matches!(err, ManagementError::Malformed(_)), "got {:?}", err);
    assert!(agent.is_closed());

    let mut agent = pool.get().await.unwrap();
    router.malformed_next();
    assert!(agent
        .create(entity::SSL_PROFILE, "p", BTreeMap::new())
        .await
        .is_err());
    assert!(agent.is_closed());
    assert_eq!(router.connections(), 2);
}

#[tokio::test]
async fn test_batch_replies_reassembled_in_submission_order() {
    let router = MockRouter::new("router-1", "interior");
    router.seed(entity::SSL_PROFILE, "a", &SslProfile::configure("a", "/certs", true));
    for name in ["l1", "l2"] {
        router.seed(
            entity::LISTENER,
            name,
            &Listener {
                name: name.into(),
                port: 1000,
                ..Default::default()
            },
        );
    }
    for name in ["c1", "c2", "c3"] {
        router.seed(
            entity::CONNECTOR,
            name,
            &Connector {
                name: name.into(),
                host: "peer".into(),
                port: "55671".into(),
                ..Default::default()
            },
        );
    }
    router.set_reply_order(ReplyOrder::LastFirst);
    let pool = router.pool(4, TIMEOUT);
    let mut agent = pool.get().await.unwrap();

    let results = agent
        .batch_query(&[
            Query::new(entity::SSL_PROFILE),
            Query::new(entity::LISTENER),
            Query::new(entity::CONNECTOR),
        ])
        .await
        .unwrap();
    let sizes: Vec<usize> = results.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![1, 2, 3]);
    assert_eq!(results[2][0].string("name").unwrap(), "c1");
    assert!(!agent.is_closed());
}

#[tokio::test]
async fn test_bridge_config_read_with_reordered_replies() {
    let router = MockRouter::new("router-1", "interior");
    router.seed(entity::TCP_LISTENER, "db", &tcp("db", "1024"));
    router.seed(entity::TCP_CONNECTOR, "db@10.0.0.1", &tcp("db@10.0.0.1", "5432"));
    router.set_reply_order(ReplyOrder::LastFirst);
    let pool = router.pool(4, TIMEOUT);
    let mut agent = pool.get().await.unwrap();

    let bridges = agent.get_local_bridge_config().await.unwrap();
    assert_eq!(bridges.tcp_listeners["db"].port, "1024");
    assert_eq!(bridges.tcp_connectors["db@10.0.0.1"].port, "5432");
    assert!(bridges.http_listeners.is_empty());
    assert!(bridges.http_connectors.is_empty());
}

#[tokio::test]
async fn test_one_failed_sub_query_fails_the_batch() {
    let router = MockRouter::new("router-1", "interior");
    router.fail("QUERY", entity::HTTP_CONNECTOR, 503);
    let pool = router.pool(4, TIMEOUT);
    let mut agent = pool.get().await.unwrap();

    match agent.get_local_bridge_config().await {
        Err(ManagementError::Batch(errors)) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].starts_with(entity::HTTP_CONNECTOR));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!agent.is_closed());
}

#[tokio::test]
async fn test_pool_closes_agents_beyond_capacity() {
    let router = MockRouter::new("router-1", "interior");
    let pool = router.pool(1, TIMEOUT);

    let first = pool.get().await.unwrap();
    let second = pool.get().await.unwrap();
    assert_eq!(router.connections(), 2);

    pool.put(first);
    pool.put(second);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(router.closed_transports(), 1);

    let _reused = pool.get().await.unwrap();
    assert_eq!(router.connections(), 2);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_pooled_agent_returns_on_drop() {
    let router = MockRouter::new("router-1", "interior");
    let pool = router.pool(2, TIMEOUT);

    {
        let mut agent = pool.acquire().await.unwrap();
        agent.get_local_listeners().await.unwrap();
    }
    assert_eq!(pool.idle_count(), 1);

    {
        let mut agent = pool.acquire().await.unwrap();
        router.stall(true);
        assert!(agent.get_local_listeners().await.is_err());
    }
    assert_eq!(pool.idle_count(), 0);

    router.stall(false);
    pool.drain();
    assert_eq!(router.connections(), 1);
}
