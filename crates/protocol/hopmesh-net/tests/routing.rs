//! Topology and routing across several in-process networks.

use hopmesh_net::{Network, NetworkConfig, SharedSecretAuth};
use hopmesh_test_utils::{init_tracing, joined_networks, settle, test_config, visible, wait_until, MemoryHub};
use hopmesh_types::NodeId;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn sorted(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    ids.sort();
    ids
}

async fn wait_visible(network: &Network, expected: Vec<NodeId>) -> bool {
    let expected = &sorted(expected);
    wait_until(WAIT, move || async move {
        settle(std::slice::from_ref(network)).await;
        visible(network).await == *expected
    })
    .await
}

#[tokio::test]
async fn test_two_nodes_converge() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 2, test_config()).await;
    let (a, b) = (&n[0], &n[1]);

    hub.connect(a.id(), b.id()).await.unwrap();
    settle(&n).await;

    assert!(wait_visible(a, vec![b.id()]).await);
    assert!(wait_visible(b, vec![a.id()]).await);

    // nothing left to broadcast once settled
    settle(&n).await;
    let rounds = a.topology().broadcast_rounds();
    let before = *rounds.borrow();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*rounds.borrow(), before);
}

#[tokio::test]
async fn test_chain_routes_through_middle_node() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 3, test_config()).await;
    let (a, b, c) = (&n[0], &n[1], &n[2]);

    hub.connect(a.id(), b.id()).await.unwrap();
    hub.connect(b.id(), c.id()).await.unwrap();
    settle(&n).await;

    assert!(wait_visible(a, vec![b.id(), c.id()]).await);
    assert!(wait_visible(c, vec![a.id(), b.id()]).await);
    assert_eq!(
        a.topology().path_to(c.id()).await.unwrap(),
        Some(vec![a.id(), b.id()])
    );
    assert_eq!(
        c.topology().path_to(a.id()).await.unwrap(),
        Some(vec![c.id(), b.id()])
    );

    // cutting B-C leaves C unreachable from A
    assert_eq!(hub.disconnect(b.id(), c.id()), 1);
    assert!(wait_visible(a, vec![b.id()]).await);
    assert!(a.topology().path_to(c.id()).await.unwrap().is_none());
    assert!(wait_visible(c, vec![]).await);
}

#[tokio::test]
async fn test_triangle_uses_direct_links() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 3, test_config()).await;

    hub.connect(n[0].id(), n[1].id()).await.unwrap();
    hub.connect(n[1].id(), n[2].id()).await.unwrap();
    hub.connect(n[2].id(), n[0].id()).await.unwrap();
    settle(&n).await;

    for (i, network) in n.iter().enumerate() {
        let others: Vec<NodeId> = n
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, other)| other.id())
            .collect();
        assert!(wait_visible(network, others.clone()).await);
        for other in others {
            assert_eq!(
                network.topology().path_to(other).await.unwrap(),
                Some(vec![network.id()])
            );
        }
    }
}

#[tokio::test]
async fn test_reconnect_restores_same_routes() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 3, test_config()).await;
    let (a, b, c) = (&n[0], &n[1], &n[2]);

    hub.force_connect(a.id(), b.id()).await.unwrap();
    hub.force_connect(b.id(), c.id()).await.unwrap();
    settle(&n).await;
    assert!(wait_visible(a, vec![b.id(), c.id()]).await);

    let mut before = Vec::new();
    for network in &n {
        let mut routes = Vec::new();
        for target in visible(network).await {
            routes.push((target, network.topology().path_to(target).await.unwrap()));
        }
        before.push(routes);
    }

    hub.disconnect(a.id(), b.id());
    hub.force_connect(a.id(), b.id()).await.unwrap();
    settle(&n).await;
    assert!(wait_visible(a, vec![b.id(), c.id()]).await);
    assert!(wait_visible(c, vec![a.id(), b.id()]).await);

    for (network, expected) in n.iter().zip(before) {
        let mut routes = Vec::new();
        for target in visible(network).await {
            routes.push((target, network.topology().path_to(target).await.unwrap()));
        }
        assert_eq!(routes, expected);
    }
}

#[tokio::test]
async fn test_leave_makes_node_unavailable() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 3, test_config()).await;
    let (a, b, c) = (&n[0], &n[1], &n[2]);

    hub.connect(a.id(), b.id()).await.unwrap();
    hub.connect(b.id(), c.id()).await.unwrap();
    assert!(wait_visible(a, vec![b.id(), c.id()]).await);

    c.leave().await.unwrap();
    assert!(wait_visible(a, vec![b.id()]).await);
    assert!(wait_visible(b, vec![a.id()]).await);
}

#[tokio::test]
async fn test_mismatched_auth_never_connects() {
    init_tracing();
    let hub = MemoryHub::new();
    let left = NetworkConfig::default().with_auth(vec![Arc::new(SharedSecretAuth::new("left"))]);
    let right = NetworkConfig::default().with_auth(vec![Arc::new(SharedSecretAuth::new("right"))]);
    let a = joined_networks(&hub, 1, left).await.remove(0);
    let b = joined_networks(&hub, 1, right).await.remove(0);

    hub.connect(a.id(), b.id()).await.unwrap();
    let a_ref = &a;
    let connected = wait_until(Duration::from_millis(500), move || async move {
        !visible(a_ref).await.is_empty()
    })
    .await;
    assert!(!connected);
    assert!(b.nodes().is_empty());
}

#[tokio::test]
async fn test_shared_secret_connects() {
    init_tracing();
    let hub = MemoryHub::new();
    let config =
        test_config().with_auth(vec![Arc::new(SharedSecretAuth::new("mesh-secret"))]);
    let n = joined_networks(&hub, 2, config).await;

    hub.connect(n[0].id(), n[1].id()).await.unwrap();
    assert!(wait_visible(&n[0], vec![n[1].id()]).await);
}
