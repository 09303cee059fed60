//! Network facade events, node handles and broadcast.

use hopmesh_net::{Network, NetworkEvent, NodeEvent};
use hopmesh_test_utils::{init_tracing, joined_networks, settle, test_config, wait_until, MemoryHub};
use hopmesh_types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Chat {
    room: String,
    text: String,
}

async fn wait_for_node(network: &Network, id: NodeId) -> bool {
    wait_until(WAIT, move || async move {
        settle(std::slice::from_ref(network)).await;
        network.get(&id).is_some()
    })
    .await
}

async fn next_network_event<F>(events: &mut broadcast::Receiver<NetworkEvent>, mut accept: F) -> NetworkEvent
where
    F: FnMut(&NetworkEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(event) = events.recv().await {
                if accept(&event) {
                    return event;
                }
            }
        }
    })
    .await
    .expect("event did not arrive")
}

#[tokio::test]
async fn test_available_and_unavailable_events() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 2, test_config()).await;
    let (a, b) = (&n[0], &n[1]);
    let mut events = a.subscribe();

    hub.connect(a.id(), b.id()).await.unwrap();
    let event = next_network_event(&mut events, |e| matches!(e, NetworkEvent::NodeAvailable(_))).await;
    assert!(matches!(event, NetworkEvent::NodeAvailable(id) if id == b.id()));
    assert!(wait_for_node(a, b.id()).await);
    let node = a.get(&b.id()).unwrap();
    let mut node_events = node.subscribe();

    hub.disconnect(a.id(), b.id());
    let event = next_network_event(&mut events, |e| matches!(e, NetworkEvent::NodeUnavailable(_))).await;
    assert!(matches!(event, NetworkEvent::NodeUnavailable(id) if id == b.id()));
    assert!(a.get(&b.id()).is_none());

    let event = tokio::time::timeout(WAIT, node_events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, NodeEvent::Unavailable));
}

#[tokio::test]
async fn test_node_handle_send_and_subscribe() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 2, test_config()).await;
    let (a, b) = (&n[0], &n[1]);

    hub.connect(a.id(), b.id()).await.unwrap();
    assert!(wait_for_node(a, b.id()).await);
    assert!(wait_for_node(b, a.id()).await);

    let from_a = b.get(&a.id()).unwrap();
    let mut from_a_events = from_a.subscribe();

    let chat = Chat {
        room: "lobby".to_string(),
        text: "hi".to_string(),
    };
    let to_b = a.get(&b.id()).unwrap();
    to_b.send("chat", &chat).await.unwrap();

    let event = tokio::time::timeout(WAIT, from_a_events.recv()).await.unwrap().unwrap();
    match event {
        NodeEvent::Message(message) => {
            assert_eq!(message.message_type, "chat");
            assert_eq!(message.decode::<Chat>().unwrap(), chat);
        }
        other => panic!("expected message, got {:?}", other),
    }

    assert_eq!(to_b.path().await.unwrap(), Some(vec![a.id()]));
    assert!(to_b.latency().await.unwrap().is_some());
}

#[tokio::test]
async fn test_broadcast_reaches_every_node() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 4, test_config()).await;
    // star around n[0]
    for other in &n[1..] {
        hub.connect(n[0].id(), other.id()).await.unwrap();
    }
    for other in &n[1..] {
        assert!(wait_for_node(&n[0], other.id()).await);
    }

    let mut receivers: Vec<_> = n[1..].iter().map(|network| network.subscribe()).collect();
    n[0].broadcast("news", &"extra".to_string()).await.unwrap();

    for events in &mut receivers {
        let event = next_network_event(events, |e| matches!(e, NetworkEvent::Message(_))).await;
        match event {
            NetworkEvent::Message(message) => {
                assert_eq!(message.source, n[0].id());
                assert_eq!(message.decode::<String>().unwrap(), "extra");
            }
            other => panic!("expected message, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_nodes_lists_reachable_handles() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 3, test_config()).await;
    hub.connect(n[0].id(), n[1].id()).await.unwrap();
    hub.connect(n[1].id(), n[2].id()).await.unwrap();
    assert!(wait_for_node(&n[0], n[2].id()).await);

    let ids: Vec<NodeId> = n[0].nodes().iter().map(|node| node.id()).collect();
    assert_eq!(ids, vec![n[1].id(), n[2].id()]);
}

#[tokio::test]
async fn test_rejoin_after_leave() {
    init_tracing();
    let hub = MemoryHub::new();
    let n = joined_networks(&hub, 2, test_config()).await;
    let (a, b) = (&n[0], &n[1]);

    hub.connect(a.id(), b.id()).await.unwrap();
    assert!(wait_for_node(a, b.id()).await);

    a.leave().await.unwrap();
    let b_id = b.id();
    assert!(
        wait_until(WAIT, move || async move {
            settle(std::slice::from_ref(a)).await;
            a.get(&b_id).is_none()
        })
        .await
    );

    a.join().await.unwrap();
    hub.connect(a.id(), b.id()).await.unwrap();
    assert!(wait_for_node(a, b.id()).await);
}
