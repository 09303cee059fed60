//! Routing gossip between direct peers.
//!
//! Three messages keep every node's view of the graph in sync:
//!
//! - `NodeSummary` advertises the sender's own version and the versions of
//!   the nodes it can reach. Receivers request anything newer than what they
//!   know.
//! - `NodeRequest` asks for full routing records.
//! - `NodeDetails` carries routing records: a node's version and its
//!   neighbors with latencies. Newer records replace a node's edges
//!   wholesale.
//!
//! Summaries are debounced broadcasts; details are also pushed periodically
//! to one random peer so latency changes spread without a broadcast.

use hopmesh_types::NodeId;
use hopmesh_wire::{
    NeighborLatency, NodeDetailsPayload, NodeRequestPayload, NodeRoutingDetails,
    NodeSummaryPayload, NodeVersion, PeerMessage,
};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, trace};

use super::TopologyActor;
use crate::peer::PeerKey;

impl TopologyActor {
    /// Summary of the local view: reachable nodes that have neighbors.
    pub(super) fn build_summary(&self) -> NodeSummaryPayload {
        let self_id = self.self_id();
        let mut nodes: Vec<NodeVersion> = self
            .graph
            .nodes()
            .filter(|node| node.id != self_id)
            .filter(|node| self.routing.is_reachable(&node.id))
            .filter(|node| node.direct || !node.outgoing.is_empty())
            .map(|node| NodeVersion {
                id: node.id,
                version: node.version,
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        NodeSummaryPayload {
            own_version: self.graph.local().map_or(0, |local| local.version),
            nodes,
        }
    }

    /// Full routing record of a known node.
    fn routing_details(&self, id: &NodeId) -> Option<NodeRoutingDetails> {
        let node = self.graph.get(id)?;
        if node.version == 0 {
            return None;
        }
        Some(NodeRoutingDetails {
            id: node.id,
            version: node.version,
            neighbors: node
                .outgoing
                .iter()
                .map(|(&id, &latency)| NeighborLatency { id, latency })
                .collect(),
        })
    }

    pub(super) fn on_node_summary(&mut self, from: PeerKey, summary: NodeSummaryPayload) {
        let Some(sender) = self.peer_node(from) else {
            return;
        };
        let self_id = self.self_id();
        let mut wanted = Vec::new();

        if summary.own_version > self.graph.get_or_create(sender).version {
            wanted.push(sender);
        }

        let mut listed = HashSet::with_capacity(summary.nodes.len());
        for entry in &summary.nodes {
            if entry.id == self_id || entry.id == sender {
                continue;
            }
            listed.insert(entry.id);
            let node = self.graph.get_or_create(entry.id);
            node.reachable_via.insert(sender);
            if entry.version > node.version {
                wanted.push(entry.id);
            }
        }

        // the sender no longer sees anything it left out
        let mut dropped = false;
        for node in self.graph.nodes_mut() {
            if node.id == sender || listed.contains(&node.id) {
                continue;
            }
            dropped |= node.reachable_via.remove(&sender);
        }
        if dropped {
            self.dirty = true;
        }

        if !wanted.is_empty() {
            trace!(peer = %sender, count = wanted.len(), "Requesting node details");
            self.post(from, PeerMessage::NodeRequest(NodeRequestPayload { nodes: wanted }));
        }
    }

    pub(super) fn on_node_request(&mut self, from: PeerKey, request: NodeRequestPayload) {
        let nodes: Vec<NodeRoutingDetails> = request
            .nodes
            .iter()
            .filter_map(|id| self.routing_details(id))
            .collect();
        if nodes.is_empty() {
            return;
        }
        self.post(from, PeerMessage::NodeDetails(NodeDetailsPayload { nodes }));
    }

    pub(super) fn on_node_details(&mut self, details: NodeDetailsPayload) {
        let self_id = self.self_id();
        let mut changed = false;

        for entry in details.nodes {
            // only the local node describes itself
            if entry.id == self_id {
                continue;
            }
            let node = self.graph.get_or_create(entry.id);
            if entry.version <= node.version {
                continue;
            }
            node.version = entry.version;
            self.graph.set_edges(
                entry.id,
                entry
                    .neighbors
                    .iter()
                    .map(|neighbor| (neighbor.id, neighbor.latency)),
            );
            changed = true;
        }

        if changed {
            self.dirty = true;
            self.schedule_broadcast();
        }
    }

    /// Push fresh routing records to one random peer.
    pub(super) fn gossip_latency(&mut self) {
        if self.config.endpoint {
            return;
        }
        let candidates: Vec<(PeerKey, NodeId)> = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.peer.is_connected())
            .filter_map(|(key, entry)| entry.id.map(|id| (*key, id)))
            .collect();
        let Some(&(key, target)) = candidates.choose(&mut rand::thread_rng()) else {
            return;
        };

        self.refresh_self_edges();
        let mut nodes: Vec<NodeRoutingDetails> = self
            .graph
            .nodes()
            .filter(|node| node.id != target)
            .filter_map(|node| self.routing_details(&node.id))
            .collect();
        if nodes.is_empty() {
            return;
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(peer = %target, nodes = nodes.len(), "Latency gossip");
        self.post(key, PeerMessage::NodeDetails(NodeDetailsPayload { nodes }));
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TopologyConfig;
    use crate::peer::{Peer, PeerConnection, PeerEvent, PeerKey, PeerOptions, Role};
    use crate::topology::{Topology, TopologyActor};
    use hopmesh_types::NodeId;
    use hopmesh_wire::{
        NeighborLatency, NodeDetailsPayload, NodeRoutingDetails, NodeSummaryPayload, NodeVersion,
        PeerMessage,
    };
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc, watch};

    fn config() -> TopologyConfig {
        TopologyConfig {
            max_start_jitter: Duration::ZERO,
            ..TopologyConfig::default()
        }
    }

    async fn link(a: &Topology, b: &Topology) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        a.add_peer(Peer::spawn_connected(
            left,
            PeerOptions::new(a.local_id(), Role::Client),
            b.local_id(),
        ))
        .await
        .unwrap();
        b.add_peer(Peer::spawn_connected(
            right,
            PeerOptions::new(b.local_id(), Role::Server),
            a.local_id(),
        ))
        .await
        .unwrap();
    }

    async fn settle(topologies: &[&Topology]) {
        for _ in 0..10 {
            for topology in topologies {
                topology.consolidate().await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn started(n: usize) -> Vec<Topology> {
        let mut ids: Vec<NodeId> = (0..n).map(|_| NodeId::generate()).collect();
        ids.sort();
        let mut topologies = Vec::new();
        for id in ids {
            let topology = Topology::new(id, config());
            topology.start().await.unwrap();
            topologies.push(topology);
        }
        topologies
    }

    #[tokio::test]
    async fn test_gossip_discovers_two_hop_node() {
        let t = started(3).await;
        link(&t[0], &t[1]).await;
        link(&t[1], &t[2]).await;
        settle(&[&t[0], &t[1], &t[2]]).await;

        let mut expected = vec![t[1].local_id(), t[2].local_id()];
        expected.sort();
        assert_eq!(t[0].nodes().await.unwrap(), expected);
        assert_eq!(
            t[0].path_to(t[2].local_id()).await.unwrap(),
            Some(vec![t[0].local_id(), t[1].local_id()])
        );
        let hop = t[0].find_peer(t[2].local_id()).await.unwrap().unwrap();
        assert_eq!(hop.id(), Some(t[1].local_id()));
    }

    #[tokio::test]
    async fn test_endpoint_is_reachable_but_does_not_route() {
        let ids = started(2).await;
        let (a, b) = (&ids[0], &ids[1]);
        let endpoint = Topology::new(
            NodeId::generate(),
            TopologyConfig {
                endpoint: true,
                ..config()
            },
        );
        endpoint.start().await.unwrap();

        // a - endpoint - b
        link(a, &endpoint).await;
        link(&endpoint, b).await;
        settle(&[a, &endpoint, b]).await;

        assert_eq!(a.nodes().await.unwrap(), vec![endpoint.local_id()]);
        assert_eq!(b.nodes().await.unwrap(), vec![endpoint.local_id()]);
        assert!(a.path_to(b.local_id()).await.unwrap().is_none());
    }

    // =========================================================================
    // Actor-level helpers
    // =========================================================================

    fn actor(config: TopologyConfig) -> TopologyActor {
        let (internal_tx, _internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(16);
        let (rounds, _) = watch::channel(0);
        TopologyActor::new(NodeId::generate(), config, internal_tx, events, rounds)
    }

    /// Register an active connection to `remote`; the returned end is driven
    /// by hand.
    async fn attach(actor: &mut TopologyActor, remote: NodeId) -> (PeerKey, PeerConnection) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let local = Peer::spawn_connected(
            left,
            PeerOptions::new(actor.self_id(), Role::Server),
            remote,
        );
        let raw = Peer::spawn_connected(right, PeerOptions::new(remote, Role::Client), actor.self_id());
        let peer = local.peer.clone();
        let key = peer.key();
        actor.add_peer(local);
        actor.on_peer_connected(key, remote);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !peer.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        (key, raw)
    }

    /// A forced connection registered with `topology`; the returned end is
    /// driven by hand.
    async fn raw_peer(topology: &Topology, remote: NodeId) -> PeerConnection {
        let (left, right) = tokio::io::duplex(64 * 1024);
        topology
            .add_peer(Peer::spawn_connected(
                left,
                PeerOptions::new(topology.local_id(), Role::Server),
                remote,
            ))
            .await
            .unwrap();
        Peer::spawn_connected(right, PeerOptions::new(remote, Role::Client), topology.local_id())
    }

    async fn next_details(conn: &mut PeerConnection, wait: Duration) -> Option<NodeDetailsPayload> {
        tokio::time::timeout(wait, async {
            loop {
                match conn.events.recv().await {
                    Some(PeerEvent::Message(PeerMessage::NodeDetails(details))) => return Some(details),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    fn record(id: NodeId, version: u64, neighbors: &[(NodeId, u32)]) -> NodeRoutingDetails {
        NodeRoutingDetails {
            id,
            version,
            neighbors: neighbors
                .iter()
                .map(|&(id, latency)| NeighborLatency { id, latency })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_latency_gossip_leaves_out_the_receiver() {
        let mut actor = actor(config());
        let self_id = actor.self_id();
        let x = NodeId::generate();
        let y = NodeId::generate();
        let (_, mut x_raw) = attach(&mut actor, x).await;

        actor.on_node_details(NodeDetailsPayload {
            nodes: vec![
                record(x, 4, &[(self_id, 3), (y, 8)]),
                record(y, 2, &[(x, 8)]),
            ],
        });
        // x is the only connected peer, so it is the one picked
        actor.gossip_latency();

        let details = next_details(&mut x_raw, Duration::from_secs(5))
            .await
            .expect("no details sent");
        let ids: Vec<NodeId> = details.nodes.iter().map(|node| node.id).collect();
        assert!(!ids.contains(&x));
        assert!(ids.contains(&self_id));
        let y_record = details.nodes.iter().find(|node| node.id == y).unwrap();
        assert_eq!(y_record.version, 2);
        assert_eq!(y_record.neighbors, vec![NeighborLatency { id: x, latency: 8 }]);
    }

    #[tokio::test]
    async fn test_endpoint_sends_no_latency_gossip() {
        let mut actor = actor(TopologyConfig {
            endpoint: true,
            ..config()
        });
        let x = NodeId::generate();
        let y = NodeId::generate();
        let (_, mut x_raw) = attach(&mut actor, x).await;
        actor.on_node_details(NodeDetailsPayload {
            nodes: vec![record(y, 2, &[(x, 8)])],
        });

        actor.gossip_latency();
        assert!(next_details(&mut x_raw, Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn test_periodic_gossip_spreads_latency_changes() {
        let b = Topology::new(
            NodeId::generate(),
            TopologyConfig {
                latency_gossip_interval: Duration::from_millis(20),
                ..config()
            },
        );
        b.start().await.unwrap();
        let x = NodeId::generate();
        let y = NodeId::generate();
        let z = NodeId::generate();
        let x_raw = raw_peer(&b, x).await;
        let mut y_raw = raw_peer(&b, y).await;

        // z sits behind x; each round reports a new latency on the x-z link
        for (version, latency) in [(3u64, 7u32), (4, 9)] {
            x_raw
                .peer
                .send(PeerMessage::NodeDetails(NodeDetailsPayload {
                    nodes: vec![
                        record(x, version, &[(b.local_id(), 0), (z, latency)]),
                        record(z, version, &[(x, latency)]),
                    ],
                }))
                .await
                .unwrap();

            let seen = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let Some(details) = next_details(&mut y_raw, Duration::from_secs(5)).await else {
                        return false;
                    };
                    assert!(details.nodes.iter().all(|node| node.id != y));
                    let updated = details.nodes.iter().any(|node| {
                        node.id == z
                            && node.version == version
                            && node.neighbors == vec![NeighborLatency { id: x, latency }]
                    });
                    if updated {
                        return true;
                    }
                }
            })
            .await
            .unwrap_or(false);
            assert!(seen, "latency {} never reached y", latency);
        }
    }

    #[tokio::test]
    async fn test_summary_dropping_a_node_withdraws_the_route() {
        let mut actor = actor(config());
        let x = NodeId::generate();
        let z = NodeId::generate();
        let (key, _x_raw) = attach(&mut actor, x).await;

        actor.on_node_summary(
            key,
            NodeSummaryPayload {
                own_version: 0,
                nodes: vec![NodeVersion { id: z, version: 1 }],
            },
        );
        assert!(actor.graph.get(&z).unwrap().reachable_via.contains(&x));
        actor.refresh_routing();
        assert!(actor.graph.get(&z).is_some());

        // x no longer lists z
        actor.on_node_summary(
            key,
            NodeSummaryPayload {
                own_version: 0,
                nodes: vec![],
            },
        );
        assert!(actor.graph.get(&z).unwrap().reachable_via.is_empty());
        assert!(actor.dirty);

        actor.refresh_routing();
        assert!(actor.graph.get(&z).is_none());
        assert!(!actor.routing.is_reachable(&z));
        assert!(actor.graph.get(&x).is_some());
    }
}
