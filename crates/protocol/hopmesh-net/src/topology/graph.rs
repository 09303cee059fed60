//! Directed weighted graph of known nodes.
//!
//! A node's outgoing edges mirror the neighbor list that node last reported
//! about itself (or, for the local node, the set of connected peers). Edges
//! are replaced wholesale on every update; incoming edges are the reverse
//! index kept in sync.

use hopmesh_types::NodeId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A directed edge weighted with a latency estimate in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub cost: u32,
}

/// A node known to the topology.
#[derive(Debug, Clone)]
pub(crate) struct TopologyNode {
    pub id: NodeId,
    /// Reachable through a live direct connection.
    pub direct: bool,
    /// Target id to edge cost.
    pub outgoing: BTreeMap<NodeId, u32>,
    /// Ids of nodes with an edge towards this one.
    pub incoming: BTreeSet<NodeId>,
    /// Version of the neighbor list.
    pub version: u64,
    /// Direct peers whose summaries mention this node.
    pub reachable_via: HashSet<NodeId>,
}

impl TopologyNode {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            direct: false,
            outgoing: BTreeMap::new(),
            incoming: BTreeSet::new(),
            version: 0,
            reachable_via: HashSet::new(),
        }
    }

    /// Outgoing edges as [`Edge`] values.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.outgoing.iter().map(move |(&target, &cost)| Edge {
            source: self.id,
            target,
            cost,
        })
    }

    /// Still backed by a connection, gossip, or another node's edge.
    fn is_referenced(&self) -> bool {
        self.direct || !self.reachable_via.is_empty() || !self.incoming.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct Graph {
    self_id: NodeId,
    nodes: HashMap<NodeId, TopologyNode>,
}

impl Graph {
    /// Create a graph holding only the local node.
    pub fn new(self_id: NodeId) -> Self {
        let mut local = TopologyNode::new(self_id);
        local.direct = true;
        let mut nodes = HashMap::new();
        nodes.insert(self_id, local);
        Self { self_id, nodes }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn get(&self, id: &NodeId) -> Option<&TopologyNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut TopologyNode> {
        self.nodes.get_mut(id)
    }

    /// The local node. [`prune`](Self::prune) never removes it.
    pub fn local(&self) -> Option<&TopologyNode> {
        self.nodes.get(&self.self_id)
    }

    pub fn local_mut(&mut self) -> &mut TopologyNode {
        let id = self.self_id;
        self.get_or_create(id)
    }

    /// Look up a node, creating it on first reference.
    pub fn get_or_create(&mut self, id: NodeId) -> &mut TopologyNode {
        self.nodes.entry(id).or_insert_with(|| TopologyNode::new(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TopologyNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TopologyNode> {
        self.nodes.values_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Replace the outgoing edges of `id`.
    ///
    /// Returns whether the neighbor set or any cost changed.
    pub fn set_edges(&mut self, id: NodeId, neighbors: impl IntoIterator<Item = (NodeId, u32)>) -> bool {
        let new_edges: BTreeMap<NodeId, u32> = neighbors
            .into_iter()
            .filter(|(target, _)| *target != id)
            .collect();

        let old_edges = std::mem::take(&mut self.get_or_create(id).outgoing);
        if old_edges == new_edges {
            self.get_or_create(id).outgoing = old_edges;
            return false;
        }

        for target in old_edges.keys() {
            if let Some(node) = self.nodes.get_mut(target) {
                node.incoming.remove(&id);
            }
        }
        for target in new_edges.keys() {
            self.get_or_create(*target).incoming.insert(id);
        }
        self.get_or_create(id).outgoing = new_edges;
        true
    }

    /// Forget that routing info about any node arrived through `peer`.
    ///
    /// Returns whether any node was affected.
    pub fn remove_routing(&mut self, peer: &NodeId) -> bool {
        let mut changed = false;
        for node in self.nodes.values_mut() {
            changed |= node.reachable_via.remove(peer);
        }
        changed
    }

    /// Remove nodes nothing refers to any more. The local node is kept.
    ///
    /// Returns the removed ids.
    pub fn prune(&mut self) -> Vec<NodeId> {
        let mut removed = Vec::new();
        loop {
            let candidates: Vec<NodeId> = self
                .nodes
                .values()
                .filter(|node| node.id != self.self_id && !node.is_referenced())
                .map(|node| node.id)
                .collect();
            if candidates.is_empty() {
                break;
            }
            for id in candidates {
                // dropping its edges may orphan its targets in turn
                self.set_edges(id, std::iter::empty());
                self.nodes.remove(&id);
                removed.push(id);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = (0..n).map(|_| NodeId::generate()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_new_graph_has_direct_local_node() {
        let id = NodeId::generate();
        let graph = Graph::new(id);
        assert_eq!(graph.len(), 1);
        assert!(graph.local().unwrap().direct);
        assert_eq!(graph.self_id(), id);
    }

    #[test]
    fn test_set_edges_maintains_incoming() {
        let n = ids(4);
        let mut graph = Graph::new(n[0]);
        assert!(graph.set_edges(n[1], [(n[2], 5), (n[3], 7)]));
        assert!(graph.get(&n[2]).unwrap().incoming.contains(&n[1]));
        assert!(graph.get(&n[3]).unwrap().incoming.contains(&n[1]));

        // replaced wholesale
        assert!(graph.set_edges(n[1], [(n[3], 9)]));
        assert!(!graph.get(&n[2]).unwrap().incoming.contains(&n[1]));
        let edges: Vec<Edge> = graph.get(&n[1]).unwrap().edges().collect();
        assert_eq!(
            edges,
            vec![Edge {
                source: n[1],
                target: n[3],
                cost: 9
            }]
        );
    }

    #[test]
    fn test_set_same_edges_is_no_change() {
        let n = ids(3);
        let mut graph = Graph::new(n[0]);
        assert!(graph.set_edges(n[1], [(n[2], 5)]));
        assert!(!graph.set_edges(n[1], [(n[2], 5)]));
        assert!(graph.set_edges(n[1], [(n[2], 6)]));
    }

    #[test]
    fn test_self_loops_are_dropped() {
        let n = ids(2);
        let mut graph = Graph::new(n[0]);
        graph.set_edges(n[1], [(n[1], 1)]);
        assert!(graph.get(&n[1]).unwrap().outgoing.is_empty());
    }

    #[test]
    fn test_remove_routing() {
        let n = ids(3);
        let mut graph = Graph::new(n[0]);
        graph.get_or_create(n[2]).reachable_via.insert(n[1]);
        assert!(graph.remove_routing(&n[1]));
        assert!(!graph.remove_routing(&n[1]));
        assert!(graph.get(&n[2]).unwrap().reachable_via.is_empty());
    }

    #[test]
    fn test_prune_removes_orphans_transitively() {
        let n = ids(4);
        let mut graph = Graph::new(n[0]);
        // n1 -> n2 -> n3, nobody vouches for n1
        graph.set_edges(n[1], [(n[2], 1)]);
        graph.set_edges(n[2], [(n[3], 1)]);

        let mut removed = graph.prune();
        removed.sort();
        assert_eq!(removed, vec![n[1], n[2], n[3]]);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_prune_keeps_local_node() {
        let n = ids(2);
        let mut graph = Graph::new(n[0]);
        graph.set_edges(n[0], [(n[1], 3)]);
        graph.get_or_create(n[1]).direct = true;
        assert!(graph.prune().is_empty());

        // the peer goes away; the local node outlives it
        graph.get_or_create(n[1]).direct = false;
        graph.set_edges(n[0], std::iter::empty());
        assert_eq!(graph.prune(), vec![n[1]]);
        let local = graph.local().unwrap();
        assert!(local.direct);
        assert!(local.outgoing.is_empty());
    }

    #[test]
    fn test_prune_keeps_referenced_nodes() {
        let n = ids(3);
        let mut graph = Graph::new(n[0]);
        graph.get_or_create(n[1]).direct = true;
        graph.set_edges(n[1], [(n[2], 1)]);
        assert!(graph.prune().is_empty());
        assert_eq!(graph.len(), 3);
    }
}
