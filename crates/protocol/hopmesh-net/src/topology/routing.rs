//! Shortest paths from the local node.
//!
//! Dijkstra over outgoing edges yields, for every reachable node, its
//! cumulative cost and predecessor. Only the next hop matters for
//! forwarding: a direct node is its own next hop; any other node walks its
//! predecessor chain back towards the local node and uses the first direct
//! node it meets.

use hopmesh_types::NodeId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::graph::Graph;

/// Route to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Route {
    /// Direct node to hand messages to.
    pub next_hop: NodeId,
    /// Cumulative edge cost from the local node.
    pub cost: u64,
}

#[derive(Debug, Default)]
pub(crate) struct RoutingTable {
    routes: HashMap<NodeId, Route>,
    previous: HashMap<NodeId, NodeId>,
}

impl RoutingTable {
    /// Compute routes for the current graph.
    pub fn compute(graph: &Graph) -> Self {
        let self_id = graph.self_id();
        let mut cost: HashMap<NodeId, u64> = HashMap::new();
        let mut previous: HashMap<NodeId, NodeId> = HashMap::new();
        let mut heap = BinaryHeap::new();

        cost.insert(self_id, 0);
        heap.push(Reverse((0u64, self_id)));

        while let Some(Reverse((current_cost, id))) = heap.pop() {
            if cost.get(&id).is_some_and(|&c| c < current_cost) {
                continue;
            }
            let Some(node) = graph.get(&id) else {
                continue;
            };
            for edge in node.edges() {
                let candidate = current_cost + edge.cost as u64;
                let better = cost.get(&edge.target).map_or(true, |&c| candidate < c);
                if better {
                    cost.insert(edge.target, candidate);
                    previous.insert(edge.target, id);
                    heap.push(Reverse((candidate, edge.target)));
                }
            }
        }

        let mut routes = HashMap::new();
        for node in graph.nodes() {
            if node.id == self_id {
                continue;
            }
            let next_hop = if node.direct {
                Some(node.id)
            } else {
                first_direct_ancestor(graph, &previous, node.id)
            };
            if let Some(next_hop) = next_hop {
                let node_cost = cost
                    .get(&node.id)
                    .copied()
                    .or_else(|| {
                        graph
                            .local()
                            .and_then(|local| local.outgoing.get(&node.id))
                            .map(|&c| c as u64)
                    })
                    .unwrap_or(0);
                routes.insert(
                    node.id,
                    Route {
                        next_hop,
                        cost: node_cost,
                    },
                );
            }
        }

        Self { routes, previous }
    }

    pub fn route(&self, target: &NodeId) -> Option<&Route> {
        self.routes.get(target)
    }

    pub fn is_reachable(&self, target: &NodeId) -> bool {
        self.routes.contains_key(target)
    }

    /// Reachable node ids, sorted.
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.routes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Nodes from the local node up to, excluding, `target`.
    pub fn path_to(&self, graph: &Graph, target: &NodeId) -> Option<Vec<NodeId>> {
        let self_id = graph.self_id();
        self.routes.get(target)?;
        if graph.get(target).is_some_and(|node| node.direct) {
            return Some(vec![self_id]);
        }

        let mut path = Vec::new();
        let mut current = *target;
        while current != self_id {
            current = *self.previous.get(&current)?;
            path.push(current);
            if path.len() > graph.len() {
                return None;
            }
        }
        path.reverse();
        Some(path)
    }
}

/// Walk predecessors from `target` back towards the local node until a
/// direct node is found.
fn first_direct_ancestor(
    graph: &Graph,
    previous: &HashMap<NodeId, NodeId>,
    target: NodeId,
) -> Option<NodeId> {
    let self_id = graph.self_id();
    let mut current = target;
    let mut steps = 0;
    while let Some(&prev) = previous.get(&current) {
        if prev == self_id {
            return None;
        }
        if graph.get(&prev).is_some_and(|node| node.direct) {
            return Some(prev);
        }
        current = prev;
        steps += 1;
        if steps > graph.len() {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = (0..n).map(|_| NodeId::generate()).collect();
        ids.sort();
        ids
    }

    /// Local node `n[0]` directly connected to `direct`.
    fn graph_with_direct(n: &[NodeId], direct: &[(usize, u32)]) -> Graph {
        let mut graph = Graph::new(n[0]);
        for &(i, _) in direct {
            graph.get_or_create(n[i]).direct = true;
        }
        graph.set_edges(n[0], direct.iter().map(|&(i, c)| (n[i], c)));
        graph
    }

    #[test]
    fn test_chain_routes_through_router() {
        let n = ids(3);
        // A - B - C
        let mut graph = graph_with_direct(&n, &[(1, 10)]);
        graph.set_edges(n[1], [(n[0], 10), (n[2], 10)]);
        graph.set_edges(n[2], [(n[1], 10)]);

        let table = RoutingTable::compute(&graph);
        assert_eq!(table.route(&n[1]).unwrap().next_hop, n[1]);
        assert_eq!(table.route(&n[2]).unwrap().next_hop, n[1]);
        assert_eq!(table.route(&n[2]).unwrap().cost, 20);
        assert_eq!(table.path_to(&graph, &n[2]).unwrap(), vec![n[0], n[1]]);
        assert_eq!(table.path_to(&graph, &n[1]).unwrap(), vec![n[0]]);
        assert_eq!(table.reachable(), vec![n[1], n[2]]);
    }

    #[test]
    fn test_cheaper_multi_hop_path_wins() {
        let n = ids(4);
        // A -> B (1), A -> C (100), B -> D (1), C -> D (1)
        let mut graph = graph_with_direct(&n, &[(1, 1), (2, 100)]);
        graph.set_edges(n[1], [(n[3], 1)]);
        graph.set_edges(n[2], [(n[3], 1)]);

        let table = RoutingTable::compute(&graph);
        let route = table.route(&n[3]).unwrap();
        assert_eq!(route.next_hop, n[1]);
        assert_eq!(route.cost, 2);
    }

    #[test]
    fn test_direct_node_is_its_own_hop_even_when_detour_is_cheaper() {
        let n = ids(3);
        let mut graph = graph_with_direct(&n, &[(1, 1), (2, 50)]);
        graph.set_edges(n[1], [(n[2], 1)]);

        let table = RoutingTable::compute(&graph);
        assert_eq!(table.route(&n[2]).unwrap().next_hop, n[2]);
        assert_eq!(table.path_to(&graph, &n[2]).unwrap(), vec![n[0]]);
    }

    #[test]
    fn test_unconnected_node_is_unreachable() {
        let n = ids(4);
        let mut graph = graph_with_direct(&n, &[(1, 1)]);
        // C -> D known, but nothing leads to C
        graph.set_edges(n[2], [(n[3], 1)]);

        let table = RoutingTable::compute(&graph);
        assert!(!table.is_reachable(&n[2]));
        assert!(!table.is_reachable(&n[3]));
        assert!(table.path_to(&graph, &n[3]).is_none());
    }

    #[test]
    fn test_zero_cost_edges() {
        let n = ids(3);
        let mut graph = graph_with_direct(&n, &[(1, 0)]);
        graph.set_edges(n[1], [(n[0], 0), (n[2], 0)]);

        let table = RoutingTable::compute(&graph);
        assert_eq!(table.route(&n[2]).unwrap().next_hop, n[1]);
        assert_eq!(table.route(&n[2]).unwrap().cost, 0);
    }

    #[test]
    fn test_empty_graph() {
        let graph = Graph::new(NodeId::generate());
        let table = RoutingTable::compute(&graph);
        assert!(table.reachable().is_empty());
    }
}
