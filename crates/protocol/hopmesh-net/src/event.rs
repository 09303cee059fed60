//! Network events.
//!
//! This module defines the events emitted by the topology and the network
//! facade. All event types are `Clone` so they can be fanned out to any
//! number of subscribers over broadcast channels; dropping a receiver
//! unsubscribes.

use hopmesh_types::NodeId;

use crate::message::Message;

/// Events emitted by the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyEvent {
    /// A node became reachable.
    NodeAvailable(NodeId),

    /// A node is no longer reachable.
    NodeUnavailable(NodeId),

    /// Application data addressed to the local node arrived.
    Data {
        /// Originating node.
        source: NodeId,
        /// Application message type.
        message_type: String,
        /// Raw application payload.
        data: Vec<u8>,
    },
}

/// Events emitted by the network facade.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum NetworkEvent {
    /// A node became reachable; a [`Node`](crate::Node) handle exists for it.
    NodeAvailable(NodeId),

    /// A node is no longer reachable; its handle was dropped from the network.
    NodeUnavailable(NodeId),

    /// A message from any node arrived.
    Message(Message),
}

/// Events concerning a single node.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum NodeEvent {
    /// A message from this node arrived.
    Message(Message),

    /// The node is no longer reachable. No further events follow.
    Unavailable,
}
