//! Point-to-point delivery with per-hop acknowledgement.
//!
//! Every node that handles a data message assigns it a local id and appends
//! `{node, id}` to the message's path. Acks and rejects travel back one hop
//! at a time: each node looks up the pending entry for its own id and either
//! completes the originating send or relays the answer with the id the
//! previous hop assigned.
//!
//! ```text
//! A ──Data [A:1]──▶ B ──Data [A:1, B:7]──▶ C
//! A ◀──DataAck 1─── B ◀──DataAck 7──────── C
//! ```
//!
//! Pending entries expire after the message timeout. An expired local send
//! fails with `Timeout`; an expired relay entry is dropped silently since
//! the upstream hop times out on its own.

use hopmesh_types::NodeId;
use hopmesh_wire::{DataAckPayload, DataPayload, PathEntry, PeerMessage};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::{Internal, TopologyActor};
use crate::error::{NetworkError, NetworkResult};
use crate::event::TopologyEvent;
use crate::peer::PeerKey;

/// Who is waiting for the answer to a data message.
#[derive(Debug)]
enum Waiter {
    /// A send started on this node.
    Local(oneshot::Sender<NetworkResult<()>>),
    /// A message relayed for the previous hop.
    Relay { previous_peer: PeerKey, previous_id: u64 },
}

#[derive(Debug)]
struct PendingSend {
    waiter: Waiter,
    timeout: AbortHandle,
}

/// Message id counter and pending-send table of one topology.
#[derive(Debug, Default)]
pub(super) struct Messaging {
    next_id: u64,
    pending: HashMap<u64, PendingSend>,
}

impl Messaging {
    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn register(
        &mut self,
        id: u64,
        waiter: Waiter,
        timeout: Duration,
        internal_tx: &mpsc::UnboundedSender<Internal>,
    ) {
        let internal_tx = internal_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = internal_tx.send(Internal::SendTimeout { id });
        });
        self.pending.insert(
            id,
            PendingSend {
                waiter,
                timeout: timer.abort_handle(),
            },
        );
    }

    fn take(&mut self, id: u64) -> Option<Waiter> {
        let pending = self.pending.remove(&id)?;
        pending.timeout.abort();
        Some(pending.waiter)
    }

    /// Drop every pending entry, failing local sends.
    pub(super) fn clear(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.timeout.abort();
            if let Waiter::Local(response) = pending.waiter {
                let _ = response.send(Err(NetworkError::NotJoined));
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }
}

impl TopologyActor {
    /// Start a send from the local node.
    pub(super) fn send_data(
        &mut self,
        target: NodeId,
        message_type: String,
        data: Vec<u8>,
        response: oneshot::Sender<NetworkResult<()>>,
    ) {
        let Some(peer) = self.find_peer(&target).cloned() else {
            let _ = response.send(Err(NetworkError::NotReachable(target)));
            return;
        };

        let id = self.messaging.next_id();
        let payload = DataPayload {
            target,
            path: vec![PathEntry {
                node: self.self_id(),
                id,
            }],
            message_type,
            data,
        };
        if let Err(e) = peer.post(PeerMessage::Data(payload)) {
            let _ = response.send(Err(e));
            return;
        }
        trace!(target = %target, id, "Sent data");
        self.messaging.register(
            id,
            Waiter::Local(response),
            self.config.message_timeout,
            &self.internal_tx,
        );
    }

    pub(super) fn on_data(&mut self, from: PeerKey, mut payload: DataPayload) {
        let Some(last) = payload.path.last().map(|entry| entry.id) else {
            warn!(peer = ?from, "Dropping data without path");
            return;
        };
        let self_id = self.self_id();

        if payload.target == self_id {
            self.post(from, PeerMessage::DataAck(DataAckPayload { id: last }));
            // a delivery is a topology signal, and the source's availability
            // must be announced before its data
            self.refresh_routing();
            let Some(source) = payload.source() else {
                return;
            };
            trace!(source = %source, message_type = %payload.message_type, "Received data");
            let _ = self.events.send(TopologyEvent::Data {
                source,
                message_type: payload.message_type,
                data: payload.data,
            });
            return;
        }

        let next = if self.config.endpoint || payload.has_visited(&self_id) {
            None
        } else {
            self.find_peer(&payload.target)
                .filter(|peer| peer.id().is_some_and(|id| !payload.has_visited(&id)))
                .cloned()
        };
        let Some(next) = next else {
            debug!(target = %payload.target, hops = payload.path.len(), "Could not forward data");
            self.post(from, PeerMessage::DataReject(DataAckPayload { id: last }));
            return;
        };

        let id = self.messaging.next_id();
        payload.path.push(PathEntry { node: self_id, id });
        let target = payload.target;
        if let Err(e) = next.post(PeerMessage::Data(payload)) {
            debug!(target = %target, error = %e, "Failed to forward data");
            self.post(from, PeerMessage::DataReject(DataAckPayload { id: last }));
            return;
        }
        trace!(target = %target, id, previous_id = last, "Forwarded data");
        self.messaging.register(
            id,
            Waiter::Relay {
                previous_peer: from,
                previous_id: last,
            },
            self.config.message_timeout,
            &self.internal_tx,
        );
    }

    pub(super) fn on_data_ack(&mut self, id: u64) {
        match self.messaging.take(id) {
            Some(Waiter::Local(response)) => {
                let _ = response.send(Ok(()));
            }
            Some(Waiter::Relay {
                previous_peer,
                previous_id,
            }) => {
                self.post(
                    previous_peer,
                    PeerMessage::DataAck(DataAckPayload { id: previous_id }),
                );
            }
            None => debug!(id, "Ack for unknown message"),
        }
    }

    pub(super) fn on_data_reject(&mut self, id: u64) {
        match self.messaging.take(id) {
            Some(Waiter::Local(response)) => {
                let _ = response.send(Err(NetworkError::CouldNotForward));
            }
            Some(Waiter::Relay {
                previous_peer,
                previous_id,
            }) => {
                self.post(
                    previous_peer,
                    PeerMessage::DataReject(DataAckPayload { id: previous_id }),
                );
            }
            None => debug!(id, "Reject for unknown message"),
        }
    }

    pub(super) fn on_send_timeout(&mut self, id: u64) {
        match self.messaging.take(id) {
            Some(Waiter::Local(response)) => {
                debug!(id, "Send timed out");
                let _ = response.send(Err(NetworkError::Timeout));
            }
            Some(Waiter::Relay { .. }) => trace!(id, "Relay entry expired"),
            None => {}
        }
    }
}
