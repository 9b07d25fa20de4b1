//! In-process transport connecting the validators of a devnet.
//!
//! Each registered node is reached through its [`EventQueue`]; sending is a
//! non-blocking enqueue, so a slow node drops messages instead of stalling
//! its peers. Nodes can be isolated to simulate partitions.

use crate::observability::NetworkMetrics;
use bytes::Bytes;
use ibft_consensus::{ConsensusEvent, EventQueue, ValidatorMulticaster};
use ibft_types::ValidatorId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Default)]
struct NetworkState {
    peers: BTreeMap<ValidatorId, EventQueue>,
    isolated: BTreeSet<ValidatorId>,
    extra_copies: usize,
}

/// A message bus shared by every node of a devnet.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<RwLock<NetworkState>>,
    metrics: NetworkMetrics,
}

impl LocalNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport metrics.
    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    /// Connects a node.
    pub fn register(&self, id: ValidatorId, queue: EventQueue) {
        let mut state = self.state.write();
        state.peers.insert(id, queue);
        self.metrics.peers_connected.set(state.peers.len() as i64);
        debug!(%id, peers = state.peers.len(), "peer registered");
    }

    /// Disconnects a node.
    pub fn unregister(&self, id: &ValidatorId) {
        let mut state = self.state.write();
        state.peers.remove(id);
        self.metrics.peers_connected.set(state.peers.len() as i64);
        debug!(%id, peers = state.peers.len(), "peer unregistered");
    }

    /// Connected nodes.
    pub fn peers(&self) -> Vec<ValidatorId> {
        self.state.read().peers.keys().copied().collect()
    }

    /// Drops every message to or from `id` until [`LocalNetwork::reconnect`].
    pub fn isolate(&self, id: ValidatorId) {
        self.state.write().isolated.insert(id);
    }

    /// Ends the isolation of `id`.
    pub fn reconnect(&self, id: &ValidatorId) {
        self.state.write().isolated.remove(id);
    }

    /// Delivers every message `1 + copies` times.
    pub fn set_extra_copies(&self, copies: usize) {
        self.state.write().extra_copies = copies;
    }

    /// The sending side for node `local`.
    pub fn endpoint(&self, local: ValidatorId) -> LocalEndpoint {
        LocalEndpoint {
            local,
            network: self.clone(),
        }
    }

    /// Delivers `data` from `from` to the single node `to`, as if `from` had
    /// sent it on a direct link. Returns false if it did not arrive.
    pub fn send_to(&self, from: ValidatorId, to: ValidatorId, data: Bytes) -> bool {
        self.metrics.message_size_bytes.observe(data.len() as f64);
        let state = self.state.read();
        let Some(queue) = state.peers.get(&to) else {
            trace!(%from, %to, "unknown peer, dropping message");
            return false;
        };
        if state.isolated.contains(&from) || state.isolated.contains(&to) {
            self.metrics.record_delivery("partitioned");
            return false;
        }
        let delivered = queue.add(ConsensusEvent::MessageReceived { sender: from, data });
        self.metrics
            .record_delivery(if delivered { "delivered" } else { "dropped" });
        delivered
    }

    fn deliver(&self, from: ValidatorId, data: Bytes, denylist: &[ValidatorId]) {
        self.metrics.message_size_bytes.observe(data.len() as f64);
        let state = self.state.read();

        for (id, queue) in &state.peers {
            if *id == from || denylist.contains(id) {
                continue;
            }
            if state.isolated.contains(&from) || state.isolated.contains(id) {
                trace!(%from, to = %id, "partitioned, dropping message");
                self.metrics.record_delivery("partitioned");
                continue;
            }
            for _ in 0..=state.extra_copies {
                let event = ConsensusEvent::MessageReceived {
                    sender: from,
                    data: data.clone(),
                };
                if queue.add(event) {
                    self.metrics.record_delivery("delivered");
                } else {
                    self.metrics.record_delivery("dropped");
                }
            }
        }
    }
}

/// [`ValidatorMulticaster`] of one node on a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalEndpoint {
    local: ValidatorId,
    network: LocalNetwork,
}

impl LocalEndpoint {
    /// Identity of the sending node.
    pub fn local_id(&self) -> ValidatorId {
        self.local
    }
}

impl ValidatorMulticaster for LocalEndpoint {
    fn send(&self, data: Bytes, denylist: &[ValidatorId]) {
        self.network.deliver(self.local, data, denylist);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibft_consensus::EventReceiver;
    use ibft_types::NodeKey;

    fn node(network: &LocalNetwork, seed: u64) -> (ValidatorId, EventReceiver) {
        let id = NodeKey::from_seed(seed).id();
        let (queue, events) = EventQueue::new(16);
        network.register(id, queue);
        (id, events)
    }

    fn drain(events: &mut EventReceiver) -> Vec<ValidatorId> {
        let mut senders = Vec::new();
        while let Some(event) = events.try_recv() {
            if let ConsensusEvent::MessageReceived { sender, .. } = event {
                senders.push(sender);
            }
        }
        senders
    }

    #[test]
    fn test_send_skips_self_and_denylist() {
        let network = LocalNetwork::new();
        let (a, mut a_events) = node(&network, 1);
        let (_b, mut b_events) = node(&network, 2);
        let (c, mut c_events) = node(&network, 3);

        network
            .endpoint(a)
            .send(Bytes::from_static(b"hello"), &[c]);

        assert!(drain(&mut a_events).is_empty());
        assert_eq!(drain(&mut b_events), vec![a]);
        assert!(drain(&mut c_events).is_empty());
        assert_eq!(network.metrics().delivery_count("delivered"), 1);
    }

    #[test]
    fn test_isolation() {
        let network = LocalNetwork::new();
        let (a, _a_events) = node(&network, 1);
        let (b, mut b_events) = node(&network, 2);

        network.isolate(a);
        network.endpoint(a).send(Bytes::from_static(b"x"), &[]);
        network.endpoint(b).send(Bytes::from_static(b"y"), &[]);
        assert!(drain(&mut b_events).is_empty());
        assert_eq!(network.metrics().delivery_count("partitioned"), 2);

        network.reconnect(&a);
        network.endpoint(a).send(Bytes::from_static(b"z"), &[]);
        assert_eq!(drain(&mut b_events), vec![a]);
    }

    #[test]
    fn test_extra_copies() {
        let network = LocalNetwork::new();
        let (a, _a_events) = node(&network, 1);
        let (_b, mut b_events) = node(&network, 2);

        network.set_extra_copies(2);
        network.endpoint(a).send(Bytes::from_static(b"x"), &[]);
        assert_eq!(drain(&mut b_events).len(), 3);
    }

    #[test]
    fn test_send_to_reaches_one_peer() {
        let network = LocalNetwork::new();
        let (a, mut a_events) = node(&network, 1);
        let (b, mut b_events) = node(&network, 2);
        let (_c, mut c_events) = node(&network, 3);

        assert!(network.send_to(a, b, Bytes::from_static(b"x")));
        assert_eq!(drain(&mut b_events), vec![a]);
        assert!(drain(&mut a_events).is_empty());
        assert!(drain(&mut c_events).is_empty());

        let unknown = NodeKey::from_seed(9).id();
        assert!(!network.send_to(a, unknown, Bytes::from_static(b"x")));

        network.isolate(b);
        assert!(!network.send_to(a, b, Bytes::from_static(b"x")));
        assert_eq!(network.metrics().delivery_count("partitioned"), 1);
    }

    #[test]
    fn test_full_queue_drops() {
        let network = LocalNetwork::new();
        let (a, _a_events) = node(&network, 1);
        let b = NodeKey::from_seed(2).id();
        let (queue, _b_events) = EventQueue::new(2);
        network.register(b, queue.clone());

        for _ in 0..5 {
            network.endpoint(a).send(Bytes::from_static(b"x"), &[]);
        }
        assert_eq!(network.metrics().delivery_count("delivered"), 2);
        assert_eq!(network.metrics().delivery_count("dropped"), 3);
        assert_eq!(queue.overflow_count(), 3);

        network.unregister(&b);
        assert_eq!(network.peers(), vec![a]);
        assert_eq!(network.metrics().peers_connected.get(), 1);
    }
}
