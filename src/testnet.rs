//! An in memory network of simulated nodes, for tests and examples.
//!
//! No sockets are involved. A [Testnet] holds the state of every
//! simulated node, and hands out [SimTransport]s that route requests to
//! them with a configurable latency.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::common::{
    Id, LookupRequest, LookupResponse, Node, PeerRecord, RequestKind, ResponsePayload,
    TransactionId, Value,
};
use crate::routing_table::StaticRoutingTable;
use crate::rpc::{SendError, Transport};

/// How many closer nodes a simulated node returns per request.
pub const LINKS_PER_RESPONSE: usize = 8;
/// On how many of the closest nodes a record is stored.
pub const REPLICAS: usize = 4;
/// How many nodes a fresh routing table is seeded with.
pub const BOOTSTRAP_COUNT: usize = 3;

#[derive(Debug)]
struct SimNode {
    node: Node,
    online: bool,
    peers: HashMap<Id, Vec<PeerRecord>>,
    values: HashMap<Id, Value>,
}

#[derive(Debug)]
struct TestnetInner {
    nodes: Vec<SimNode>,
    latency: Duration,
}

impl TestnetInner {
    fn closest(&self, target: &Id, count: usize) -> Vec<Node> {
        let mut nodes = self
            .nodes
            .iter()
            .map(|sim| sim.node.clone())
            .collect::<Vec<_>>();

        nodes.sort_by(|a, b| target.three_way_compare(&a.id, &b.id));
        nodes.truncate(count);

        nodes
    }

    fn respond(&self, to: SocketAddr, request: &LookupRequest) -> Option<LookupResponse> {
        let sim = self.nodes.iter().find(|sim| sim.node.address == to)?;

        if !sim.online {
            return None;
        }

        let target = *request.kind.target();

        let payload = match request.kind {
            RequestKind::FindNode { .. } => ResponsePayload::None,
            RequestKind::FindPeers { .. } => sim
                .peers
                .get(&target)
                .map(|records| ResponsePayload::Peers(records.clone()))
                .unwrap_or_default(),
            RequestKind::FindValue { .. } => sim
                .values
                .get(&target)
                .map(|value| ResponsePayload::Value(value.clone()))
                .unwrap_or_default(),
        };

        Some(LookupResponse {
            responder_id: sim.node.id,
            token: Some(rand::thread_rng().gen::<[u8; 8]>().to_vec()),
            nodes: self.closest(&target, LINKS_PER_RESPONSE),
            payload,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Testnet(Arc<Mutex<TestnetInner>>);

impl Testnet {
    /// Create a network of `count` online nodes with random ids.
    pub fn new(count: usize) -> Self {
        let nodes = (0..count)
            .map(|i| SimNode {
                node: Node::new(
                    Id::random(),
                    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7000 + i as u16)),
                ),
                online: true,
                peers: HashMap::new(),
                values: HashMap::new(),
            })
            .collect();

        Testnet(Arc::new(Mutex::new(TestnetInner {
            nodes,
            latency: Duration::from_millis(1),
        })))
    }

    // === Getters ===

    pub fn nodes(&self) -> Vec<Node> {
        self.lock()
            .nodes
            .iter()
            .map(|sim| sim.node.clone())
            .collect()
    }

    /// Nodes a fresh participant starts from.
    pub fn bootstrap(&self) -> Vec<Node> {
        let mut nodes = self.nodes();
        nodes.truncate(BOOTSTRAP_COUNT);

        nodes
    }

    /// Ground truth: the closest nodes to a target in this network.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Node> {
        self.lock().closest(target, count)
    }

    // === Public Methods ===

    /// A transport routing requests into this network.
    pub fn transport(&self) -> SimTransport {
        SimTransport {
            net: self.clone(),
            inbox: Vec::new(),
            next_tid: 0,
        }
    }

    /// A routing table seeded with this network's bootstrap nodes.
    pub fn routing_table(&self) -> StaticRoutingTable {
        StaticRoutingTable::new(self.bootstrap())
    }

    /// A [Dht](crate::dht::Dht) node participating in this network.
    pub fn client(&self) -> crate::dht::Dht {
        crate::dht::Dht::builder().build(Box::new(self.transport()), Box::new(self.routing_table()))
    }

    /// Store a value on the closest nodes to its target.
    ///
    /// Returns the number of nodes it was stored on.
    pub fn store_value(&self, value: Value) -> usize {
        let target = value.target();
        let closest = self.closest(&target, REPLICAS);

        let mut inner = self.lock();
        let mut stored = 0;

        for sim in inner.nodes.iter_mut() {
            if closest.iter().any(|node| node.id == sim.node.id) {
                sim.values.insert(target, value.clone());
                stored += 1;
            }
        }

        stored
    }

    /// Announce a peer record on the closest nodes to the peer's id.
    ///
    /// Returns the number of nodes it was announced on.
    pub fn announce_peer(&self, record: PeerRecord) -> usize {
        let target = record.peer_id();
        let closest = self.closest(&target, REPLICAS);

        let mut inner = self.lock();
        let mut announced = 0;

        for sim in inner.nodes.iter_mut() {
            if closest.iter().any(|node| node.id == sim.node.id) {
                sim.peers.entry(target).or_default().push(record.clone());
                announced += 1;
            }
        }

        announced
    }

    /// Online nodes respond, offline nodes swallow requests without an
    /// error, like a crashed host would.
    pub fn set_online(&self, id: &Id, online: bool) {
        let mut inner = self.lock();

        if let Some(sim) = inner.nodes.iter_mut().find(|sim| sim.node.id == *id) {
            sim.online = online;
        }
    }

    /// Base one way latency of the network. Each delivery adds a little
    /// random jitter on top.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    fn lock(&self) -> MutexGuard<'_, TestnetInner> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A [Transport] into a [Testnet].
///
/// Responses are computed at send time from the responder's state, and
/// delivered after the network latency has passed.
#[derive(Debug)]
pub struct SimTransport {
    net: Testnet,
    inbox: Vec<(Instant, TransactionId, LookupResponse)>,
    next_tid: TransactionId,
}

impl Transport for SimTransport {
    fn send(&mut self, to: &Node, request: LookupRequest) -> Result<TransactionId, SendError> {
        let inner = self.net.lock();

        if !inner.nodes.iter().any(|sim| sim.node.address == to.address) {
            return Err(SendError::NoRoute(to.address));
        }

        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);

        if let Some(response) = inner.respond(to.address, &request) {
            let jitter = Duration::from_micros(rand::thread_rng().gen_range(0..500));
            let deliver_at = Instant::now() + inner.latency + jitter;

            self.inbox.push((deliver_at, tid, response));
        }

        Ok(tid)
    }

    fn recv(&mut self) -> Option<(TransactionId, LookupResponse)> {
        let now = Instant::now();

        let position = self.inbox.iter().position(|(due, _, _)| *due <= now)?;
        let (_, tid, response) = self.inbox.remove(position);

        Some((tid, response))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn recv_blocking(transport: &mut SimTransport) -> Option<(TransactionId, LookupResponse)> {
        let deadline = Instant::now() + Duration::from_millis(100);

        while Instant::now() < deadline {
            if let Some(received) = transport.recv() {
                return Some(received);
            }
            std::thread::sleep(Duration::from_micros(500));
        }

        None
    }

    #[test]
    fn nodes_respond_with_their_closest_links() {
        let testnet = Testnet::new(12);
        let mut transport = testnet.transport();

        let target = Id::random();
        let to = testnet.nodes()[0].clone();

        let tid = transport
            .send(
                &to,
                LookupRequest {
                    requester_id: Id::random(),
                    kind: RequestKind::FindNode { target },
                },
            )
            .unwrap();

        let (received_tid, response) = recv_blocking(&mut transport).unwrap();

        assert_eq!(received_tid, tid);
        assert_eq!(response.responder_id, to.id);
        assert_eq!(response.nodes.len(), LINKS_PER_RESPONSE);
        assert_eq!(response.nodes, testnet.closest(&target, LINKS_PER_RESPONSE));
        assert!(response.token.is_some());
    }

    #[test]
    fn offline_nodes_swallow_requests() {
        let testnet = Testnet::new(4);
        let mut transport = testnet.transport();

        let to = testnet.nodes()[0].clone();
        testnet.set_online(&to.id, false);

        let result = transport.send(
            &to,
            LookupRequest {
                requester_id: Id::random(),
                kind: RequestKind::FindNode { target: Id::random() },
            },
        );

        assert!(result.is_ok());
        assert!(recv_blocking(&mut transport).is_none());
    }

    #[test]
    fn unknown_addresses_are_unroutable() {
        let testnet = Testnet::new(4);
        let mut transport = testnet.transport();

        let stranger = Node::random();

        assert!(matches!(
            transport.send(
                &stranger,
                LookupRequest {
                    requester_id: Id::random(),
                    kind: RequestKind::FindNode { target: Id::random() },
                },
            ),
            Err(SendError::NoRoute(_))
        ));
    }

    #[test]
    fn stored_values_are_served_by_the_closest_nodes() {
        let testnet = Testnet::new(16);
        let mut transport = testnet.transport();

        let value = Value::immutable(Bytes::from_static(b"testnet value"));
        let target = value.target();

        assert_eq!(testnet.store_value(value.clone()), REPLICAS);

        let replica = testnet.closest(&target, 1)[0].clone();
        transport
            .send(
                &replica,
                LookupRequest {
                    requester_id: Id::random(),
                    kind: RequestKind::FindValue { target, seq: None },
                },
            )
            .unwrap();

        let (_, response) = recv_blocking(&mut transport).unwrap();

        assert_eq!(response.payload, ResponsePayload::Value(value));
    }
}
