//! Struct and implementation of the Node entry in the Kademlia routing table

use std::net::SocketAddr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::common::Id;

#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
/// Node entry in the Kademlia routing table.
pub struct Node {
    pub id: Id,
    pub address: SocketAddr,
    /// Advertised protocol version. Diagnostic only, not part of equality.
    pub version: u32,
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> Node {
        Node {
            id,
            address,
            version: 0,
        }
    }

    /// Create a node with random Id and address for tests and simulations.
    pub fn random() -> Node {
        Node::new(
            Id::random(),
            SocketAddr::from(([127, 0, 0, 1], rand::thread_rng().gen())),
        )
    }

    /// Returns true if `other` could be the same node: same id at a
    /// different address, or a different id at the same address.
    ///
    /// This is the churn check, not equality. Containers deduplicate by
    /// [Id] alone.
    pub fn matches(&self, other: &Node) -> bool {
        self.id == other.id || self.address == other.address
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.address == other.address
    }
}
