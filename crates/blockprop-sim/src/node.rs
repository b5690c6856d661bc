//! Simulated nodes and the store that owns them.

use std::collections::BTreeMap;

use blockprop_ledger::{BlockId, Ledger};
use serde::{Deserialize, Serialize};

/// Network address, assigned in admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u32);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Fixed position on the simulated plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// An address together with where it lives, as exchanged in gossip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub address: Address,
    pub position: Position,
}

/// Bookkeeping a node keeps about one peer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeerData {
    pub distance: f64,
    pub last_send: Option<f64>,
    pub last_receive: Option<f64>,
}

/// Complete state of one node, handed to the collaborator on each delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub address: Address,
    pub position: Position,
    pub peers: BTreeMap<Address, PeerData>,
    pub ledger: Ledger,
}

impl NodeState {
    /// A freshly admitted node with no peers and an empty ledger.
    pub fn new(address: Address, position: Position) -> Self {
        Self {
            address,
            position,
            peers: BTreeMap::new(),
            ledger: Ledger::new(),
        }
    }

    /// This node as a gossip entry.
    pub fn peer_address(&self) -> PeerAddress {
        PeerAddress {
            address: self.address,
            position: self.position,
        }
    }

    /// Record a peer. Returns false for self or an existing peer.
    pub fn connect(&mut self, peer: &PeerAddress) -> bool {
        if peer.address == self.address || self.peers.contains_key(&peer.address) {
            return false;
        }
        let distance = self.position.distance_to(&peer.position);
        self.peers.insert(
            peer.address,
            PeerData {
                distance,
                ..PeerData::default()
            },
        );
        true
    }

    /// Addresses of all peers, ascending.
    pub fn peer_addresses(&self) -> Vec<Address> {
        self.peers.keys().copied().collect()
    }

    /// Compact view for status reporting.
    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            address: self.address,
            position: self.position,
            peers: self.peer_addresses(),
            blocks: self.ledger.len(),
            height: self.ledger.height(),
            tips: self.ledger.tips().iter().map(|b| b.id).collect(),
        }
    }
}

/// Status view of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub address: Address,
    pub position: Position,
    pub peers: Vec<Address>,
    pub blocks: usize,
    pub height: usize,
    pub tips: Vec<BlockId>,
}

/// Every admitted node, keyed by address.
///
/// Nodes are never removed. A node is taken out only while one delivery
/// processes it and is restored before the next event runs.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: BTreeMap<Address, NodeState>,
    next_address: u32,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a node at `position` under the next free address.
    pub fn admit(&mut self, position: Position) -> Address {
        let address = Address(self.next_address);
        self.next_address += 1;
        self.nodes.insert(address, NodeState::new(address, position));
        address
    }

    pub fn get(&self, address: Address) -> Option<&NodeState> {
        self.nodes.get(&address)
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut NodeState> {
        self.nodes.get_mut(&address)
    }

    /// Position of a node, if admitted.
    pub fn position(&self, address: Address) -> Option<Position> {
        self.nodes.get(&address).map(|n| n.position)
    }

    pub(crate) fn take(&mut self, address: Address) -> Option<NodeState> {
        self.nodes.remove(&address)
    }

    pub(crate) fn restore(&mut self, state: NodeState) {
        self.nodes.insert(state.address, state);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Admitted addresses, ascending.
    pub fn addresses(&self) -> Vec<Address> {
        self.nodes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NodeState> {
        self.nodes.values_mut()
    }
}
