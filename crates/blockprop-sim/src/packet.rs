//! Packets exchanged between nodes.

use blockprop_ledger::{Block, BlockId};
use serde::{Deserialize, Serialize};

use crate::node::{Address, PeerAddress, Position};

/// What a packet carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    /// Addresses the receiver may connect to
    AddressGossip { peers: Vec<PeerAddress> },

    /// Blocks sent from one ledger to another
    BlockTransfer { blocks: Vec<Block> },

    /// The receiver discovered a new block with this id
    NewBlockSignal { block: BlockId },
}

/// Payload discriminant, for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    AddressGossip,
    BlockTransfer,
    NewBlockSignal,
}

impl Payload {
    pub fn kind(&self) -> PacketKind {
        match self {
            Payload::AddressGossip { .. } => PacketKind::AddressGossip,
            Payload::BlockTransfer { .. } => PacketKind::BlockTransfer,
            Payload::NewBlockSignal { .. } => PacketKind::NewBlockSignal,
        }
    }
}

/// An immutable packet with its propagation delay fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    from: Address,
    to: Address,
    distance: f64,
    delay: f64,
    payload: Payload,
}

impl Packet {
    /// A packet crossing the network: `delay = distance * speed`.
    pub fn new(
        (from, from_pos): (Address, Position),
        (to, to_pos): (Address, Position),
        speed: f64,
        payload: Payload,
    ) -> Self {
        if from == to {
            return Self::internal(from, payload);
        }
        let distance = from_pos.distance_to(&to_pos);
        Self {
            from,
            to,
            distance,
            delay: distance * speed,
            payload,
        }
    }

    /// A signal a node sends to itself. Arrives immediately.
    pub fn internal(node: Address, payload: Payload) -> Self {
        Self {
            from: node,
            to: node,
            distance: 0.0,
            delay: 0.0,
            payload,
        }
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn kind(&self) -> PacketKind {
        self.payload.kind()
    }

    /// True for self-addressed signals, which skip network side effects.
    pub fn is_internal(&self) -> bool {
        self.from == self.to
    }

    /// One-line description for logs and error context.
    pub fn summary(&self) -> String {
        let detail = match &self.payload {
            Payload::AddressGossip { peers } => format!("{} peers", peers.len()),
            Payload::BlockTransfer { blocks } => format!("{} blocks", blocks.len()),
            Payload::NewBlockSignal { block } => format!("block {block}"),
        };
        format!("{:?} {} -> {} ({detail})", self.kind(), self.from, self.to)
    }
}
