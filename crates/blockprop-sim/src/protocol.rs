//! The pluggable per-protocol function the engine delegates to.

use std::future::Future;

use thiserror::Error;

use crate::node::{Address, NodeState};
use crate::packet::{Packet, Payload};
use crate::random::RandomStreams;

/// A packet the protocol wants to send. The engine fills in distance and
/// delay from the node positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: Address,
    pub payload: Payload,
}

impl Outgoing {
    pub fn new(to: Address, payload: Payload) -> Self {
        Self { to, payload }
    }
}

/// What the protocol returns for one delivery.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Replacement state for the receiving node
    pub state: NodeState,
    /// Packets to put on the network
    pub send: Vec<Outgoing>,
}

/// A fault inside a protocol implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProtocolError(pub String);

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Maps an inbound packet and the receiving node's state to its next state
/// and outbound packets.
///
/// Implementations must be deterministic given the packet, the state and the
/// shared random streams. The engine awaits every call before advancing the
/// clock and applies no timeout.
pub trait Collaborator: Send + Sync {
    fn process(
        &self,
        packet: Packet,
        state: NodeState,
        random: &mut RandomStreams,
    ) -> impl Future<Output = Result<Outcome, ProtocolError>> + Send;
}
