//! Error types for blockprop-sim.
//!
//! Every error here ends the run. None of them describe a transient
//! condition, so nothing is ever retried.

use blockprop_ledger::LedgerError;
use thiserror::Error;

use crate::node::Address;
use crate::protocol::ProtocolError;

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors that can occur while running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// The pluggable protocol failed while handling a packet.
    #[error("protocol failed at node {node} handling {packet}: {source}")]
    Collaborator {
        node: Address,
        packet: String,
        #[source]
        source: ProtocolError,
    },

    /// A scheduled function call failed.
    #[error("scheduled call `{label}` failed: {source}")]
    Scheduled {
        label: &'static str,
        #[source]
        source: Box<SimError>,
    },

    /// A packet or call addressed a node that was never admitted.
    #[error("unknown node {0}")]
    UnknownNode(Address),

    /// A node's ledger broke an invariant.
    #[error("ledger of node {node} broke an invariant: {source}")]
    NodeLedger {
        node: Address,
        #[source]
        source: LedgerError,
    },

    /// The federated ledger broke an invariant.
    #[error("ledger invariant violated: {0}")]
    Ledger(#[from] LedgerError),

    /// The run already failed; its state is no longer reliable.
    #[error("run halted after fatal error: {reason}")]
    Halted { reason: String },

    /// Settings rejected before the run started.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}
