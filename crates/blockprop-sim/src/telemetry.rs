//! Draw and log events for an external consumer.
//!
//! Telemetry is fire-and-forget: sinks never report failure back to the
//! engine, and a missing consumer is not an error.

use std::sync::Mutex;

use blockprop_ledger::BlockId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::node::{Address, Position};
use crate::packet::PacketKind;

/// Events emitted during a run, in logical-time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    /// A node was admitted
    NodeCreated {
        at: f64,
        node: Address,
        position: Position,
    },

    /// A node's peer set changed
    ConnectionChanged {
        at: f64,
        node: Address,
        peers: Vec<Address>,
    },

    /// A packet left its sender
    PacketInFlight {
        at: f64,
        from: Address,
        to: Address,
        kind: PacketKind,
        arrives_at: f64,
    },

    /// Blocks entered or left a node's ledger
    ChainDiff {
        at: f64,
        node: Address,
        added: Vec<BlockId>,
        removed: Vec<BlockId>,
    },

    /// A node was chosen to discover a block
    BlockDiscovered {
        at: f64,
        node: Address,
        block: BlockId,
        hue: f64,
    },

    /// Free-form message
    Log { at: f64, message: String },
}

impl TelemetryEvent {
    /// Logical time of the event.
    pub fn at(&self) -> f64 {
        match self {
            TelemetryEvent::NodeCreated { at, .. } => *at,
            TelemetryEvent::ConnectionChanged { at, .. } => *at,
            TelemetryEvent::PacketInFlight { at, .. } => *at,
            TelemetryEvent::ChainDiff { at, .. } => *at,
            TelemetryEvent::BlockDiscovered { at, .. } => *at,
            TelemetryEvent::Log { at, .. } => *at,
        }
    }
}

/// Consumer of telemetry.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Keeps the whole timeline in memory.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for Recorder {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Fans events out to any number of live subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }
}

impl TelemetrySink for BroadcastSink {
    fn emit(&self, event: TelemetryEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
