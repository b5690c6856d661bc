//! Block Propagation Simulator
//!
//! Discrete-event simulation of blocks spreading across a peer-to-peer
//! network, built for visualizing how competing histories form and heal.
//!
//! # Architecture
//!
//! - **EventQueue**: Total chronological order over function calls and
//!   packet deliveries, drained by a single-flight loop
//! - **SimContext**: Clock, node store, queue and random streams, passed by
//!   reference to everything that runs
//! - **Collaborator**: The pluggable protocol that turns a packet and a node
//!   state into a new state and outgoing packets
//! - **Trust**: After every delivery, trust is averaged across the network
//!   and fully trusted prefixes are retired
//! - **Telemetry**: Timestamped events for an external viewer
//!
//! # Usage
//!
//! ```ignore
//! let sink = Arc::new(Recorder::new());
//! let mut sim = Simulation::start(settings, FloodProtocol::default(), sink)?;
//! sim.run().await?;
//! ```

mod context;
mod control;
mod error;
mod event;
mod flood;
mod node;
mod packet;
mod protocol;
mod queue;
mod random;
mod schedule;
mod settings;
mod simulation;
mod telemetry;
mod trust;

pub use context::SimContext;
pub use control::{DrainOutcome, RunControl, RunState};
pub use error::{Result, SimError};
pub use event::{Callback, Event, EventKind, FunctionCall};
pub use flood::{FloodConfig, FloodProtocol};
pub use node::{Address, NodeState, NodeStore, NodeSummary, PeerAddress, PeerData, Position};
pub use packet::{Packet, PacketKind, Payload};
pub use protocol::{Collaborator, Outcome, Outgoing, ProtocolError};
pub use queue::EventQueue;
pub use random::{
    stream_seed, Mulberry32, RandomStreams, BLOCK_COLORS, BLOCK_IDS, BOOTSTRAP, DISCOVERY,
    POSITIONS,
};
pub use schedule::{ADMISSION, DISCOVERY_CALL};
pub use settings::SimulationSettings;
pub use simulation::{NetworkSnapshot, Simulation};
pub use telemetry::{BroadcastSink, NullSink, Recorder, TelemetryEvent, TelemetrySink};
pub use trust::TrustReport;
