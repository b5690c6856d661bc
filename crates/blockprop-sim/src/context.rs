//! The simulation context and its drain loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use blockprop_ledger::{Block, BlockId};
use tracing::{debug, error, trace};

use crate::control::{DrainOutcome, RunControl, RunState};
use crate::error::{Result, SimError};
use crate::event::{Event, EventKind};
use crate::node::{Address, NodeState, NodeStore};
use crate::packet::{Packet, Payload};
use crate::protocol::{Collaborator, Outcome, Outgoing, ProtocolError};
use crate::queue::EventQueue;
use crate::random::RandomStreams;
use crate::settings::SimulationSettings;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::trust;

/// Everything a run owns: clock, nodes, pending events, randomness and the
/// telemetry sink. Passed by reference to every scheduled call.
pub struct SimContext {
    settings: SimulationSettings,
    clock: f64,
    pub nodes: NodeStore,
    pub queue: EventQueue,
    pub random: RandomStreams,
    telemetry: Arc<dyn TelemetrySink>,
    control: RunControl,
    halted: Option<String>,
    processed: u64,
}

impl SimContext {
    pub fn new(
        settings: SimulationSettings,
        telemetry: Arc<dyn TelemetrySink>,
        control: RunControl,
    ) -> Self {
        let random = RandomStreams::new(settings.seed);
        Self {
            settings,
            clock: 0.0,
            nodes: NodeStore::new(),
            queue: EventQueue::new(),
            random,
            telemetry,
            control,
            halted: None,
            processed: 0,
        }
    }

    /// Current logical time.
    pub fn now(&self) -> f64 {
        self.clock
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Events dispatched so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// The fatal error that stopped the run, if any.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Best-effort telemetry.
    pub fn emit(&self, event: TelemetryEvent) {
        self.telemetry.emit(event);
    }

    /// Log to tracing and to telemetry.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(at = self.clock, "{message}");
        self.emit(TelemetryEvent::Log {
            at: self.clock,
            message,
        });
    }

    /// Schedule a function call at absolute time `at`.
    pub fn schedule<F>(&mut self, at: f64, label: &'static str, call: F)
    where
        F: FnOnce(&mut SimContext) -> Result<()> + Send + 'static,
    {
        self.queue.push(Event::call(at, label, call));
    }

    /// Schedule a function call `delay` after now.
    pub fn schedule_in<F>(&mut self, delay: f64, label: &'static str, call: F)
    where
        F: FnOnce(&mut SimContext) -> Result<()> + Send + 'static,
    {
        self.schedule(self.clock + delay, label, call);
    }

    /// Queue a self-addressed signal for delivery now.
    pub fn signal(&mut self, node: Address, payload: Payload) {
        let packet = Packet::internal(node, payload);
        self.queue.push(Event::deliver(self.clock, packet));
    }

    /// Put a packet from `sender` on the network.
    ///
    /// Records the send time on the sender's peer entry and emits in-flight
    /// telemetry, except for self-addressed packets.
    pub fn send(&mut self, sender: &mut NodeState, out: Outgoing) -> Result<()> {
        let packet = if out.to == sender.address {
            Packet::internal(sender.address, out.payload)
        } else {
            let Some(to_pos) = self.nodes.position(out.to) else {
                return Err(SimError::Collaborator {
                    node: sender.address,
                    packet: format!("{:?} -> {}", out.payload.kind(), out.to),
                    source: ProtocolError::new(format!("send to unknown node {}", out.to)),
                });
            };
            Packet::new(
                (sender.address, sender.position),
                (out.to, to_pos),
                self.settings.propagation_speed,
                out.payload,
            )
        };

        let arrives_at = self.clock + packet.delay();
        if !packet.is_internal() {
            if let Some(peer) = sender.peers.get_mut(&packet.to()) {
                peer.last_send = Some(self.clock);
            }
            self.emit(TelemetryEvent::PacketInFlight {
                at: self.clock,
                from: packet.from(),
                to: packet.to(),
                kind: packet.kind(),
                arrives_at,
            });
        }
        self.queue.push(Event::deliver(arrives_at, packet));
        Ok(())
    }

    /// Drain pending events in chronological order.
    ///
    /// A call made while a drain is already running returns
    /// [`DrainOutcome::AlreadyDraining`] without doing anything. After the
    /// configured wall-clock budget the loop yields to the runtime and then
    /// carries on. The first error halts the run for good.
    pub async fn dequeue<C: Collaborator>(&mut self, collaborator: &C) -> Result<DrainOutcome> {
        self.dequeue_until(collaborator, None).await
    }

    /// Like [`SimContext::dequeue`], but also stops with
    /// [`DrainOutcome::Stepped`] before any event later than `until`.
    pub async fn dequeue_until<C: Collaborator>(
        &mut self,
        collaborator: &C,
        until: Option<f64>,
    ) -> Result<DrainOutcome> {
        if let Some(reason) = &self.halted {
            return Err(SimError::Halted {
                reason: reason.clone(),
            });
        }
        if !self.queue.begin_drain() {
            return Ok(DrainOutcome::AlreadyDraining);
        }
        self.control.set_state(RunState::Draining);

        let result = self.drain(collaborator, until).await;
        self.queue.end_drain();

        match &result {
            Ok(outcome) => self.control.set_state(match outcome {
                DrainOutcome::Paused => RunState::Paused,
                DrainOutcome::Horizon => RunState::Finished,
                // More events are due; the caller is expected to step again.
                DrainOutcome::Stepped => RunState::Draining,
                DrainOutcome::Idle | DrainOutcome::AlreadyDraining => RunState::Idle,
            }),
            Err(err) => {
                error!(at = self.clock, error = %err, "simulation halted");
                self.halted = Some(err.to_string());
                self.control.set_state(RunState::Failed);
            }
        }
        result
    }

    async fn drain<C: Collaborator>(
        &mut self,
        collaborator: &C,
        until: Option<f64>,
    ) -> Result<DrainOutcome> {
        let budget = self.settings.slice_budget();
        let mut slice = Instant::now();

        loop {
            if self.control.is_paused() {
                return Ok(DrainOutcome::Paused);
            }
            let Some(next) = self.queue.peek_at() else {
                return Ok(DrainOutcome::Idle);
            };
            if self.settings.stop_at.is_some_and(|stop| next > stop) {
                return Ok(DrainOutcome::Horizon);
            }
            if until.is_some_and(|limit| next > limit) {
                return Ok(DrainOutcome::Stepped);
            }
            let Some(event) = self.queue.pop_earliest() else {
                return Ok(DrainOutcome::Idle);
            };

            self.clock = event.at;
            self.dispatch(event.kind, collaborator).await?;
            self.processed += 1;

            if slice.elapsed() >= budget {
                trace!(at = self.clock, pending = self.queue.len(), "yielding drain slice");
                tokio::task::yield_now().await;
                slice = Instant::now();
            }
        }
    }

    async fn dispatch<C: Collaborator>(&mut self, kind: EventKind, collaborator: &C) -> Result<()> {
        match kind {
            EventKind::Call(call) => {
                let label = call.label;
                trace!(at = self.clock, label, "function call");
                (call.call)(self).map_err(|source| SimError::Scheduled {
                    label,
                    source: Box::new(source),
                })
            }
            EventKind::Deliver(packet) => self.deliver(packet, collaborator).await,
        }
    }

    async fn deliver<C: Collaborator>(&mut self, packet: Packet, collaborator: &C) -> Result<()> {
        let node = packet.to();
        let mut state = self.nodes.take(node).ok_or(SimError::UnknownNode(node))?;

        if !packet.is_internal() {
            if let Some(peer) = state.peers.get_mut(&packet.from()) {
                peer.last_receive = Some(self.clock);
            }
        }

        // A failed delivery leaves the node as it was before the collaborator ran.
        let original = state.clone();
        match self.apply(node, packet, state, collaborator).await {
            Ok(next) => {
                self.nodes.restore(next);
                self.settle_trust()
            }
            Err(err) => {
                self.nodes.restore(original);
                Err(err)
            }
        }
    }

    async fn apply<C: Collaborator>(
        &mut self,
        node: Address,
        packet: Packet,
        state: NodeState,
        collaborator: &C,
    ) -> Result<NodeState> {
        let summary = packet.summary();
        trace!(at = self.clock, packet = %summary, "delivering");
        let peers_before = state.peer_addresses();
        let ids_before = state.ledger.ids();
        let received: Vec<Block> = match packet.payload() {
            Payload::BlockTransfer { blocks } => blocks.clone(),
            Payload::AddressGossip { .. } | Payload::NewBlockSignal { .. } => Vec::new(),
        };
        let position = state.position;

        let Outcome { state: mut next, send } = collaborator
            .process(packet, state, &mut self.random)
            .await
            .map_err(|source| SimError::Collaborator {
                node,
                packet: summary.clone(),
                source,
            })?;

        if next.address != node || next.position != position {
            return Err(SimError::Collaborator {
                node,
                packet: summary,
                source: ProtocolError::new("returned state for a different node"),
            });
        }

        // Every received block stays represented, whatever the protocol did.
        let ledger_err = |source| SimError::NodeLedger { node, source };
        for block in received {
            next.ledger.add(block).map_err(ledger_err)?;
        }
        next.ledger.tidy().map_err(ledger_err)?;

        for out in send {
            self.send(&mut next, out)?;
        }

        let peers_after = next.peer_addresses();
        if peers_after != peers_before {
            self.emit(TelemetryEvent::ConnectionChanged {
                at: self.clock,
                node,
                peers: peers_after,
            });
        }
        self.emit_chain_diff(node, &ids_before, &next);
        Ok(next)
    }

    fn emit_chain_diff(&self, node: Address, before: &BTreeSet<BlockId>, state: &NodeState) {
        let after = state.ledger.ids();
        let added: Vec<_> = after.difference(before).copied().collect();
        let removed: Vec<_> = before.difference(&after).copied().collect();
        if !added.is_empty() || !removed.is_empty() {
            self.emit(TelemetryEvent::ChainDiff {
                at: self.clock,
                node,
                added,
                removed,
            });
        }
    }

    /// Run trust aggregation across every node and report trimming.
    fn settle_trust(&mut self) -> Result<()> {
        let report = trust::aggregate(&mut self.nodes)?;
        if report.trimmed.is_empty() {
            return Ok(());
        }
        for (node, removed) in report.retired {
            self.emit(TelemetryEvent::ChainDiff {
                at: self.clock,
                node,
                added: Vec::new(),
                removed,
            });
        }
        let ids: Vec<String> = report.trimmed.iter().map(ToString::to_string).collect();
        self.log(format!("retired trusted prefix [{}]", ids.join(", ")));
        Ok(())
    }
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext")
            .field("clock", &self.clock)
            .field("nodes", &self.nodes.len())
            .field("pending", &self.queue.len())
            .field("processed", &self.processed)
            .field("halted", &self.halted)
            .finish()
    }
}
