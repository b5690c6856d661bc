//! Top-level simulation handle: context plus collaborator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::SimContext;
use crate::control::{DrainOutcome, RunControl, RunState};
use crate::error::Result;
use crate::event::Event;
use crate::node::NodeSummary;
use crate::protocol::Collaborator;
use crate::schedule;
use crate::settings::SimulationSettings;
use crate::telemetry::TelemetrySink;

/// Point-in-time view of the whole network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub at: f64,
    pub state: RunState,
    pub nodes: Vec<NodeSummary>,
    pub queued: usize,
    pub processed: u64,
}

/// A run driven by one collaborator.
pub struct Simulation<C> {
    ctx: SimContext,
    collaborator: C,
}

impl<C: Collaborator> Simulation<C> {
    /// Create an empty run. Nothing is scheduled yet.
    pub fn new(
        settings: SimulationSettings,
        collaborator: C,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        Self::with_control(settings, collaborator, telemetry, RunControl::new())
    }

    /// Create an empty run sharing an existing control handle.
    pub fn with_control(
        settings: SimulationSettings,
        collaborator: C,
        telemetry: Arc<dyn TelemetrySink>,
        control: RunControl,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            ctx: SimContext::new(settings, telemetry, control),
            collaborator,
        })
    }

    /// Create a run with admission and discovery scheduled.
    pub fn start(
        settings: SimulationSettings,
        collaborator: C,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let mut sim = Self::new(settings, collaborator, telemetry)?;
        sim.schedule_start();
        Ok(sim)
    }

    /// Schedule the periodic admission and discovery calls.
    pub fn schedule_start(&mut self) {
        let settings = self.ctx.settings();
        info!(
            nodes = settings.node_count,
            seed = settings.seed,
            speed = settings.propagation_speed,
            "starting simulation"
        );
        schedule::start(&mut self.ctx);
    }

    pub fn control(&self) -> &RunControl {
        self.ctx.control()
    }

    pub fn collaborator(&self) -> &C {
        &self.collaborator
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SimContext {
        &mut self.ctx
    }

    /// Set the pause flag. Takes effect after the current event.
    pub fn pause(&self) {
        self.ctx.control().pause();
    }

    /// Clear the pause flag and drain from the next pending event.
    pub async fn resume(&mut self) -> Result<DrainOutcome> {
        self.ctx.control().resume();
        self.dequeue().await
    }

    /// Add events and drain.
    pub async fn enqueue(&mut self, events: impl IntoIterator<Item = Event>) -> Result<DrainOutcome> {
        self.ctx.queue.extend(events);
        self.dequeue().await
    }

    /// Drain until idle, paused, or past the horizon.
    pub async fn dequeue(&mut self) -> Result<DrainOutcome> {
        self.ctx.dequeue(&self.collaborator).await
    }

    /// Drain every event up to logical time `until`.
    pub async fn advance_to(&mut self, until: f64) -> Result<DrainOutcome> {
        self.ctx.dequeue_until(&self.collaborator, Some(until)).await
    }

    /// Drain, waiting out pauses, until the queue empties or the horizon is
    /// reached.
    pub async fn run(&mut self) -> Result<DrainOutcome> {
        loop {
            match self.dequeue().await? {
                DrainOutcome::Paused => {
                    let control = self.ctx.control().clone();
                    control.resumed().await;
                }
                outcome => return Ok(outcome),
            }
        }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            at: self.ctx.now(),
            state: self.ctx.control().state(),
            nodes: self.ctx.nodes.iter().map(|n| n.summary()).collect(),
            queued: self.ctx.queue.len(),
            processed: self.ctx.processed(),
        }
    }
}

impl<C> std::fmt::Debug for Simulation<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flood::FloodProtocol;
    use crate::telemetry::NullSink;

    fn settings() -> SimulationSettings {
        SimulationSettings {
            node_count: 4,
            stop_at: Some(2_000.0),
            ..SimulationSettings::default()
        }
    }

    #[test]
    fn invalid_settings_rejected() {
        let bad = SimulationSettings {
            admission_interval: 0.0,
            ..SimulationSettings::default()
        };
        assert!(Simulation::new(bad, FloodProtocol::default(), Arc::new(NullSink)).is_err());
    }

    #[test]
    fn start_schedules_periodic_calls() {
        let sim = Simulation::start(settings(), FloodProtocol::default(), Arc::new(NullSink)).unwrap();
        let snapshot = sim.snapshot();
        assert_eq!(snapshot.queued, 2);
        assert!(snapshot.nodes.is_empty());
        assert_eq!(snapshot.state, RunState::Idle);
    }

    #[tokio::test]
    async fn run_stops_at_horizon() {
        let mut sim =
            Simulation::start(settings(), FloodProtocol::default(), Arc::new(NullSink)).unwrap();
        assert_eq!(sim.run().await.unwrap(), DrainOutcome::Horizon);

        let snapshot = sim.snapshot();
        assert_eq!(snapshot.nodes.len(), 4);
        assert_eq!(snapshot.state, RunState::Finished);
        assert!(snapshot.at <= 2_000.0);
    }

    #[tokio::test]
    async fn advance_moves_in_windows() {
        let mut sim =
            Simulation::start(settings(), FloodProtocol::default(), Arc::new(NullSink)).unwrap();
        assert_eq!(sim.advance_to(600.0).await.unwrap(), DrainOutcome::Stepped);
        assert_eq!(sim.snapshot().nodes.len(), 3);
        assert!(sim.context().now() <= 600.0);
        assert_eq!(sim.snapshot().state, RunState::Draining);

        assert_eq!(sim.advance_to(5_000.0).await.unwrap(), DrainOutcome::Horizon);
        assert_eq!(sim.snapshot().nodes.len(), 4);
    }

    #[tokio::test]
    async fn paused_run_drains_on_resume() {
        let mut sim =
            Simulation::start(settings(), FloodProtocol::default(), Arc::new(NullSink)).unwrap();
        sim.pause();
        assert_eq!(sim.dequeue().await.unwrap(), DrainOutcome::Paused);
        assert_eq!(sim.snapshot().processed, 0);
        assert_eq!(sim.control().state(), RunState::Paused);

        assert_eq!(sim.resume().await.unwrap(), DrainOutcome::Horizon);
        assert!(sim.snapshot().processed > 0);
    }
}
