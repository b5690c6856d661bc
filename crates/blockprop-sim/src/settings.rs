//! Run settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Configuration for one simulation run.
///
/// Times are logical milliseconds unless noted otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Number of nodes admitted before admission stops
    pub node_count: usize,
    /// Milliseconds of delay per unit of distance
    pub propagation_speed: f64,
    /// Logical time between admission rounds
    pub admission_interval: f64,
    /// Nodes admitted per round
    pub admission_batch: usize,
    /// Logical time between block discoveries
    pub discovery_interval: f64,
    /// Seed for every random stream
    pub seed: u32,
    /// Side length of the square nodes are placed in
    pub world_size: f64,
    /// Existing addresses handed to a newly admitted node
    pub bootstrap_peers: usize,
    /// Stop draining once the next event lies beyond this time
    pub stop_at: Option<f64>,
    /// Wall-clock milliseconds of draining before yielding to the host
    pub slice_budget_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            node_count: 30,
            propagation_speed: 2.0,
            admission_interval: 250.0,
            admission_batch: 1,
            discovery_interval: 1_500.0,
            seed: 42,
            world_size: 100.0,
            bootstrap_peers: 4,
            stop_at: None,
            slice_budget_ms: 16,
        }
    }
}

impl SimulationSettings {
    /// Reject settings that would stall or reorder the timeline.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(SimError::InvalidSettings(format!(
                    "{name} must be positive and finite, got {value}"
                )))
            }
        };
        positive("admission_interval", self.admission_interval)?;
        positive("discovery_interval", self.discovery_interval)?;
        positive("world_size", self.world_size)?;

        if !self.propagation_speed.is_finite() || self.propagation_speed < 0.0 {
            return Err(SimError::InvalidSettings(format!(
                "propagation_speed must be non-negative, got {}",
                self.propagation_speed
            )));
        }
        if self.admission_batch == 0 {
            return Err(SimError::InvalidSettings(
                "admission_batch must be at least 1".into(),
            ));
        }
        if let Some(stop) = self.stop_at {
            if stop.is_nan() {
                return Err(SimError::InvalidSettings("stop_at is NaN".into()));
            }
        }
        Ok(())
    }

    /// Draining budget before yielding.
    pub fn slice_budget(&self) -> Duration {
        Duration::from_millis(self.slice_budget_ms)
    }
}
