//! Simulation state and lifecycle phases
//!
//! A `SimulationState` is never patched: every step produces a whole new value.

use serde::{Deserialize, Serialize};

use super::config::PendulumConfig;

/// Lifecycle phase as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Stepping timer active
    Started,
    /// No stepping timer, time has advanced
    Paused,
    /// No stepping timer, time is zero
    Stopped,
    /// Transient phase broadcast while the cluster restart protocol waits
    Restarting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Started => "started",
            Phase::Paused => "paused",
            Phase::Stopped => "stopped",
            Phase::Restarting => "restarting",
        }
    }
}

/// Physical state of one pendulum at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Simulated time since start (s)
    pub time: f64,
    /// Angle (rad)
    pub theta: f64,
    /// Angular velocity (rad/s)
    pub omega: f64,
    /// Wind torque sample used by the last step
    pub wind: f64,
}

impl SimulationState {
    /// Zeroed state derived from a config
    pub fn initial(config: &PendulumConfig) -> Self {
        Self {
            time: 0.0,
            theta: config.theta,
            omega: 0.0,
            wind: 0.0,
        }
    }
}

/// Consistent read of a node's config, state, and stepping flag
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub config: Option<PendulumConfig>,
    pub state: Option<SimulationState>,
    /// Whether the stepping timer is active
    pub active: bool,
}

impl Snapshot {
    /// Derive the observable phase.
    ///
    /// Total over every `(active, state)` pair; never yields `Restarting`,
    /// which is only ever broadcast by the restart protocol.
    pub fn phase(&self) -> Phase {
        if self.active {
            return Phase::Started;
        }
        match self.state {
            Some(state) if state.time != 0.0 => Phase::Paused,
            _ => Phase::Stopped,
        }
    }

    /// Config and state together, if the node has been started
    pub fn running(&self) -> Option<(PendulumConfig, SimulationState)> {
        match (self.config, self.state) {
            (Some(config), Some(state)) => Some((config, state)),
            _ => None,
        }
    }
}
