//! Pendulum Row - a row of independent pendulum nodes
//!
//! Core modules:
//! - `sim`: Deterministic physics (integrator, collision geometry, phases)
//! - `node`: Per-node runtime (stepping state machine, collision coordinator, broadcast gateway)
//! - `transport`: Control and position-stream seams, with in-memory and TCP implementations
//! - `messages`: Wire messages exchanged with observers and other nodes
//! - `settings`: Static node topology and timing

pub mod error;
pub mod messages;
pub mod node;
pub mod settings;
pub mod sim;
pub mod transport;

pub use error::{ConfigError, PendulumError, Result};
pub use node::Node;
pub use settings::NodeSettings;
pub use sim::{PendulumConfig, Phase, SimulationState};

/// Node configuration constants
pub mod consts {
    /// Gravitational acceleration (m/s²)
    pub const DEFAULT_GRAVITY: f64 = 9.81;
    /// Nominal simulation timestep (ms)
    pub const DEFAULT_STEP_MS: u64 = 20;
    /// Gateway poll interval (ms)
    pub const DEFAULT_POLL_MS: u64 = 50;
    /// Rendering/interpolation hint sent to every observer (ms)
    pub const DEFAULT_POSITION_RATE_MS: u64 = 200;
    /// Wait between the cluster-wide stop and continue (ms)
    pub const DEFAULT_COLLIDE_TIMEOUT_MS: u64 = 5000;
    /// Distance between adjacent pivots (m)
    pub const DEFAULT_SPACING: f64 = 1.0;
    /// Buffered messages per observer before it starts lagging
    pub const OBSERVER_BUFFER: usize = 256;
    /// Upper bound on one TCP control round trip (ms)
    pub const CONTROL_TIMEOUT_MS: u64 = 2000;
}
