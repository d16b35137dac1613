//! Deterministic pendulum simulation
//!
//! Pure code only: no timers, no I/O, no shared state.
//! - Fixed timestep only
//! - Every step yields a fresh `SimulationState`
//! - Collision geometry is symmetric in the pair being tested

pub mod collision;
pub mod config;
pub mod integrator;
pub mod state;

pub use collision::{PendulumPose, Side, bob_radius, out_of_reach, pendulums_collide};
pub use config::PendulumConfig;
pub use integrator::{advance, wind_amplitude};
pub use state::{Phase, SimulationState, Snapshot};
