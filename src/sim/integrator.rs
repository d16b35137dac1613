//! Fixed-step pendulum integrator
//!
//! Damped, wind-driven pendulum:
//!
//! ```text
//! theta' = omega
//! omega' = -(g / L) sin(theta) - damping * omega + wind(t) * cos(windFreq * dt)
//! ```
//!
//! Advanced with fourth-order Runge-Kutta. All four stages share the wind
//! sample taken at the new time `t + dt`; it is not re-sampled per stage.

use std::f64::consts::PI;

use super::config::PendulumConfig;
use super::state::SimulationState;

/// Bounded wind driving term.
///
/// The sum of two sines with an irrational frequency ratio never repeats,
/// so the pendulum is not driven at a steady resonance.
#[inline]
pub fn wind_amplitude(t: f64, config: &PendulumConfig) -> f64 {
    ((2.0 * t * config.wind_freq).sin() + (PI * t * config.wind_freq).sin()) / 2.0
        * config.max_wind
}

/// Angular acceleration for a given angle/velocity and a fixed wind sample
#[inline]
fn omega_dot(theta: f64, omega: f64, wind: f64, dt: f64, gravity: f64, config: &PendulumConfig) -> f64 {
    -gravity / config.length * theta.sin() - config.damping * omega
        + wind * (config.wind_freq * dt).cos()
}

/// Advance one fixed timestep `dt` (seconds).
pub fn advance(
    config: &PendulumConfig,
    state: &SimulationState,
    dt: f64,
    gravity: f64,
) -> SimulationState {
    let time = state.time + dt;
    let wind = wind_amplitude(time, config);
    let accel = |theta: f64, omega: f64| omega_dot(theta, omega, wind, dt, gravity, config);

    let k1 = state.omega;
    let l1 = accel(state.theta, state.omega);

    let k2 = state.omega + 0.5 * dt * l1;
    let l2 = accel(state.theta + 0.5 * dt * k1, k2);

    let k3 = state.omega + 0.5 * dt * l2;
    let l3 = accel(state.theta + 0.5 * dt * k2, k3);

    // Full step on purpose: a half step in stage 4 would no longer be RK4
    let k4 = state.omega + dt * l3;
    let l4 = accel(state.theta + dt * k3, k4);

    SimulationState {
        time,
        theta: state.theta + (k1 + 2.0 * k2 + 2.0 * k3 + k4) * dt / 6.0,
        omega: state.omega + (l1 + 2.0 * l2 + 2.0 * l3 + l4) * dt / 6.0,
        wind,
    }
}
