//! Static node settings
//!
//! Loaded once at process start from a JSON file shared by every node in the
//! row; only `index` differs between nodes. Immutable afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::consts::*;
use crate::error::{PendulumError, Result};
use crate::transport::RetryConfig;

/// Topology and timing for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Ordered node addresses; position in the list is the node's place in the row
    pub addresses: Vec<String>,
    /// This node's index into `addresses`
    pub index: usize,
    /// Distance between adjacent pivots (m)
    pub spacing: f64,
    /// Gravitational acceleration (m/s²)
    pub gravity: f64,
    /// Nominal simulation timestep (ms)
    pub step_ms: u64,
    /// Gateway poll interval (ms)
    pub poll_ms: u64,
    /// Position rate hint sent to observers (ms)
    pub position_rate_ms: u64,
    /// Wait between cluster stop and continue during a collision restart (ms)
    pub collide_timeout_ms: u64,
    /// Neighbor reconnection policy
    pub retry: RetryConfig,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            index: 0,
            spacing: DEFAULT_SPACING,
            gravity: DEFAULT_GRAVITY,
            step_ms: DEFAULT_STEP_MS,
            poll_ms: DEFAULT_POLL_MS,
            position_rate_ms: DEFAULT_POSITION_RATE_MS,
            collide_timeout_ms: DEFAULT_COLLIDE_TIMEOUT_MS,
            retry: RetryConfig::default(),
        }
    }
}

impl NodeSettings {
    /// Settings for node `index` of the given row
    pub fn new(addresses: Vec<String>, index: usize) -> Self {
        Self {
            addresses,
            index,
            ..Self::default()
        }
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&json)?;
        log::info!(
            "Loaded settings from {} ({} nodes)",
            path.display(),
            settings.addresses.len()
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(PendulumError::Settings("addresses must not be empty".into()));
        }
        if self.index >= self.addresses.len() {
            return Err(PendulumError::Settings(format!(
                "index {} out of range for {} addresses",
                self.index,
                self.addresses.len()
            )));
        }
        if !(self.spacing.is_finite() && self.spacing > 0.0) {
            return Err(PendulumError::Settings(format!(
                "spacing must be > 0, got {}",
                self.spacing
            )));
        }
        if !(self.gravity.is_finite() && self.gravity > 0.0) {
            return Err(PendulumError::Settings(format!(
                "gravity must be > 0, got {}",
                self.gravity
            )));
        }
        if self.step_ms == 0 || self.poll_ms == 0 {
            return Err(PendulumError::Settings(
                "step_ms and poll_ms must be > 0".into(),
            ));
        }
        self.retry.validate()
    }

    /// This node's own address
    pub fn own_address(&self) -> Option<&str> {
        self.addresses.get(self.index).map(String::as_str)
    }

    /// Address of the left neighbor, if any
    pub fn left_neighbor(&self) -> Option<&str> {
        self.index
            .checked_sub(1)
            .and_then(|i| self.addresses.get(i))
            .map(String::as_str)
    }

    /// Address of the right neighbor, if any
    pub fn right_neighbor(&self) -> Option<&str> {
        self.addresses.get(self.index + 1).map(String::as_str)
    }

    /// Timestep in seconds, as fed to the integrator
    pub fn step_seconds(&self) -> f64 {
        self.step_ms as f64 / 1000.0
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn collide_timeout(&self) -> Duration {
        Duration::from_millis(self.collide_timeout_ms)
    }
}
