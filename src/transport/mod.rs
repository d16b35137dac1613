//! Transport seams between nodes
//!
//! The node runtime only depends on two async traits:
//! - `ControlClient`: issue start/continue/pause/stop to a node by address
//! - `PositionFeed`: subscribe to a node's Position stream
//!
//! `memory` wires nodes together in one process; `tcp` speaks
//! newline-delimited JSON over TCP.

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{PendulumError, Result};
use crate::messages::PositionMessage;
use crate::sim::PendulumConfig;

/// Request/response control of a node addressed by its network location
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn start(&self, address: &str, config: PendulumConfig) -> Result<()>;

    /// The `continue` operation
    async fn resume(&self, address: &str) -> Result<()>;

    async fn pause(&self, address: &str) -> Result<()>;

    async fn stop(&self, address: &str) -> Result<()>;
}

/// Source of a node's Position stream.
///
/// Every Position message the node emits must be delivered; dropping the
/// returned receiver closes the subscription.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<PositionMessage>>;
}

/// Reconnection policy for neighbor subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before the neighbor is treated as absent
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Reject policies whose backoff cannot be turned into a `Duration`
    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(PendulumError::Settings(format!(
                "retry.backoff_multiplier must be finite and >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(PendulumError::Settings(format!(
                "retry.max_delay_ms ({}) must be >= retry.initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }

    /// Delay to wait after `delay`, capped at `max_delay_ms`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let max_delay = Duration::from_millis(self.max_delay_ms);
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .map_or(max_delay, |next| next.min(max_delay))
    }
}
