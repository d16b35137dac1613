//! Error types
//!
//! Nothing here is fatal to a node: every failure degrades one node or one
//! neighbor pair and is reported through logging.

use std::io;
use thiserror::Error;

/// A `PendulumConfig` that failed validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be finite")]
    NotFinite { field: &'static str },

    #[error("{field} must be {bound}, got {value}")]
    OutOfRange {
        field: &'static str,
        bound: &'static str,
        value: f64,
    },
}

impl ConfigError {
    pub fn out_of_range(field: &'static str, bound: &'static str, value: f64) -> Self {
        Self::OutOfRange { field, bound, value }
    }
}

/// Errors surfaced by a pendulum node
#[derive(Debug, Error)]
pub enum PendulumError {
    /// Rejected pendulum configuration
    #[error("invalid pendulum config: {0}")]
    Config(#[from] ConfigError),

    /// Invalid static node settings
    #[error("invalid node settings: {0}")]
    Settings(String),

    /// A neighbor address is absent or could not be reached
    #[error("neighbor {address} unavailable: {reason}")]
    NeighborUnavailable { address: String, reason: String },

    /// A remote node rejected or failed a request
    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, PendulumError>;
