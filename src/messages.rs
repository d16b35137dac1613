//! Wire messages
//!
//! Everything crossing a node boundary is JSON. Stream messages go to
//! observers and neighbor coordinators; control requests go to a node's
//! control surface.

use serde::{Deserialize, Serialize};

use crate::sim::{PendulumConfig, Phase, PendulumPose};

/// Advisory polling/interpolation hint, sent once per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRateMessage {
    /// Milliseconds
    pub rate: u64,
}

/// Current pendulum position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionMessage {
    pub theta: f64,
    pub wind: f64,
    pub length: f64,
    pub mass: f64,
}

impl PositionMessage {
    pub fn pose(&self) -> PendulumPose {
        PendulumPose::new(self.theta, self.length, self.mass)
    }
}

/// Lifecycle phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStateMessage {
    pub state: Phase,
}

/// Messages streamed from a node's gateway
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    PositionRate(PositionRateMessage),
    Position(PositionMessage),
    SimulationState(SimulationStateMessage),
}

impl StreamMessage {
    pub fn rate(rate: u64) -> Self {
        StreamMessage::PositionRate(PositionRateMessage { rate })
    }

    pub fn phase(state: Phase) -> Self {
        StreamMessage::SimulationState(SimulationStateMessage { state })
    }
}

/// Request to a node's control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ControlRequest {
    Start { config: PendulumConfig },
    Continue,
    Pause,
    Stop,
    /// Turn the connection into an observer stream
    Subscribe,
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::Start { .. } => "start",
            ControlRequest::Continue => "continue",
            ControlRequest::Pause => "pause",
            ControlRequest::Stop => "stop",
            ControlRequest::Subscribe => "subscribe",
        }
    }
}

/// Reply to a control request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    pub fn ok() -> Self {
        Self { ok: true, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}
