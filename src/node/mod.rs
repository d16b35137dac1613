//! Per-node runtime
//!
//! Dependency order (leaves first): `Pendulum` → `Coordinator` → `Gateway`.
//! The Pendulum is the only writer of the shared `SimulationCell`; the
//! Coordinator and Gateway read snapshots and follow its lifecycle through
//! `LifecycleObserver` hooks.

pub mod cell;
pub mod coordinator;
pub mod gateway;
pub mod pendulum;

pub use cell::SimulationCell;
pub use coordinator::{Coordinator, RestartCounts, RestartSignal};
pub use gateway::{Gateway, ObserverSession};
pub use pendulum::{LifecycleObserver, Pendulum, StepTiming};

use std::sync::Arc;

use crate::error::Result;
use crate::settings::NodeSettings;
use crate::sim::{PendulumConfig, Snapshot};
use crate::transport::{ControlClient, PositionFeed};

/// One pendulum node: state machine, collision coordinator, and gateway
pub struct Node {
    settings: NodeSettings,
    pendulum: Arc<Pendulum>,
    coordinator: Arc<Coordinator>,
    gateway: Arc<Gateway>,
}

impl Node {
    /// Assemble a node and start its gateway tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        settings: NodeSettings,
        control: Arc<dyn ControlClient>,
        feed: Arc<dyn PositionFeed>,
    ) -> Result<Arc<Self>> {
        settings.validate()?;

        let cell = Arc::new(SimulationCell::new());
        let pendulum = Arc::new(Pendulum::new(
            Arc::clone(&cell),
            StepTiming::from_settings(&settings),
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&cell),
            settings.clone(),
            control,
            feed,
        ));
        let gateway = Arc::new(Gateway::new(cell, Arc::clone(&pendulum), &settings));

        let coordinator_hook = Arc::downgrade(&coordinator);
        pendulum.observe(coordinator_hook);
        let gateway_hook = Arc::downgrade(&gateway);
        pendulum.observe(gateway_hook);
        gateway.spawn(coordinator.restart_signals());

        log::info!(
            "Node {} of {} ready at {}",
            settings.index,
            settings.addresses.len(),
            settings.own_address().unwrap_or("?")
        );

        Ok(Arc::new(Self {
            settings,
            pendulum,
            coordinator,
            gateway,
        }))
    }

    pub fn address(&self) -> &str {
        self.settings.own_address().unwrap_or_default()
    }

    pub fn start(&self, config: PendulumConfig) -> Result<()> {
        self.pendulum.start(config)?;
        Ok(())
    }

    /// The `continue` operation
    pub fn resume(&self) {
        self.pendulum.resume();
    }

    pub fn pause(&self) {
        self.pendulum.pause();
    }

    pub fn stop(&self) {
        self.pendulum.stop();
    }

    pub fn snapshot(&self) -> Snapshot {
        self.pendulum.snapshot()
    }

    /// Connect a new observer to this node's stream
    pub fn connect(&self) -> ObserverSession {
        self.gateway.connect()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn restart_stats(&self) -> RestartCounts {
        self.coordinator.stats()
    }
}
