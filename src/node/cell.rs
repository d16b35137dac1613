//! The single owned config/state cell of a node
//!
//! Readers only ever get a whole `Snapshot`; writes are crate-private and
//! performed by `Pendulum` alone.

use std::sync::{Mutex, MutexGuard};

use crate::sim::{PendulumConfig, SimulationState, Snapshot};

#[derive(Debug, Default)]
struct Slot {
    snapshot: Snapshot,
    /// Bumped whenever the stepping task is cancelled or replaced
    generation: u64,
}

#[derive(Debug, Default)]
pub struct SimulationCell {
    slot: Mutex<Slot>,
}

impl SimulationCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A panicked writer cannot leave a half-written snapshot (writes are single assignments)
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Full consistent read
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot
    }

    /// Install a config and its zeroed state
    pub(crate) fn install(&self, config: PendulumConfig) {
        let mut slot = self.lock();
        slot.snapshot.config = Some(config);
        slot.snapshot.state = Some(SimulationState::initial(&config));
    }

    /// Reset state from the current config, if there is one
    pub(crate) fn reset(&self) {
        let mut slot = self.lock();
        slot.snapshot.state = slot.snapshot.config.as_ref().map(SimulationState::initial);
    }

    /// Mark stepping active and return the generation the new task must carry
    pub(crate) fn activate(&self) -> u64 {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.snapshot.active = true;
        slot.generation
    }

    /// Mark stepping inactive; any task holding an older generation becomes inert
    pub(crate) fn deactivate(&self) {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.snapshot.active = false;
    }

    /// Apply one step if `generation` is still current.
    ///
    /// Returns the new state, or `None` when the task has been cancelled.
    pub(crate) fn step_with<F>(&self, generation: u64, step: F) -> Option<SimulationState>
    where
        F: FnOnce(&PendulumConfig, &SimulationState) -> SimulationState,
    {
        let mut slot = self.lock();
        if slot.generation != generation || !slot.snapshot.active {
            return None;
        }
        let (config, state) = slot.snapshot.running()?;
        let next = step(&config, &state);
        slot.snapshot.state = Some(next);
        Some(next)
    }
}
