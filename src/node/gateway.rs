//! Broadcast gateway
//!
//! Fans the node's state out to every connected observer (render clients and
//! neighbor coordinators alike). Never mutates simulation state, except that
//! the last observer leaving stops the simulation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::cell::SimulationCell;
use super::coordinator::RestartSignal;
use super::pendulum::{LifecycleObserver, Pendulum};
use crate::consts::OBSERVER_BUFFER;
use crate::messages::{PositionMessage, StreamMessage};
use crate::settings::NodeSettings;
use crate::sim::{Phase, Snapshot};

pub struct Gateway {
    cell: Arc<SimulationCell>,
    pendulum: Arc<Pendulum>,
    tx: broadcast::Sender<StreamMessage>,
    observers: AtomicUsize,
    position_rate_ms: u64,
    poll_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(cell: Arc<SimulationCell>, pendulum: Arc<Pendulum>, settings: &NodeSettings) -> Self {
        let (tx, _) = broadcast::channel(OBSERVER_BUFFER);
        Self {
            cell,
            pendulum,
            tx,
            observers: AtomicUsize::new(0),
            position_rate_ms: settings.position_rate_ms,
            poll_interval: settings.poll_interval(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the poll task and forward restart signals as `Restarting`
    pub fn spawn(self: &Arc<Self>, mut restarts: broadcast::Receiver<RestartSignal>) {
        let poller = Arc::downgrade(self);
        let period = self.poll_interval;
        let poll = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_theta = None;
            loop {
                ticker.tick().await;
                let Some(gateway) = poller.upgrade() else { break };
                gateway.poll(&mut last_theta);
            }
        });

        let forwarder = Arc::downgrade(self);
        let forward = tokio::spawn(async move {
            loop {
                match restarts.recv().await {
                    Ok(RestartSignal) => {
                        let Some(gateway) = forwarder.upgrade() else { break };
                        gateway.send_phase(Phase::Restarting);
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.lock_tasks().extend([poll, forward]);
    }

    /// Register an observer.
    ///
    /// The session first yields the position rate hint, then, if the node
    /// has ever been started, the latest position and phase.
    pub fn connect(self: &Arc<Self>) -> ObserverSession {
        let rx = self.tx.subscribe();
        let count = self.observers.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Observer connected ({count} total)");

        let mut initial = VecDeque::from([StreamMessage::rate(self.position_rate_ms)]);
        let snapshot = self.cell.snapshot();
        if let Some(position) = position_of(&snapshot) {
            initial.push_back(StreamMessage::Position(position));
            initial.push_back(StreamMessage::phase(snapshot.phase()));
        }

        ObserverSession {
            gateway: Arc::clone(self),
            initial,
            rx,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    /// Emit a position if stepping and the angle moved since the last emission
    fn poll(&self, last_theta: &mut Option<f64>) {
        let snapshot = self.cell.snapshot();
        if snapshot.phase() != Phase::Started {
            return;
        }
        let Some(position) = position_of(&snapshot) else { return };
        if *last_theta == Some(position.theta) {
            return;
        }
        *last_theta = Some(position.theta);
        self.broadcast(StreamMessage::Position(position));
    }

    fn send_phase(&self, phase: Phase) {
        log::debug!("Simulation {}", phase.as_str());
        self.broadcast(StreamMessage::phase(phase));
    }

    fn broadcast(&self, message: StreamMessage) {
        // Err only means nobody is connected
        let _ = self.tx.send(message);
    }

    fn disconnect(&self) {
        let remaining = self.observers.fetch_sub(1, Ordering::SeqCst) - 1;
        log::debug!("Observer disconnected ({remaining} left)");
        if remaining == 0 {
            log::info!("Last observer left, stopping simulation");
            self.pendulum.stop();
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LifecycleObserver for Gateway {
    fn on_transition(&self, snapshot: &Snapshot) {
        self.send_phase(snapshot.phase());
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}

fn position_of(snapshot: &Snapshot) -> Option<PositionMessage> {
    let (config, state) = snapshot.running()?;
    Some(PositionMessage {
        theta: state.theta,
        wind: state.wind,
        length: config.length,
        mass: config.mass,
    })
}

/// One connected observer; dropping it disconnects
pub struct ObserverSession {
    gateway: Arc<Gateway>,
    initial: VecDeque<StreamMessage>,
    rx: broadcast::Receiver<StreamMessage>,
}

impl ObserverSession {
    /// Next message, or `None` once the gateway is gone
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        if let Some(message) = self.initial.pop_front() {
            return Some(message);
        }
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Observer lagging, skipped {skipped} messages");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for ObserverSession {
    fn drop(&mut self) {
        self.gateway.disconnect();
    }
}
