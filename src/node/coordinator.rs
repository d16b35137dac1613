//! Collision coordinator
//!
//! Follows the Position streams of the immediate left and right neighbors
//! while this pendulum is stepping, tests every update against the local
//! pendulum, and on collision runs the cluster restart protocol:
//!
//! 1. stop every node in the row (self included), concurrently
//! 2. once all stop calls resolve, signal `Restarting`
//! 3. after the collide timeout, continue every node
//!
//! There is no consensus. Several nodes may run the protocol at once; the
//! stop/continue operations are idempotent, so the result is redundant calls,
//! and each node's delay timer runs independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::cell::SimulationCell;
use super::pendulum::LifecycleObserver;
use crate::error::PendulumError;
use crate::messages::PositionMessage;
use crate::settings::NodeSettings;
use crate::sim::{PendulumPose, Side, pendulums_collide};
use crate::transport::{ControlClient, PositionFeed};

/// Emitted when all stop calls of a restart have resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartSignal;

/// Point-in-time copy of the restart counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartCounts {
    pub collisions: u64,
    pub restarts: u64,
    pub stop_failures: u64,
    pub continue_failures: u64,
}

/// Counters for collision handling
#[derive(Debug, Default)]
pub struct RestartStats {
    collisions: AtomicU64,
    restarts: AtomicU64,
    stop_failures: AtomicU64,
    continue_failures: AtomicU64,
}

impl RestartStats {
    pub fn counts(&self) -> RestartCounts {
        RestartCounts {
            collisions: self.collisions.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            stop_failures: self.stop_failures.load(Ordering::Relaxed),
            continue_failures: self.continue_failures.load(Ordering::Relaxed),
        }
    }
}

/// Where this node is in its own restart protocol
#[derive(Debug, Default)]
enum RestartSlot {
    #[default]
    Idle,
    /// Stop calls in flight
    Stopping,
    /// Waiting out the collide timeout before continuing everyone
    Waiting(JoinHandle<()>),
}

#[derive(Debug, Default)]
struct Links {
    left: Option<JoinHandle<()>>,
    right: Option<JoinHandle<()>>,
}

struct Shared {
    cell: Arc<SimulationCell>,
    settings: NodeSettings,
    control: Arc<dyn ControlClient>,
    feed: Arc<dyn PositionFeed>,
    restart: Mutex<RestartSlot>,
    signal: broadcast::Sender<RestartSignal>,
    stats: RestartStats,
}

pub struct Coordinator {
    shared: Arc<Shared>,
    links: Mutex<Links>,
}

impl Coordinator {
    pub fn new(
        cell: Arc<SimulationCell>,
        settings: NodeSettings,
        control: Arc<dyn ControlClient>,
        feed: Arc<dyn PositionFeed>,
    ) -> Self {
        let (signal, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                cell,
                settings,
                control,
                feed,
                restart: Mutex::new(RestartSlot::Idle),
                signal,
                stats: RestartStats::default(),
            }),
            links: Mutex::new(Links::default()),
        }
    }

    /// Open subscriptions to whichever neighbors exist and are not yet followed
    pub fn start(&self) {
        let mut links = self.lock_links();
        let settings = &self.shared.settings;
        if links.left.is_none() {
            links.left = settings
                .left_neighbor()
                .map(|address| self.follow(address.to_owned(), Side::Left));
        }
        if links.right.is_none() {
            links.right = settings
                .right_neighbor()
                .map(|address| self.follow(address.to_owned(), Side::Right));
        }
    }

    /// Close both subscriptions and cancel a pending restart timer
    pub fn stop(&self) {
        {
            let mut links = self.lock_links();
            for handle in [links.left.take(), links.right.take()].into_iter().flatten() {
                handle.abort();
            }
        }

        // A restart still in its stop fan-out is left alone: it stops this node too
        let mut slot = self.shared.lock_restart();
        if matches!(*slot, RestartSlot::Waiting(_)) {
            if let RestartSlot::Waiting(handle) = std::mem::take(&mut *slot) {
                handle.abort();
            }
            log::info!("Pending restart cancelled");
        }
    }

    /// Whether a subscription to the neighbor on `side` is open
    pub fn is_following(&self, side: Side) -> bool {
        let links = self.lock_links();
        match side {
            Side::Left => links.left.is_some(),
            Side::Right => links.right.is_some(),
        }
    }

    /// Whether this node's restart protocol is in progress
    pub fn restart_pending(&self) -> bool {
        !matches!(*self.shared.lock_restart(), RestartSlot::Idle)
    }

    /// Restart signals, one per restart whose stop phase completed
    pub fn restart_signals(&self) -> broadcast::Receiver<RestartSignal> {
        self.shared.signal.subscribe()
    }

    pub fn stats(&self) -> RestartCounts {
        self.shared.stats.counts()
    }

    /// Test a neighbor update against the local pendulum.
    ///
    /// Returns whether they collide. Does nothing without a config and state.
    pub fn check_neighbor(&self, side: Side, position: &PositionMessage) -> bool {
        Shared::check_neighbor(&self.shared, side, position)
    }

    fn follow(&self, address: String, side: Side) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(follow_neighbor(shared, address, side))
    }

    fn lock_links(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LifecycleObserver for Coordinator {
    fn on_resumed(&self) {
        self.start();
    }

    fn on_paused(&self) {
        self.stop();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock_restart(&self) -> MutexGuard<'_, RestartSlot> {
        self.restart.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_neighbor(this: &Arc<Self>, side: Side, position: &PositionMessage) -> bool {
        let Some((config, state)) = this.cell.snapshot().running() else {
            return false;
        };
        let own = PendulumPose::new(state.theta, config.length, config.mass);
        if !pendulums_collide(&own, &position.pose(), side, this.settings.spacing) {
            return false;
        }

        this.stats.collisions.fetch_add(1, Ordering::Relaxed);
        log::info!("Pendulum collided with {} neighbor", side.as_str());
        if config.stop_and_restart_on_collision {
            Shared::trigger_restart(this);
        }
        true
    }

    /// Begin the restart protocol unless one is already pending here
    fn trigger_restart(this: &Arc<Self>) -> bool {
        {
            let mut slot = this.lock_restart();
            if !matches!(*slot, RestartSlot::Idle) {
                return false;
            }
            *slot = RestartSlot::Stopping;
        }
        this.stats.restarts.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(Shared::run_restart(Arc::clone(this)));
        true
    }

    async fn run_restart(this: Arc<Self>) {
        let addresses = &this.settings.addresses;
        log::info!("Stopping {} nodes", addresses.len());

        let results = join_all(addresses.iter().map(|address| this.control.stop(address))).await;
        let failures = report_failures("stop", addresses, results);
        this.stats.stop_failures.fetch_add(failures, Ordering::Relaxed);

        log::info!("Restarting in {} ms", this.settings.collide_timeout_ms);
        // No receivers just means no gateway is listening
        let _ = this.signal.send(RestartSignal);

        let delay = this.settings.collide_timeout();
        let waiter = Arc::clone(&this);
        let mut slot = this.lock_restart();
        if matches!(*slot, RestartSlot::Stopping) {
            *slot = RestartSlot::Waiting(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                Shared::finish_restart(waiter).await;
            }));
        }
    }

    async fn finish_restart(this: Arc<Self>) {
        *this.lock_restart() = RestartSlot::Idle;

        let addresses = &this.settings.addresses;
        log::info!("Continuing {} nodes", addresses.len());
        let results = join_all(addresses.iter().map(|address| this.control.resume(address))).await;
        let failures = report_failures("continue", addresses, results);
        this.stats.continue_failures.fetch_add(failures, Ordering::Relaxed);
    }
}

/// Log each failed call; failures are not retried
fn report_failures(
    operation: &str,
    addresses: &[String],
    results: Vec<crate::error::Result<()>>,
) -> u64 {
    let mut failures = 0;
    for (address, result) in addresses.iter().zip(results) {
        if let Err(e) = result {
            failures += 1;
            log::warn!("Restart {operation} to {address} failed: {e}");
        }
    }
    failures
}

/// Keep a subscription to one neighbor open, reconnecting with backoff
async fn follow_neighbor(shared: Arc<Shared>, address: String, side: Side) {
    let retry = shared.settings.retry.clone();
    let mut attempts = 0;
    let mut delay = retry.initial_delay();

    loop {
        match shared.feed.subscribe(&address).await {
            Ok(mut positions) => {
                log::info!("Listening to {} neighbor {address}", side.as_str());
                attempts = 0;
                delay = retry.initial_delay();
                while let Some(position) = positions.recv().await {
                    Shared::check_neighbor(&shared, side, &position);
                }
                log::warn!("{} neighbor {address} closed its stream", side.as_str());
            }
            Err(e) => {
                attempts += 1;
                let unavailable = PendulumError::NeighborUnavailable {
                    address: address.clone(),
                    reason: e.to_string(),
                };
                if attempts >= retry.max_attempts {
                    log::warn!("{unavailable}; continuing without {} neighbor", side.as_str());
                    return;
                }
                log::warn!("{unavailable}; retry {attempts} in {} ms", delay.as_millis());
            }
        }
        tokio::time::sleep(delay).await;
        delay = retry.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::sim::PendulumConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::f64::consts::FRAC_PI_2;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeControl {
        calls: Mutex<Vec<(&'static str, String)>>,
        failing: Option<String>,
    }

    impl FakeControl {
        fn record(&self, op: &'static str, address: &str) -> Result<()> {
            self.calls.lock().unwrap().push((op, address.to_owned()));
            if self.failing.as_deref() == Some(address) {
                return Err(PendulumError::Transport(format!("{address} unreachable")));
            }
            Ok(())
        }

        fn calls_of(&self, op: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(o, _)| *o == op)
                .map(|(_, a)| a.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ControlClient for FakeControl {
        async fn start(&self, address: &str, _config: PendulumConfig) -> Result<()> {
            self.record("start", address)
        }

        async fn resume(&self, address: &str) -> Result<()> {
            self.record("continue", address)
        }

        async fn pause(&self, address: &str) -> Result<()> {
            self.record("pause", address)
        }

        async fn stop(&self, address: &str) -> Result<()> {
            self.record("stop", address)
        }
    }

    #[derive(Default)]
    struct FakeFeed {
        senders: Mutex<HashMap<String, mpsc::Sender<PositionMessage>>>,
        unreachable: bool,
        attempts: AtomicU64,
    }

    #[async_trait]
    impl PositionFeed for FakeFeed {
        async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<PositionMessage>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err(PendulumError::Transport("connection refused".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().insert(address.to_owned(), tx);
            Ok(rx)
        }
    }

    fn addresses() -> Vec<String> {
        vec!["n0".into(), "n1".into(), "n2".into()]
    }

    fn settings(index: usize) -> NodeSettings {
        NodeSettings {
            spacing: 4.5,
            collide_timeout_ms: 5000,
            ..NodeSettings::new(addresses(), index)
        }
    }

    fn restart_config(enabled: bool) -> PendulumConfig {
        PendulumConfig {
            theta: 0.0,
            length: 4.0,
            mass: 1.0,
            stop_and_restart_on_collision: enabled,
            ..Default::default()
        }
    }

    /// A right-hand neighbor swung flat toward us, landing on our rod
    fn colliding() -> PositionMessage {
        PositionMessage {
            theta: FRAC_PI_2,
            wind: 0.0,
            length: 4.0,
            mass: 1.0,
        }
    }

    fn hanging() -> PositionMessage {
        PositionMessage {
            theta: 0.0,
            ..colliding()
        }
    }

    fn coordinator(
        index: usize,
        config: Option<PendulumConfig>,
        control: Arc<FakeControl>,
        feed: Arc<FakeFeed>,
    ) -> Coordinator {
        let cell = Arc::new(SimulationCell::new());
        if let Some(config) = config {
            cell.install(config);
        }
        Coordinator::new(cell, settings(index), control, feed)
    }

    #[tokio::test]
    async fn test_no_check_without_state() {
        let control = Arc::new(FakeControl::default());
        let coordinator = coordinator(1, None, control.clone(), Arc::new(FakeFeed::default()));
        assert!(!coordinator.check_neighbor(Side::Right, &colliding()));
        assert_eq!(coordinator.stats().collisions, 0);
    }

    #[tokio::test]
    async fn test_collision_without_restart_flag() {
        let control = Arc::new(FakeControl::default());
        let coordinator = coordinator(
            1,
            Some(restart_config(false)),
            control.clone(),
            Arc::new(FakeFeed::default()),
        );
        assert!(!coordinator.check_neighbor(Side::Right, &hanging()));
        assert!(coordinator.check_neighbor(Side::Right, &colliding()));
        assert_eq!(coordinator.stats().collisions, 1);
        assert_eq!(coordinator.stats().restarts, 0);
        assert!(!coordinator.restart_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_protocol() {
        let control = Arc::new(FakeControl::default());
        let coordinator = coordinator(
            1,
            Some(restart_config(true)),
            control.clone(),
            Arc::new(FakeFeed::default()),
        );
        let mut signals = coordinator.restart_signals();

        assert!(coordinator.check_neighbor(Side::Right, &colliding()));
        assert!(coordinator.restart_pending());
        // A second collision while pending does not start another restart
        assert!(coordinator.check_neighbor(Side::Right, &colliding()));

        signals.recv().await.unwrap();
        assert_eq!(control.calls_of("stop"), addresses());
        assert!(control.calls_of("continue").is_empty());

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(control.calls_of("continue").is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(control.calls_of("continue"), addresses());
        assert_eq!(control.calls_of("stop").len(), 3);
        assert!(!coordinator.restart_pending());
        assert!(signals.try_recv().is_err());

        let stats = coordinator.stats();
        assert_eq!(stats.collisions, 2);
        assert_eq!(stats.restarts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_survives_partial_failure() {
        let control = Arc::new(FakeControl {
            failing: Some("n2".into()),
            ..Default::default()
        });
        let coordinator = coordinator(
            0,
            Some(restart_config(true)),
            control.clone(),
            Arc::new(FakeFeed::default()),
        );
        let mut signals = coordinator.restart_signals();

        coordinator.check_neighbor(Side::Right, &colliding());
        signals.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5100)).await;

        assert_eq!(control.calls_of("continue"), addresses());
        let stats = coordinator.stats();
        assert_eq!(stats.stop_failures, 1);
        assert_eq!(stats.continue_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_waiting_restart() {
        let control = Arc::new(FakeControl::default());
        let coordinator = coordinator(
            1,
            Some(restart_config(true)),
            control.clone(),
            Arc::new(FakeFeed::default()),
        );
        let mut signals = coordinator.restart_signals();

        coordinator.check_neighbor(Side::Right, &colliding());
        signals.recv().await.unwrap();
        // Let the waiting task get registered
        tokio::task::yield_now().await;
        coordinator.stop();
        assert!(!coordinator.restart_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(control.calls_of("continue").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_existing_neighbors_only() {
        let feed = Arc::new(FakeFeed::default());
        let first = coordinator(0, Some(restart_config(false)), Arc::new(FakeControl::default()), feed.clone());
        first.start();
        assert!(!first.is_following(Side::Left));
        assert!(first.is_following(Side::Right));

        let middle = coordinator(1, Some(restart_config(false)), Arc::new(FakeControl::default()), feed.clone());
        middle.start();
        // Idempotent
        middle.start();
        assert!(middle.is_following(Side::Left));
        assert!(middle.is_following(Side::Right));

        middle.stop();
        assert!(!middle.is_following(Side::Left));
        assert!(!middle.is_following(Side::Right));
    }

    #[tokio::test(start_paused = true)]
    async fn test_neighbor_updates_are_checked() {
        let feed = Arc::new(FakeFeed::default());
        let coordinator = coordinator(
            1,
            Some(restart_config(false)),
            Arc::new(FakeControl::default()),
            feed.clone(),
        );
        coordinator.start();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let right = feed.senders.lock().unwrap().get("n2").cloned().unwrap();
        right.send(hanging()).await.unwrap();
        right.send(colliding()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(coordinator.stats().collisions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_neighbor_gives_up() {
        let feed = Arc::new(FakeFeed {
            unreachable: true,
            ..Default::default()
        });
        let coordinator = coordinator(
            0,
            Some(restart_config(false)),
            Arc::new(FakeControl::default()),
            feed.clone(),
        );
        coordinator.start();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let max_attempts = NodeSettings::default().retry.max_attempts as u64;
        assert_eq!(feed.attempts.load(Ordering::SeqCst), max_attempts);
    }
}
