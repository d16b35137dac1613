//! Pendulum state machine
//!
//! Owns the stepping task and is the only writer of the node's
//! `SimulationCell`. Phases follow from the cell: `Started` while the
//! stepping task is active, otherwise `Paused` or `Stopped` by elapsed time.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::cell::SimulationCell;
use crate::error::ConfigError;
use crate::settings::NodeSettings;
use crate::sim::{PendulumConfig, Snapshot, advance};

/// Hook for components that follow the pendulum's lifecycle
pub trait LifecycleObserver: Send + Sync {
    /// Stepping has begun
    fn on_resumed(&self) {}

    /// Stepping has been cancelled
    fn on_paused(&self) {}

    /// Called once per transition with the resulting snapshot
    fn on_transition(&self, _snapshot: &Snapshot) {}
}

/// Timing parameters for the stepping task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTiming {
    /// Simulated seconds per step
    pub dt: f64,
    /// Wall-clock period between steps
    pub period: Duration,
    pub gravity: f64,
}

impl StepTiming {
    pub fn from_settings(settings: &NodeSettings) -> Self {
        Self {
            dt: settings.step_seconds(),
            period: settings.step_interval(),
            gravity: settings.gravity,
        }
    }
}

pub struct Pendulum {
    cell: Arc<SimulationCell>,
    timing: StepTiming,
    stepper: Mutex<Option<JoinHandle<()>>>,
    observers: RwLock<Vec<Weak<dyn LifecycleObserver>>>,
}

impl Pendulum {
    pub fn new(cell: Arc<SimulationCell>, timing: StepTiming) -> Self {
        Self {
            cell,
            timing,
            stepper: Mutex::new(None),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a lifecycle observer (held weakly)
    pub fn observe(&self, observer: Weak<dyn LifecycleObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.cell.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.lock_stepper().is_some()
    }

    /// Install `config`, reset state, and begin stepping.
    ///
    /// Legal at any time. When already running, the config is replaced and
    /// the state reset without restarting the stepping task.
    pub fn start(&self, config: PendulumConfig) -> Result<(), ConfigError> {
        config.validate()?;

        let mut stepper = self.lock_stepper();
        self.cell.install(config);
        log::info!(
            "Starting pendulum (theta={:.3}, length={}, mass={})",
            config.theta,
            config.length,
            config.mass
        );
        if stepper.is_none() {
            *stepper = Some(self.spawn_stepper());
            self.notify(|o| o.on_resumed());
        }
        self.notify_transition();
        Ok(())
    }

    /// Begin stepping if not already; never resets state
    pub fn resume(&self) {
        let mut stepper = self.lock_stepper();
        if stepper.is_some() {
            return;
        }
        if self.cell.snapshot().running().is_none() {
            log::debug!("Continue ignored: pendulum was never started");
            return;
        }
        *stepper = Some(self.spawn_stepper());
        log::info!("Continuing pendulum");
        self.notify(|o| o.on_resumed());
        self.notify_transition();
    }

    /// Cancel stepping if active.
    ///
    /// No step applies after this returns.
    pub fn pause(&self) {
        let mut stepper = self.lock_stepper();
        if self.halt(&mut stepper) {
            log::info!("Pausing pendulum");
            self.notify_transition();
        }
        // Pausing while idle would cancel a pending cluster restart; kept as a
        // no-op because cancelling it let pendulums pass through each other.
    }

    /// Pause, then reset state from the current config
    pub fn stop(&self) {
        let mut stepper = self.lock_stepper();
        self.halt(&mut stepper);
        self.cell.reset();
        log::info!("Stopping pendulum");
        self.notify_transition();
    }

    fn halt(&self, stepper: &mut Option<JoinHandle<()>>) -> bool {
        match stepper.take() {
            Some(handle) => {
                self.cell.deactivate();
                handle.abort();
                self.notify(|o| o.on_paused());
                true
            }
            None => false,
        }
    }

    fn spawn_stepper(&self) -> JoinHandle<()> {
        let generation = self.cell.activate();
        let cell = Arc::clone(&self.cell);
        let StepTiming { dt, period, gravity } = self.timing;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cell.step_with(generation, |config, state| advance(config, state, dt, gravity)) {
                    Some(state) => log::trace!("angle {:.4}", state.theta.to_degrees()),
                    None => break,
                }
            }
        })
    }

    fn notify_transition(&self) {
        let snapshot = self.cell.snapshot();
        self.notify(|o| o.on_transition(&snapshot));
    }

    fn notify(&self, f: impl Fn(&dyn LifecycleObserver)) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for observer in observers.iter().filter_map(Weak::upgrade) {
            f(observer.as_ref());
        }
    }

    fn lock_stepper(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.stepper.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Pendulum {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_stepper().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Phase, SimulationState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMING: StepTiming = StepTiming {
        dt: 0.02,
        period: Duration::from_millis(20),
        gravity: 9.81,
    };

    #[derive(Default)]
    struct Recorder {
        resumed: AtomicUsize,
        paused: AtomicUsize,
        phases: Mutex<Vec<Phase>>,
    }

    impl LifecycleObserver for Recorder {
        fn on_resumed(&self) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_paused(&self) {
            self.paused.fetch_add(1, Ordering::SeqCst);
        }

        fn on_transition(&self, snapshot: &Snapshot) {
            self.phases.lock().unwrap().push(snapshot.phase());
        }
    }

    fn setup() -> (Pendulum, Arc<Recorder>) {
        let pendulum = Pendulum::new(Arc::new(SimulationCell::new()), TIMING);
        let recorder = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&recorder);
        pendulum.observe(weak);
        (pendulum, recorder)
    }

    fn swinging() -> PendulumConfig {
        PendulumConfig {
            theta: 0.5,
            ..Default::default()
        }
    }

    fn steps(state: &SimulationState) -> i64 {
        (state.time / TIMING.dt).round() as i64
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_steps_on_timer() {
        let (pendulum, recorder) = setup();
        pendulum.start(swinging()).unwrap();
        assert_eq!(pendulum.snapshot().phase(), Phase::Started);

        tokio::time::sleep(Duration::from_millis(105)).await;
        let state = pendulum.snapshot().state.unwrap();
        assert!((4..=5).contains(&steps(&state)), "steps = {}", steps(&state));
        assert!(state.theta < 0.5);
        assert_eq!(recorder.resumed.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.phases.lock().unwrap(), vec![Phase::Started]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_state() {
        let (pendulum, recorder) = setup();
        pendulum.start(swinging()).unwrap();
        tokio::time::sleep(Duration::from_millis(65)).await;

        pendulum.pause();
        let frozen = pendulum.snapshot();
        assert_eq!(frozen.phase(), Phase::Paused);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pendulum.snapshot(), frozen);

        // Second pause is a no-op
        pendulum.pause();
        assert_eq!(pendulum.snapshot(), frozen);
        assert_eq!(recorder.paused.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.phases.lock().unwrap(),
            vec![Phase::Started, Phase::Paused]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_keeps_state_and_is_idempotent() {
        let (pendulum, recorder) = setup();
        pendulum.start(swinging()).unwrap();
        tokio::time::sleep(Duration::from_millis(65)).await;
        pendulum.pause();
        let paused_at = pendulum.snapshot().state.unwrap();

        pendulum.resume();
        pendulum.resume();
        assert!(pendulum.is_running());
        assert_eq!(pendulum.snapshot().state.unwrap(), paused_at);
        assert_eq!(recorder.resumed.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(45)).await;
        let later = pendulum.snapshot().state.unwrap();
        assert!(later.time > paused_at.time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_from_config() {
        let (pendulum, recorder) = setup();
        pendulum.start(swinging()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        pendulum.stop();
        let snapshot = pendulum.snapshot();
        assert_eq!(snapshot.phase(), Phase::Stopped);
        assert_eq!(snapshot.state, Some(SimulationState::initial(&swinging())));
        assert_eq!(snapshot.config, Some(swinging()));
        assert_eq!(
            *recorder.phases.lock().unwrap(),
            vec![Phase::Started, Phase::Stopped]
        );
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let (pendulum, _recorder) = setup();
        pendulum.stop();
        pendulum.pause();
        pendulum.resume();
        let snapshot = pendulum.snapshot();
        assert!(snapshot.state.is_none());
        assert!(snapshot.config.is_none());
        assert!(!pendulum.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_config() {
        let (pendulum, recorder) = setup();
        pendulum.start(swinging()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let other = PendulumConfig {
            theta: -0.2,
            ..Default::default()
        };
        pendulum.start(other).unwrap();
        let snapshot = pendulum.snapshot();
        assert_eq!(snapshot.config, Some(other));
        assert_eq!(snapshot.state.unwrap().time, 0.0);
        assert_eq!(snapshot.state.unwrap().theta, -0.2);
        // Stepping task kept running
        assert_eq!(recorder.resumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_leaves_state_untouched() {
        let (pendulum, recorder) = setup();
        let bad = PendulumConfig {
            length: -1.0,
            ..Default::default()
        };
        assert!(pendulum.start(bad).is_err());
        assert!(pendulum.snapshot().config.is_none());
        assert!(!pendulum.is_running());
        assert!(recorder.phases.lock().unwrap().is_empty());
    }
}
