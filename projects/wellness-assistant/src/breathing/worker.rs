use super::chant::{ChantDetector, ChantStats, ChantStatsHandle};
use super::SessionOutcome;
use crate::config::BreathingConfig;
use anyhow::{anyhow, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(100);

enum Control {
    Force,
    Stop,
}

/// Flags and timers shared between the handle and the worker thread
struct WorkerShared {
    running: AtomicBool,
    paused: AtomicBool,
    interval_ms: AtomicU64,
    last_run: Mutex<Instant>,
}

impl WorkerShared {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    fn accepting_sessions(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.paused.load(Ordering::Relaxed)
    }
}

/// Runs guided breathing sessions on a background thread at a fixed interval.
///
/// The detector is shared behind a mutex so microphone calibration and tests
/// can run from the caller's thread while the worker is idle. Each finished
/// session is published as a `SessionOutcome` on `outcomes()`.
pub struct BreathingWorker {
    detector: Arc<Mutex<ChantDetector>>,
    stats: ChantStatsHandle,
    interrupt: Arc<AtomicBool>,
    shared: Arc<WorkerShared>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    outcome_tx: Sender<SessionOutcome>,
    outcome_rx: Receiver<SessionOutcome>,
    handle: Option<JoinHandle<()>>,
    min_interval_secs: u64,
    max_interval_secs: u64,
}

impl BreathingWorker {
    pub fn new(detector: ChantDetector, config: &BreathingConfig) -> Self {
        let (control_tx, control_rx) = channel::unbounded();
        let (outcome_tx, outcome_rx) = channel::unbounded();
        let interval_secs = config.clamp_interval(config.default_interval_secs);

        Self {
            stats: detector.stats_handle(),
            interrupt: detector.interrupt_handle(),
            detector: Arc::new(Mutex::new(detector)),
            shared: Arc::new(WorkerShared {
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                interval_ms: AtomicU64::new(interval_secs * 1000),
                last_run: Mutex::new(Instant::now()),
            }),
            control_tx,
            control_rx,
            outcome_tx,
            outcome_rx,
            handle: None,
            min_interval_secs: config.min_interval_secs,
            max_interval_secs: config.max_interval_secs,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.interrupt.store(false, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::Relaxed);
        *self.shared.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();

        let detector = self.detector.clone();
        let shared = self.shared.clone();
        let control_rx = self.control_rx.clone();
        let outcome_tx = self.outcome_tx.clone();
        self.handle = Some(thread::spawn(move || {
            breathing_loop(detector, shared, control_rx, outcome_tx)
        }));
        tracing::info!(
            "Breathing worker started (every {}s)",
            self.shared.interval().as_secs()
        );
    }

    /// Stops the worker, cutting short any session in progress, and waits for it.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        self.interrupt.store(true, Ordering::Relaxed);
        let _ = self.control_tx.send(Control::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Breathing worker panicked");
            }
        }
        // Drop any stop/force requests the worker never consumed.
        while self.control_rx.try_recv().is_ok() {}
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Relaxed);
        tracing::info!("Breathing sessions paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Relaxed);
        tracing::info!("Breathing sessions resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed) && self.handle.is_some()
    }

    /// Sets the seconds between sessions, clamped to the configured range.
    /// Returns the interval actually applied.
    pub fn set_interval(&self, secs: u64) -> u64 {
        let clamped = secs.max(self.min_interval_secs).min(self.max_interval_secs);
        if clamped != secs {
            tracing::warn!("Breathing interval {}s clamped to {}s", secs, clamped);
        }
        self.shared.interval_ms.store(clamped * 1000, Ordering::Relaxed);
        clamped
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Requests an immediate session; ignored unless running and not paused.
    pub fn force_session(&self) -> bool {
        if !self.is_running() || self.is_paused() {
            tracing::info!("Forced breathing session ignored (worker stopped or paused)");
            return false;
        }
        self.control_tx.send(Control::Force).is_ok()
    }

    pub fn time_until_next_session(&self) -> Option<Duration> {
        if !self.is_running() || self.is_paused() {
            return None;
        }
        let last_run = *self.shared.last_run.lock().unwrap_or_else(|e| e.into_inner());
        Some(self.shared.interval().saturating_sub(last_run.elapsed()))
    }

    pub fn outcomes(&self) -> Receiver<SessionOutcome> {
        self.outcome_rx.clone()
    }

    pub fn stats(&self) -> ChantStats {
        self.stats.stats()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Blocks while a session is in progress.
    pub fn calibrate_microphone(&self, duration: Duration) -> Result<()> {
        self.detector
            .lock()
            .map_err(|_| anyhow!("chant detector lock poisoned"))?
            .calibrate_microphone(duration)
    }

    /// Blocks while a session is in progress.
    pub fn test_microphone(&self, timeout: Duration) -> Result<String> {
        self.detector
            .lock()
            .map_err(|_| anyhow!("chant detector lock poisoned"))?
            .test_microphone(timeout)
    }
}

impl Drop for BreathingWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn breathing_loop(
    detector: Arc<Mutex<ChantDetector>>,
    shared: Arc<WorkerShared>,
    control_rx: Receiver<Control>,
    outcome_tx: Sender<SessionOutcome>,
) {
    loop {
        match control_rx.recv_timeout(TICK) {
            Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Control::Force) => {
                if shared.accepting_sessions() {
                    perform_session(&detector, &shared, &outcome_tx);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if !shared.running.load(Ordering::Relaxed) {
            break;
        }
        if shared.paused.load(Ordering::Relaxed) {
            continue;
        }

        let now = Instant::now();
        let due = {
            let last_run = shared.last_run.lock().unwrap_or_else(|e| e.into_inner());
            now.duration_since(*last_run) >= shared.interval()
        };
        if due {
            perform_session(&detector, &shared, &outcome_tx);
            *shared.last_run.lock().unwrap_or_else(|e| e.into_inner()) = now;
        }
    }
    tracing::info!("Breathing worker stopped");
}

fn perform_session(
    detector: &Mutex<ChantDetector>,
    shared: &WorkerShared,
    outcome_tx: &Sender<SessionOutcome>,
) {
    if !shared.accepting_sessions() {
        return;
    }
    let outcome = match detector.lock() {
        Ok(mut detector) => detector.complete_breathing_session(),
        Err(_) => {
            tracing::error!("Error in breathing session: chant detector lock poisoned");
            return;
        }
    };
    if outcome_tx.send(outcome).is_err() {
        tracing::debug!("No listener for breathing session outcomes");
    }
}
