// Wellness session orchestration: camera loop, calibration, breathing worker
// and session bookkeeping.

pub mod alerts;
pub mod controls;
pub mod overlay;
pub mod state;

use crate::breathing::{BreathingWorker, SessionOutcome};
use crate::config::WellnessConfig;
use crate::detectors::eye::{EyeDetector, EyeReading};
use crate::detectors::posture::{PostureDetector, PostureReading};
use crate::session_log::{CalibrationRecord, SessionLog, SessionSummary, TimelineRow};
use crate::speech::SpeechEngine;
use crate::video::{FrameSource, OpencvCamera};
use crate::vision::{FaceMesh, FaceMeshEstimator, FrameSize, PoseEstimator, PoseLandmarks};
use alerts::StreakAlerts;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use controls::Command;
use crossbeam::channel::{self, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use opencv::core::Mat;
use opencv::highgui;
use opencv::prelude::*;
use serde::Serialize;
use state::{SessionState, StatsSnapshot};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of the pre-session device check
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ComponentReport {
    pub camera: bool,
    pub microphone: bool,
    pub speech: bool,
}

pub struct WellnessApp {
    config: WellnessConfig,
    camera: Option<Box<dyn FrameSource>>,
    pose: Box<dyn PoseEstimator>,
    face: Box<dyn FaceMeshEstimator>,
    posture: PostureDetector,
    eyes: EyeDetector,
    breathing: Option<BreathingWorker>,
    breathing_outcomes: Option<Receiver<SessionOutcome>>,
    last_outcome: Option<SessionOutcome>,
    speech: Arc<SpeechEngine>,
    alerts: StreakAlerts,
    state: Arc<SessionState>,
    commands_tx: Sender<Command>,
    commands_rx: Receiver<Command>,
    log: Option<SessionLog>,
    reuse_calibration: bool,
    calibration_complete: bool,
    session_start: Option<(Instant, DateTime<Utc>)>,
    window_open: bool,
}

impl WellnessApp {
    pub fn new(
        config: WellnessConfig,
        pose: Box<dyn PoseEstimator>,
        face: Box<dyn FaceMeshEstimator>,
        speech: Arc<SpeechEngine>,
        breathing: Option<BreathingWorker>,
    ) -> Self {
        let (commands_tx, commands_rx) = channel::unbounded();
        let breathing_outcomes = breathing.as_ref().map(|b| b.outcomes());
        Self {
            posture: PostureDetector::new(config.posture.clone()),
            eyes: EyeDetector::new(
                config.eye.default_ear_threshold,
                config.eye.calibration_frames_min,
            ),
            alerts: StreakAlerts::new(&config.limits),
            config,
            camera: None,
            pose,
            face,
            breathing,
            breathing_outcomes,
            last_outcome: None,
            speech,
            state: Arc::new(SessionState::new()),
            commands_tx,
            commands_rx,
            log: None,
            reuse_calibration: false,
            calibration_complete: false,
            session_start: None,
            window_open: false,
        }
    }

    pub fn state(&self) -> Arc<SessionState> {
        self.state.clone()
    }

    /// Sender for controls originating outside the window (the dashboard).
    pub fn command_sender(&self) -> Sender<Command> {
        self.commands_tx.clone()
    }

    pub fn set_reuse_calibration(&mut self, reuse: bool) {
        self.reuse_calibration = reuse;
    }

    pub fn initialize_camera(&mut self, index: Option<i32>) -> Result<()> {
        let mut camera_config = self.config.camera.clone();
        if let Some(index) = index {
            camera_config.index = index;
        }
        let camera = OpencvCamera::open(&camera_config)?;
        let (width, height) = camera.frame_size();
        tracing::info!("Camera initialized successfully ({}x{})", width, height);
        self.camera = Some(Box::new(camera));
        Ok(())
    }

    fn window_name(&self) -> &str {
        &self.config.app.window_name
    }

    fn read_frame(&mut self) -> Result<Mat> {
        self.camera
            .as_mut()
            .ok_or_else(|| anyhow!("Camera not initialized"))?
            .read_frame()
    }

    /// Runs both estimators; estimator failures are logged and treated as
    /// "nothing detected" for that frame.
    fn analyse(&mut self, frame: &Mat) -> (Option<PoseLandmarks>, Option<FaceMesh>) {
        let pose = self.pose.estimate(frame).unwrap_or_else(|e| {
            tracing::warn!("Pose estimation failed: {:#}", e);
            None
        });
        let mesh = self.face.estimate(frame, pose.as_ref()).unwrap_or_else(|e| {
            tracing::warn!("Face mesh estimation failed: {:#}", e);
            None
        });
        (pose, mesh)
    }

    fn show(&mut self, frame: &Mat) -> Result<Option<Command>> {
        self.window_open = true;
        highgui::imshow(self.window_name(), frame)?;
        Ok(Command::from_key(highgui::wait_key(1)?))
    }

    fn try_reuse_calibration(&mut self) -> Result<bool> {
        let path = self.config.paths.calibration_path();
        let Some(record) = CalibrationRecord::load(&path)? else {
            tracing::info!("No saved calibration at {:?}", path);
            return Ok(false);
        };
        self.posture.set_reference(record.posture);
        self.eyes.set_threshold(Some(record.ear_threshold));
        tracing::info!(
            "Reusing calibration from {} (EAR threshold {:.3})",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.ear_threshold
        );
        Ok(true)
    }

    /// Microphone, then a countdown, then a short window of posture and eye
    /// sampling. Returns `Ok(false)` when the user quits during calibration.
    pub fn calibrate_system(&mut self) -> Result<bool> {
        tracing::info!("System calibration");

        if self.reuse_calibration {
            match self.try_reuse_calibration() {
                Ok(true) => {
                    self.calibration_complete = true;
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Ignoring saved calibration: {:#}", e),
            }
        }

        if let Some(breathing) = &self.breathing {
            let ambient = Duration::from_secs_f64(self.config.speech.ambient_noise_duration_secs);
            if let Err(e) = breathing.calibrate_microphone(ambient) {
                tracing::warn!("Microphone calibration failed, continuing anyway: {:#}", e);
            }
        }

        self.state.is_calibrating.store(true, Ordering::Relaxed);
        let result = self.run_calibration_windows();
        self.state.is_calibrating.store(false, Ordering::Relaxed);
        if !result? {
            return Ok(false);
        }

        let threshold = self.eyes.set_threshold(None);
        tracing::info!("Eye EAR threshold set to {:.3}", threshold);
        tracing::debug!("Eye calibration: {:?}", self.eyes.calibration_info());
        self.calibration_complete = true;
        tracing::info!("System calibration complete");
        Ok(true)
    }

    fn run_calibration_windows(&mut self) -> Result<bool> {
        let countdown = Duration::from_secs(self.config.app.calibration_countdown_secs);
        let duration = Duration::from_secs(self.config.app.calibration_duration_secs);

        let pb = ProgressBar::new(countdown.as_secs() + duration.as_secs());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s {msg}")?
                .progress_chars("#>-"),
        );

        pb.set_message("Position yourself in the camera frame");
        let started = Instant::now();
        while started.elapsed() < countdown {
            let mut frame = self.read_frame()?;
            overlay::draw_message(&mut frame, "Setting up & calibrating...")?;
            if self.show(&frame)? == Some(Command::Quit) {
                pb.abandon_with_message("aborted");
                return Ok(false);
            }
            pb.set_position(started.elapsed().as_secs());
        }

        pb.set_message("Keep a neutral pose with eyes open");
        let started = Instant::now();
        while started.elapsed() < duration {
            let mut frame = self.read_frame()?;
            let size = FrameSize::new(frame.cols(), frame.rows());
            let (pose, mesh) = self.analyse(&frame);
            self.eyes.process(mesh.as_ref(), true);
            self.posture.process(pose.as_ref(), size);

            overlay::draw_message(&mut frame, "Calibrating posture & eyes...")?;
            if self.show(&frame)? == Some(Command::Quit) {
                pb.abandon_with_message("aborted");
                return Ok(false);
            }
            pb.set_position(countdown.as_secs() + started.elapsed().as_secs());
        }
        pb.finish_with_message("done");
        Ok(true)
    }

    /// Calibrates when needed, starts breathing guidance and runs the camera
    /// loop until the user quits. The session is always stopped afterwards.
    pub fn start_session(&mut self) -> Result<()> {
        if self.camera.is_none() {
            return Err(anyhow!("Camera not initialized"));
        }

        if !self.calibration_complete && !self.calibrate_system()? {
            tracing::info!("Calibration aborted");
            self.stop_session();
            return Ok(());
        }

        self.begin_session();
        let result = self.main_loop();
        self.stop_session();
        result
    }

    /// Starts breathing guidance and the session clock. Frames seen during
    /// calibration stay in the posture and eye statistics.
    fn begin_session(&mut self) {
        if let Some(breathing) = self.breathing.as_mut() {
            breathing.start();
        }

        let started_at = Utc::now();
        self.session_start = Some((Instant::now(), started_at));
        if self.config.app.auto_save_stats {
            match SessionLog::create(&self.config.paths.data_directory, started_at) {
                Ok(log) => self.log = Some(log),
                Err(e) => tracing::warn!("Session will not be recorded: {:#}", e),
            }
        }
        self.state.is_active.store(true, Ordering::Relaxed);
        tracing::info!("Session started! Press 'q' to quit.");
    }

    fn main_loop(&mut self) -> Result<()> {
        let stats_interval = Duration::from_secs_f64(self.config.app.stats_update_interval_secs);
        let mut last_sample = Instant::now();

        loop {
            let mut frame = match self.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Camera read failed: {:#}", e);
                    break;
                }
            };
            let size = FrameSize::new(frame.cols(), frame.rows());

            let (pose, mesh) = self.analyse(&frame);
            let posture = self.posture.process(pose.as_ref(), size);
            let eyes = self.eyes.process(mesh.as_ref(), false);

            for alert in self.alerts.update(posture.good, eyes.eyes_open) {
                tracing::info!("Alert: {:?}", alert);
                self.speech.speak(alert.message());
            }
            self.drain_breathing_outcomes();

            let snapshot = self.snapshot(&posture, &eyes);
            let elapsed = self.elapsed_secs();
            if let Some(pose) = pose.as_ref().filter(|_| self.config.app.show_landmarks) {
                overlay::draw_landmarks(&mut frame, pose)?;
            }
            overlay::draw_posture_status(&mut frame, &posture, &snapshot)?;
            overlay::draw_eye_status(&mut frame, &eyes, snapshot.ear_threshold)?;
            overlay::draw_statistics(&mut frame, &snapshot, elapsed)?;

            if last_sample.elapsed() >= stats_interval {
                last_sample = Instant::now();
                self.record_timeline(&snapshot, elapsed);
            }
            self.state.publish(snapshot);

            let key_command = self.show(&frame)?;
            let commands: Vec<Command> = key_command
                .into_iter()
                .chain(self.commands_rx.try_iter())
                .collect();
            if commands.into_iter().any(|c| !self.handle_command(c)) {
                break;
            }
        }
        Ok(())
    }

    /// Applies a control; returns false when the session should end.
    pub fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Quit => return false,
            Command::TogglePause => self.toggle_breathing_pause(),
            Command::ForceSession => {
                if let Some(breathing) = &self.breathing {
                    breathing.force_session();
                }
            }
            Command::ResetStats => self.reset_stats(),
            Command::SetBreathingInterval(secs) => {
                if self.set_breathing_interval(secs).is_none() {
                    tracing::warn!("Breathing guidance is disabled; interval ignored");
                }
            }
        }
        true
    }

    fn toggle_breathing_pause(&self) {
        if let Some(breathing) = &self.breathing {
            if breathing.is_paused() {
                breathing.resume();
            } else {
                breathing.pause();
            }
        }
    }

    fn reset_stats(&mut self) {
        self.posture.reset_stats();
        self.eyes.reset_stats();
        self.alerts.reset();
        if let Some(breathing) = &self.breathing {
            breathing.reset_stats();
        }
        tracing::info!("Statistics reset");
    }

    fn drain_breathing_outcomes(&mut self) {
        let Some(rx) = &self.breathing_outcomes else {
            return;
        };
        let outcomes: Vec<SessionOutcome> = rx.try_iter().collect();
        for outcome in outcomes {
            self.last_outcome = Some(outcome);
            if let Some(breathing) = &self.breathing {
                let stats = breathing.stats();
                tracing::info!(
                    "Session Stats: {}/{} successful ({:.1}%)",
                    stats.successful_detections,
                    stats.total_sessions,
                    stats.success_rate
                );
            }
        }
    }

    fn snapshot(&self, posture: &PostureReading, eyes: &EyeReading) -> StatsSnapshot {
        let breathing = self.breathing.as_ref();
        StatsSnapshot {
            posture: Some(self.posture.stats()),
            eyes: Some(self.eyes.stats()),
            breathing: breathing.map(|b| b.stats()),
            posture_good: posture.good,
            eyes_open: eyes.eyes_open,
            average_ear: eyes.average_ear(),
            ear_threshold: self.eyes.threshold(),
            warning: posture.warning.map(str::to_string),
            breathing_enabled: breathing.is_some(),
            breathing_paused: breathing.map(|b| b.is_paused()).unwrap_or(false),
            next_breathing_secs: breathing
                .and_then(|b| b.time_until_next_session())
                .map(|d| d.as_secs_f64()),
            last_breathing_session: self.last_outcome,
        }
    }

    fn record_timeline(&mut self, snapshot: &StatsSnapshot, elapsed: f64) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let row = TimelineRow {
            elapsed_secs: elapsed,
            posture_good: snapshot.posture_good,
            eyes_open: snapshot.eyes_open,
            bad_posture_percent: snapshot.posture.as_ref().map(|p| p.bad_percent).unwrap_or(0.0),
            eyes_closed_percent: snapshot.eyes.as_ref().map(|e| e.closed_percent).unwrap_or(0.0),
            breathing_sessions: snapshot.breathing.as_ref().map(|b| b.total_sessions).unwrap_or(0),
        };
        if let Err(e) = log.append(&row) {
            tracing::warn!("Failed to append timeline row: {:#}", e);
        }
    }

    fn elapsed_secs(&self) -> f64 {
        self.session_start
            .map(|(start, _)| start.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Stops breathing guidance, releases the camera and window, and persists
    /// the summary and calibration when enabled.
    pub fn stop_session(&mut self) {
        self.state.is_active.store(false, Ordering::Relaxed);

        if let Some(breathing) = self.breathing.as_mut() {
            if breathing.is_running() {
                breathing.stop();
            }
        }
        self.speech.clear_queue();
        self.camera = None;
        if std::mem::take(&mut self.window_open) {
            if let Err(e) = highgui::destroy_all_windows() {
                tracing::debug!("destroy_all_windows: {}", e);
            }
        }

        if let Some(log) = self.log.take() {
            if let Some(summary) = self.session_summary() {
                match log.finish(&summary) {
                    Ok(path) => tracing::info!("Session summary saved to {:?}", path),
                    Err(e) => tracing::warn!("Failed to save session summary: {:#}", e),
                }
            }
        }
        self.save_calibration();
        tracing::info!("Session ended successfully");
    }

    fn save_calibration(&self) {
        let (Some(posture), Some(ear_threshold)) = (self.posture.reference(), self.eyes.threshold()) else {
            return;
        };
        let record = CalibrationRecord {
            posture,
            ear_threshold,
            created_at: Utc::now(),
        };
        let path = self.config.paths.calibration_path();
        if let Err(e) = record.save(&path) {
            tracing::warn!("Failed to save calibration to {:?}: {:#}", path, e);
        }
    }

    /// `None` until a session has started.
    pub fn session_summary(&self) -> Option<SessionSummary> {
        let (start, started_at) = self.session_start?;
        Some(SessionSummary {
            started_at,
            total_session_time: start.elapsed().as_secs_f64(),
            posture: self.posture.stats(),
            eyes: self.eyes.stats(),
            breathing: self.breathing.as_ref().map(|b| b.stats()),
            calibration_complete: self.calibration_complete,
        })
    }

    /// Returns the applied (clamped) interval, or `None` without breathing guidance.
    pub fn set_breathing_interval(&self, secs: u64) -> Option<u64> {
        let applied = self.breathing.as_ref()?.set_interval(secs);
        tracing::info!("Breathing interval set to {} seconds", applied);
        Some(applied)
    }

    /// Checks camera, microphone and speech output. The camera is released
    /// again afterwards.
    pub fn test_components(&mut self, camera_index: Option<i32>) -> ComponentReport {
        tracing::info!("Component testing");

        let camera = match self.initialize_camera(camera_index) {
            Ok(()) => {
                tracing::info!("Camera test passed");
                true
            }
            Err(e) => {
                tracing::error!("Camera test failed: {:#}", e);
                false
            }
        };
        self.camera = None;

        let timeout = Duration::from_secs(self.config.app.component_test_timeout_secs);
        let microphone = match &self.breathing {
            Some(breathing) => match breathing.test_microphone(timeout) {
                Ok(_) => {
                    tracing::info!("Microphone test passed");
                    true
                }
                Err(e) => {
                    tracing::warn!("Microphone test failed: {:#}", e);
                    false
                }
            },
            None => {
                tracing::info!("Microphone test skipped (breathing guidance disabled)");
                false
            }
        };

        let speech = match self.speech.speak_sync("Testing speech engine") {
            Ok(()) => {
                tracing::info!("Speech engine test passed");
                true
            }
            Err(e) => {
                tracing::warn!("Speech engine test failed: {:#}", e);
                false
            }
        };

        ComponentReport {
            camera,
            microphone,
            speech,
        }
    }
}
