// Breath cadence trainer: classifies short microphone windows as inhale or
// exhale by amplitude and scores each cycle against a target rhythm.

use crate::audio::capture::LiveInput;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const WINDOW_SECS: f64 = 0.1;
pub const THRESHOLD_MULTIPLIER: f64 = 1.2;
/// Allowed relative error on timed steps
pub const DURATION_TOLERANCE: f64 = 0.2;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breath {
    Inhale,
    Exhale,
}

impl fmt::Display for Breath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breath::Inhale => write!(f, "I"),
            Breath::Exhale => write!(f, "E"),
        }
    }
}

/// I, I, I, I, E, E, I (1 s), E (2 s); untimed steps only need the right state.
pub const EXPECTED_PATTERN: [(Breath, Option<f64>); 8] = [
    (Breath::Inhale, None),
    (Breath::Inhale, None),
    (Breath::Inhale, None),
    (Breath::Inhale, None),
    (Breath::Exhale, None),
    (Breath::Exhale, None),
    (Breath::Inhale, Some(1.0)),
    (Breath::Exhale, Some(2.0)),
];

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: usize,
    /// Percent of steps matching the expected pattern
    pub accuracy: f64,
    pub phases: Vec<(Breath, f64)>,
}

pub fn mean_abs_amplitude(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| (s as f64).abs()).sum::<f64>() / samples.len() as f64
}

/// Fraction of `phases` that match `EXPECTED_PATTERN`, as a percentage.
pub fn score_cycle(phases: &[(Breath, f64)]) -> f64 {
    let correct = phases
        .iter()
        .zip(EXPECTED_PATTERN.iter())
        .filter(|((state, duration), (expected, expected_duration))| {
            state == expected
                && match expected_duration {
                    None => true,
                    Some(d) => (duration - d).abs() <= d * DURATION_TOLERANCE + 1e-9,
                }
        })
        .count();
    correct as f64 / EXPECTED_PATTERN.len() as f64 * 100.0
}

pub struct BreathCadence {
    threshold: f64,
    window_secs: f64,
    target_cycles: usize,
    current: Option<(Breath, f64)>,
    phases: Vec<(Breath, f64)>,
    reports: Vec<CycleReport>,
}

impl BreathCadence {
    pub fn new(threshold: f64, window_secs: f64, target_cycles: usize) -> Self {
        Self {
            threshold,
            window_secs,
            target_cycles,
            current: None,
            phases: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Threshold is the calibration's mean absolute amplitude × 1.2.
    pub fn from_calibration(samples: &[i16], target_cycles: usize) -> Self {
        Self::new(
            mean_abs_amplitude(samples) * THRESHOLD_MULTIPLIER,
            WINDOW_SECS,
            target_cycles,
        )
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, window: &[i16]) -> Breath {
        if mean_abs_amplitude(window) > self.threshold {
            Breath::Exhale
        } else {
            Breath::Inhale
        }
    }

    /// Feeds one window. A state change closes the previous phase; every
    /// eight closed phases form a scored cycle, which is returned.
    pub fn push_window(&mut self, window: &[i16]) -> Option<CycleReport> {
        if self.is_done() {
            return None;
        }
        let state = self.classify(window);
        let mut report = None;

        match self.current {
            Some((current, _)) if current == state => {}
            previous => {
                if let Some(phase) = previous {
                    self.phases.push(phase);
                    report = self.close_cycle();
                }
                self.current = Some((state, 0.0));
            }
        }
        if let Some((_, duration)) = self.current.as_mut() {
            *duration += self.window_secs;
        }
        report
    }

    fn close_cycle(&mut self) -> Option<CycleReport> {
        if self.phases.len() < EXPECTED_PATTERN.len() {
            return None;
        }
        let phases: Vec<_> = self.phases.drain(..EXPECTED_PATTERN.len()).collect();
        let report = CycleReport {
            cycle: self.reports.len() + 1,
            accuracy: score_cycle(&phases),
            phases,
        };
        self.reports.push(report.clone());
        Some(report)
    }

    pub fn is_done(&self) -> bool {
        self.reports.len() >= self.target_cycles
    }

    pub fn reports(&self) -> &[CycleReport] {
        &self.reports
    }
}

/// Interactive trainer on the default microphone.
pub fn run_trainer(calibration_secs: f64, cycles: usize) -> Result<Vec<CycleReport>> {
    let input = LiveInput::open()?;

    println!("Calibrating for {:.0} seconds... Breathe normally.", calibration_secs);
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message("calibrating");
    pb.enable_steady_tick(Duration::from_millis(100));
    let calibration = input.record(Duration::from_secs_f64(calibration_secs))?;
    pb.finish_and_clear();

    let mut cadence = BreathCadence::from_calibration(&calibration.samples, cycles);
    println!(
        "Average amplitude: {:.1}, threshold: {:.1}",
        mean_abs_amplitude(&calibration.samples),
        cadence.threshold()
    );
    println!("Live detection started. Target: {} cycles.", cycles);

    let pb = ProgressBar::new(cycles as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let window = Duration::from_secs_f64(WINDOW_SECS);
    while !cadence.is_done() {
        let clip = input.record(window)?;
        pb.set_message(cadence.classify(&clip.samples).to_string());
        if let Some(report) = cadence.push_window(&clip.samples) {
            pb.inc(1);
            pb.println(format!(
                "Cycle {}/{}: Accuracy = {:.1}%",
                report.cycle, cycles, report.accuracy
            ));
        }
    }
    pb.finish_with_message("done");

    Ok(cadence.reports().to_vec())
}
