pub mod cadence;
pub mod chant;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use chant::{ChantDetector, ChantStats};
pub use worker::BreathingWorker;

/// Result of one guided breathing and chant session
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SessionOutcome {
    pub detected: bool,
    /// Seconds of recorded chant, rounded to hundredths
    pub duration: f64,
}
