pub mod capture;

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

pub use capture::CpalMicrophone;

/// Mono 16-bit PCM recording
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Length in seconds, rounded to hundredths.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        let secs = self.samples.len() as f64 / self.sample_rate as f64;
        (secs * 100.0).round() / 100.0
    }

    pub fn rms(&self) -> f64 {
        rms(&self.samples)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian LINEAR16 bytes, the layout cloud recognizers expect.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// A source of spoken phrases.
///
/// Implementations own their device handle for the duration of a call so the
/// capture stream always lives on the recording thread.
pub trait Microphone: Send {
    /// Samples ambient noise and adjusts the speech-onset energy threshold.
    fn calibrate_ambient(&mut self, duration: Duration) -> Result<()>;

    /// Records one phrase: waits up to `start_timeout` for speech to begin
    /// (`WellnessError::ListenTimeout` otherwise), then records until a pause
    /// or `phrase_limit`.
    fn listen(&mut self, start_timeout: Option<Duration>, phrase_limit: Duration) -> Result<AudioClip>;

    /// Flag that, once set, makes a `listen` in progress return
    /// `WellnessError::Interrupted` promptly.
    fn set_interrupt(&mut self, _flag: Arc<AtomicBool>) {}
}
