// Speech in both directions: cloud transcription of recorded phrases and a
// queued text-to-speech worker for spoken guidance.

pub mod google;
pub mod voice;

use crate::audio::AudioClip;
use anyhow::Result;

pub use google::GoogleTranscriber;
pub use voice::{CommandVoice, SilentVoice, SpeechEngine, VoiceBackend};

/// Turns a recorded phrase into text.
///
/// Failures are reported as `WellnessError::SpeechUnintelligible` when the
/// service heard nothing it could transcribe and `WellnessError::SpeechApi`
/// when the request itself failed.
pub trait Transcriber: Send {
    fn transcribe(&self, clip: &AudioClip) -> Result<String>;
}
