use thiserror::Error;

/// Failures at the device and service seams.
///
/// Application code works in `anyhow::Result`; these variants exist so callers
/// can tell a missing microphone from an unreachable recognizer with
/// `downcast_ref` and degrade accordingly.
#[derive(Debug, Error)]
pub enum WellnessError {
    #[error("cannot open camera {index} (check that no other app holds it and that camera permission is granted)")]
    CameraUnavailable { index: i32 },

    #[error("cannot read a frame from the camera")]
    CameraRead,

    #[error("no usable microphone: {0} (check microphone permission)")]
    MicrophoneUnavailable(String),

    #[error("timed out waiting for audio")]
    ListenTimeout,

    #[error("listening was interrupted")]
    Interrupted,

    #[error("speech service request failed: {0}")]
    SpeechApi(String),

    #[error("speech was not intelligible")]
    SpeechUnintelligible,

    #[error("model error: {0}")]
    Model(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
