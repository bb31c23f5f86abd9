use super::{rms, AudioClip, Microphone};
use crate::error::WellnessError;
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Starting speech-onset threshold before ambient calibration
pub const DEFAULT_ENERGY_THRESHOLD: f64 = 300.0;
/// Calibrated threshold = ambient RMS × this ratio
pub const DYNAMIC_ENERGY_RATIO: f64 = 1.5;
/// Calibration never lowers the onset threshold below this
pub const MIN_ENERGY_THRESHOLD: f64 = 100.0;
/// Seconds of quiet that end a phrase
pub const PAUSE_SECS: f64 = 0.8;

const NO_DATA_TIMEOUT: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(50);

/// An open input stream delivering mono i16 chunks.
///
/// `cpal::Stream` is not `Send` on every host, so a `LiveInput` must be used
/// and dropped on the thread that opened it.
pub struct LiveInput {
    _stream: cpal::Stream,
    rx: Receiver<Vec<i16>>,
    pub sample_rate: u32,
}

impl LiveInput {
    /// Opens the default input device and starts capturing.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| WellnessError::MicrophoneUnavailable("no input device".to_string()))?;
        let supported = device.default_input_config().map_err(unavailable)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let (tx, rx) = channel::unbounded();
        let stream = match sample_format {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(downmix(data, channels, |s| s));
                },
                log_stream_error,
                None,
            ),
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(downmix(data, channels, f32_to_i16));
                },
                log_stream_error,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(downmix(data, channels, |s| (s as i32 - 32_768) as i16));
                },
                log_stream_error,
                None,
            ),
            other => {
                return Err(WellnessError::MicrophoneUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                ))
                .into())
            }
        }
        .map_err(unavailable)?;
        stream.play().map_err(unavailable)?;

        tracing::debug!(
            "Opened input device {} at {} Hz, {} channel(s)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            channels
        );

        Ok(Self {
            _stream: stream,
            rx,
            sample_rate,
        })
    }

    /// Waits for the next chunk. Errors when the device goes quiet for too
    /// long, which is how a yanked microphone shows up.
    pub fn next_chunk(&self) -> Result<Vec<i16>> {
        self.next_chunk_unless(None)
    }

    /// Like `next_chunk`, but gives up with `WellnessError::Interrupted` as
    /// soon as `interrupt` is set.
    pub fn next_chunk_unless(&self, interrupt: Option<&AtomicBool>) -> Result<Vec<i16>> {
        let started = Instant::now();
        loop {
            if interrupt.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(WellnessError::Interrupted.into());
            }
            match self.rx.recv_timeout(POLL) {
                Ok(chunk) => return Ok(chunk),
                Err(RecvTimeoutError::Timeout) if started.elapsed() < NO_DATA_TIMEOUT => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(WellnessError::MicrophoneUnavailable(
                        "input stream stopped delivering audio".to_string(),
                    )
                    .into())
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WellnessError::MicrophoneUnavailable(
                        "input stream closed".to_string(),
                    )
                    .into())
                }
            }
        }
    }

    /// Collects `duration` of audio into one clip.
    pub fn record(&self, duration: Duration) -> Result<AudioClip> {
        let wanted = (duration.as_secs_f64() * self.sample_rate as f64) as usize;
        let mut samples = Vec::with_capacity(wanted);
        while samples.len() < wanted {
            samples.extend(self.next_chunk()?);
        }
        samples.truncate(wanted);
        Ok(AudioClip::new(samples, self.sample_rate))
    }
}

fn unavailable(e: impl std::fmt::Display) -> WellnessError {
    WellnessError::MicrophoneUnavailable(e.to_string())
}

fn log_stream_error(err: cpal::StreamError) {
    tracing::warn!("Audio input stream error: {}", err);
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Averages interleaved frames down to one channel.
pub fn downmix<T: Copy>(data: &[T], channels: usize, to_i16: impl Fn(T) -> i16) -> Vec<i16> {
    if channels <= 1 {
        return data.iter().map(|&s| to_i16(s)).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| to_i16(s) as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseEvent {
    Waiting,
    Recording,
    Complete,
}

/// Energy-gated phrase endpointing over a stream of chunks.
///
/// Recording starts at the first chunk louder than the threshold and ends
/// after `PAUSE_SECS` of quiet or once `phrase_limit` of audio is held.
pub struct PhraseRecorder {
    energy_threshold: f64,
    sample_rate: u32,
    pause_samples: usize,
    limit_samples: usize,
    recording: bool,
    quiet_run: usize,
    buffer: Vec<i16>,
}

impl PhraseRecorder {
    pub fn new(energy_threshold: f64, sample_rate: u32, phrase_limit: Duration) -> Self {
        Self {
            energy_threshold,
            sample_rate,
            pause_samples: (PAUSE_SECS * sample_rate as f64) as usize,
            limit_samples: (phrase_limit.as_secs_f64() * sample_rate as f64) as usize,
            recording: false,
            quiet_run: 0,
            buffer: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[i16]) -> PhraseEvent {
        let loud = rms(chunk) > self.energy_threshold;

        if !self.recording {
            if !loud {
                return PhraseEvent::Waiting;
            }
            self.recording = true;
        }

        self.buffer.extend_from_slice(chunk);
        if loud {
            self.quiet_run = 0;
        } else {
            self.quiet_run += chunk.len();
        }

        if self.buffer.len() >= self.limit_samples {
            self.buffer.truncate(self.limit_samples);
            PhraseEvent::Complete
        } else if self.quiet_run >= self.pause_samples {
            PhraseEvent::Complete
        } else {
            PhraseEvent::Recording
        }
    }

    pub fn into_clip(self) -> AudioClip {
        AudioClip::new(self.buffer, self.sample_rate)
    }
}

/// Onset threshold for the given ambient recording.
pub fn ambient_energy_threshold(ambient: &AudioClip) -> f64 {
    (ambient.rms() * DYNAMIC_ENERGY_RATIO).max(MIN_ENERGY_THRESHOLD)
}

/// Default system microphone through cpal.
pub struct CpalMicrophone {
    energy_threshold: f64,
    interrupt: Option<Arc<AtomicBool>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            energy_threshold: DEFAULT_ENERGY_THRESHOLD,
            interrupt: None,
        }
    }

    pub fn energy_threshold(&self) -> f64 {
        self.energy_threshold
    }

    fn apply_ambient(&mut self, ambient: &AudioClip) {
        self.energy_threshold = ambient_energy_threshold(ambient);
        tracing::info!(
            "Microphone calibrated: ambient RMS {:.1}, energy threshold {:.1}",
            ambient.rms(),
            self.energy_threshold()
        );
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl Microphone for CpalMicrophone {
    fn calibrate_ambient(&mut self, duration: Duration) -> Result<()> {
        let input = LiveInput::open()?;
        let ambient = input.record(duration)?;
        self.apply_ambient(&ambient);
        Ok(())
    }

    fn listen(&mut self, start_timeout: Option<Duration>, phrase_limit: Duration) -> Result<AudioClip> {
        let input = LiveInput::open()?;
        let mut recorder = PhraseRecorder::new(self.energy_threshold, input.sample_rate, phrase_limit);
        let started = Instant::now();

        loop {
            let chunk = input.next_chunk_unless(self.interrupt.as_deref())?;
            match recorder.push(&chunk) {
                PhraseEvent::Complete => return Ok(recorder.into_clip()),
                PhraseEvent::Recording => {}
                PhraseEvent::Waiting => {
                    if let Some(limit) = start_timeout {
                        if started.elapsed() >= limit {
                            return Err(WellnessError::ListenTimeout.into());
                        }
                    }
                }
            }
        }
    }

    fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1_000;

    fn chunk(level: i16) -> Vec<i16> {
        // 100 ms at 1 kHz
        vec![level; 100]
    }

    #[test]
    fn test_downmix_stereo() {
        let data = [100i16, 300, -50, -150];
        assert_eq!(downmix(&data, 2, |s| s), vec![200, -100]);
        assert_eq!(downmix(&data, 1, |s| s), data.to_vec());
    }

    #[test]
    fn test_f32_conversion() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
    }

    #[test]
    fn test_recorder_waits_for_speech() {
        let mut recorder = PhraseRecorder::new(300.0, RATE, Duration::from_secs(15));
        assert_eq!(recorder.push(&chunk(10)), PhraseEvent::Waiting);
        assert_eq!(recorder.push(&chunk(1000)), PhraseEvent::Recording);
        assert_eq!(recorder.into_clip().samples.len(), 100);
    }

    #[test]
    fn test_recorder_ends_after_pause() {
        let mut recorder = PhraseRecorder::new(300.0, RATE, Duration::from_secs(15));
        recorder.push(&chunk(1000));
        for _ in 0..7 {
            assert_eq!(recorder.push(&chunk(0)), PhraseEvent::Recording);
        }
        assert_eq!(recorder.push(&chunk(0)), PhraseEvent::Complete);
        let clip = recorder.into_clip();
        assert_eq!(clip.samples.len(), 900);
        assert_eq!(clip.duration_secs(), 0.9);
    }

    #[test]
    fn test_recorder_quiet_run_resets_on_speech() {
        let mut recorder = PhraseRecorder::new(300.0, RATE, Duration::from_secs(15));
        recorder.push(&chunk(1000));
        for _ in 0..5 {
            recorder.push(&chunk(0));
        }
        assert_eq!(recorder.push(&chunk(1000)), PhraseEvent::Recording);
        for _ in 0..7 {
            assert_eq!(recorder.push(&chunk(0)), PhraseEvent::Recording);
        }
    }

    #[test]
    fn test_silent_calibration_keeps_threshold_floor() {
        let mut mic = CpalMicrophone::new();
        mic.apply_ambient(&AudioClip::new(vec![0; 16_000], 16_000));
        assert_eq!(mic.energy_threshold(), MIN_ENERGY_THRESHOLD);

        // A phrase recorder at the floored threshold ignores digital silence.
        let mut recorder = PhraseRecorder::new(mic.energy_threshold(), RATE, Duration::from_secs(15));
        assert_eq!(recorder.push(&chunk(0)), PhraseEvent::Waiting);
        assert_eq!(recorder.push(&chunk(5)), PhraseEvent::Waiting);
    }

    #[test]
    fn test_noisy_room_raises_threshold() {
        let ambient = AudioClip::new(vec![400, -400, 400, -400], 16_000);
        assert_eq!(ambient_energy_threshold(&ambient), 600.0);

        let mut mic = CpalMicrophone::default();
        assert_eq!(mic.energy_threshold(), DEFAULT_ENERGY_THRESHOLD);
        mic.apply_ambient(&ambient);
        assert_eq!(mic.energy_threshold(), 600.0);
    }

    #[test]
    fn test_recorder_phrase_limit() {
        let mut recorder = PhraseRecorder::new(300.0, RATE, Duration::from_millis(250));
        assert_eq!(recorder.push(&chunk(1000)), PhraseEvent::Recording);
        assert_eq!(recorder.push(&chunk(1000)), PhraseEvent::Recording);
        assert_eq!(recorder.push(&chunk(1000)), PhraseEvent::Complete);
        assert_eq!(recorder.into_clip().samples.len(), 250);
    }
}
