use super::SessionOutcome;
use crate::audio::{AudioClip, Microphone};
use crate::config::{BreathingConfig, SpeechConfig};
use crate::error::WellnessError;
use crate::speech::{SpeechEngine, Transcriber};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Phrase limit for the quick, non-blocking listen
const QUICK_PHRASE_LIMIT: Duration = Duration::from_secs(2);
/// Phrase limit for the microphone self-test
const TEST_PHRASE_LIMIT: Duration = Duration::from_secs(3);

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChantStats {
    pub total_sessions: usize,
    pub successful_detections: usize,
    /// Percent of sessions with a detected chant
    pub success_rate: f64,
    pub total_chant_duration: f64,
    /// Mean over successful sessions only
    pub average_chant_duration: f64,
}

#[derive(Debug, Default)]
struct Tally {
    total_sessions: usize,
    successful_detections: usize,
    total_chant_duration: f64,
}

impl Tally {
    fn snapshot(&self) -> ChantStats {
        let success_rate = if self.total_sessions > 0 {
            self.successful_detections as f64 / self.total_sessions as f64 * 100.0
        } else {
            0.0
        };
        let average_chant_duration = if self.successful_detections > 0 {
            self.total_chant_duration / self.successful_detections as f64
        } else {
            0.0
        };
        ChantStats {
            total_sessions: self.total_sessions,
            successful_detections: self.successful_detections,
            success_rate,
            total_chant_duration: self.total_chant_duration,
            average_chant_duration,
        }
    }
}

/// Shared view of a detector's counters, readable while a session runs.
#[derive(Clone, Default)]
pub struct ChantStatsHandle(Arc<Mutex<Tally>>);

impl ChantStatsHandle {
    pub fn stats(&self) -> ChantStats {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).snapshot()
    }

    pub fn reset(&self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Tally::default();
    }

    fn record(&self, outcome: SessionOutcome) {
        let mut tally = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if outcome.detected {
            tally.successful_detections += 1;
        }
        tally.total_chant_duration += outcome.duration;
    }

    fn begin_session(&self) -> usize {
        let mut tally = self.0.lock().unwrap_or_else(|e| e.into_inner());
        tally.total_sessions += 1;
        tally.total_sessions
    }
}

/// Breathing guidance followed by listening for an "Om" chant.
pub struct ChantDetector {
    microphone: Box<dyn Microphone>,
    transcriber: Box<dyn Transcriber>,
    speech: Arc<SpeechEngine>,
    om_keywords: Vec<String>,
    silence_threshold: f64,
    strict_recognition: bool,
    max_listen: Duration,
    inhale: Duration,
    exhale: Duration,
    stats: ChantStatsHandle,
    interrupt: Arc<AtomicBool>,
}

impl ChantDetector {
    pub fn new(
        mut microphone: Box<dyn Microphone>,
        transcriber: Box<dyn Transcriber>,
        speech: Arc<SpeechEngine>,
        speech_config: &SpeechConfig,
        breathing_config: &BreathingConfig,
    ) -> Self {
        let interrupt = Arc::new(AtomicBool::new(false));
        microphone.set_interrupt(interrupt.clone());
        Self {
            microphone,
            transcriber,
            speech,
            om_keywords: speech_config
                .om_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            silence_threshold: speech_config.silence_threshold,
            strict_recognition: speech_config.strict_recognition,
            max_listen: Duration::from_secs(breathing_config.max_listen_secs),
            inhale: Duration::from_secs(breathing_config.inhale_secs),
            exhale: Duration::from_secs(breathing_config.exhale_secs),
            stats: ChantStatsHandle::default(),
            interrupt,
        }
    }

    pub fn stats_handle(&self) -> ChantStatsHandle {
        self.stats.clone()
    }

    /// Setting the returned flag cuts short the guidance pauses of a running
    /// session, aborts a listen in progress and skips transcription.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn calibrate_microphone(&mut self, duration: Duration) -> Result<()> {
        tracing::info!("Calibrating microphone for {:.1}s...", duration.as_secs_f64());
        self.microphone.calibrate_ambient(duration)?;
        tracing::info!("Microphone calibration complete");
        Ok(())
    }

    pub fn guide_breathing(&self) {
        self.speech.speak("Inhale...");
        self.pause(self.inhale);
        self.speech.speak("Exhale...");
        self.pause(self.exhale);
        self.speech.speak("Begin chant Om...");
    }

    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.interrupted() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    fn contains_keyword(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        let text = text.trim();
        self.om_keywords.iter().any(|k| text.contains(k.as_str()))
    }

    /// Records one phrase and decides whether it was a chant.
    ///
    /// Returns `(detected, duration_secs)`. Quiet recordings are never a
    /// chant; unintelligible audio counts unless recognition is strict;
    /// recognizer failures count as not detected. Device failures give
    /// `(false, 0.0)`.
    pub fn detect_chant_blocking(&mut self, max_listen: Option<Duration>) -> (bool, f64) {
        let max_listen = max_listen.unwrap_or(self.max_listen);
        tracing::info!("Listening for chant...");

        let clip = match self.microphone.listen(Some(max_listen), max_listen) {
            Ok(clip) => clip,
            Err(e) if is_listen_timeout(&e) => {
                tracing::info!("No chant detected (silence)");
                return (false, 0.0);
            }
            Err(e) if is_interrupted(&e) => {
                tracing::info!("Chant listening interrupted");
                return (false, 0.0);
            }
            Err(e) => {
                tracing::warn!("Chant detection error: {:#}", e);
                return (false, 0.0);
            }
        };
        if self.interrupted() {
            tracing::info!("Chant listening interrupted");
            return (false, 0.0);
        }
        let duration = clip.duration_secs();

        if self.is_silent(&clip) {
            tracing::info!("No chant detected (silence)");
            return (false, duration);
        }

        let detected = match self.transcriber.transcribe(&clip) {
            Ok(text) => {
                tracing::info!("Recognized text: '{}'", text.to_lowercase().trim());
                self.contains_keyword(&text)
            }
            Err(e) => match e.downcast_ref::<WellnessError>() {
                Some(WellnessError::SpeechUnintelligible) => {
                    tracing::warn!("Could not understand audio");
                    !self.strict_recognition
                }
                _ => {
                    tracing::warn!("Speech recognition error: {:#}", e);
                    false
                }
            },
        };

        if detected {
            tracing::info!("Om detected | Duration: {} seconds", duration);
        } else {
            tracing::info!(
                "Chant detected (not recognized as Om) | Duration: {} seconds",
                duration
            );
        }
        (detected, duration)
    }

    /// Short listen for real-time callers.
    ///
    /// Returns `(detected, duration_secs, still_listening)`; `still_listening`
    /// is true only when nothing started within `timeout`.
    pub fn detect_chant_non_blocking(&mut self, timeout: Duration) -> (bool, f64, bool) {
        let clip = match self.microphone.listen(Some(timeout), QUICK_PHRASE_LIMIT) {
            Ok(clip) => clip,
            Err(e) if is_listen_timeout(&e) => return (false, 0.0, true),
            Err(e) => {
                tracing::warn!("Non-blocking detection error: {:#}", e);
                return (false, 0.0, false);
            }
        };
        let duration = clip.duration_secs();

        if self.is_silent(&clip) {
            return (false, duration, false);
        }

        let detected = self
            .transcriber
            .transcribe(&clip)
            .map(|text| self.contains_keyword(&text))
            .unwrap_or(false);
        (detected, duration, false)
    }

    /// Guides one breathing cycle, listens for the chant and records the result.
    pub fn complete_breathing_session(&mut self) -> SessionOutcome {
        let session_number = self.stats.begin_session();
        let started = Instant::now();
        tracing::info!(
            "[{}] Starting breathing & chant session #{}...",
            chrono::Local::now().format("%H:%M:%S"),
            session_number
        );

        self.guide_breathing();
        let (detected, duration) = if self.interrupted() {
            (false, 0.0)
        } else {
            self.detect_chant_blocking(None)
        };

        let outcome = SessionOutcome { detected, duration };
        self.stats.record(outcome);
        tracing::info!(
            "Session completed in {:.1}s total",
            started.elapsed().as_secs_f64()
        );
        outcome
    }

    pub fn stats(&self) -> ChantStats {
        self.stats.stats()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Records a short phrase and transcribes it; returns what was heard.
    pub fn test_microphone(&mut self, timeout: Duration) -> Result<String> {
        tracing::info!("Testing microphone, say something...");
        let clip = self.microphone.listen(Some(timeout), TEST_PHRASE_LIMIT)?;
        let text = self.transcriber.transcribe(&clip)?;
        tracing::info!("Microphone test successful. Heard: '{}'", text);
        Ok(text)
    }

    fn is_silent(&self, clip: &AudioClip) -> bool {
        clip.is_empty() || clip.rms() < self.silence_threshold
    }
}

fn is_listen_timeout(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<WellnessError>(),
        Some(WellnessError::ListenTimeout)
    )
}

fn is_interrupted(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<WellnessError>(),
        Some(WellnessError::Interrupted)
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::speech::SilentVoice;
    use std::collections::VecDeque;

    /// Plays back queued results, then times out.
    pub(crate) struct ScriptedMic {
        pub clips: VecDeque<Result<AudioClip>>,
    }

    impl ScriptedMic {
        pub(crate) fn new(clips: Vec<Result<AudioClip>>) -> Self {
            Self {
                clips: clips.into(),
            }
        }
    }

    impl Microphone for ScriptedMic {
        fn calibrate_ambient(&mut self, _duration: Duration) -> Result<()> {
            Ok(())
        }

        fn listen(&mut self, _start: Option<Duration>, _limit: Duration) -> Result<AudioClip> {
            self.clips
                .pop_front()
                .unwrap_or_else(|| Err(WellnessError::ListenTimeout.into()))
        }
    }

    /// Blocks in `listen` until its interrupt flag is set, announcing on
    /// `entered` when a listen begins.
    pub(crate) struct BlockingMic {
        flag: Option<Arc<AtomicBool>>,
        entered: crossbeam::channel::Sender<()>,
    }

    impl BlockingMic {
        pub(crate) fn new() -> (Self, crossbeam::channel::Receiver<()>) {
            let (entered, rx) = crossbeam::channel::unbounded();
            (Self { flag: None, entered }, rx)
        }
    }

    impl Microphone for BlockingMic {
        fn calibrate_ambient(&mut self, _duration: Duration) -> Result<()> {
            Ok(())
        }

        fn listen(&mut self, _start: Option<Duration>, _limit: Duration) -> Result<AudioClip> {
            let _ = self.entered.send(());
            let started = Instant::now();
            while started.elapsed() < Duration::from_secs(30) {
                if self.flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
                    return Err(WellnessError::Interrupted.into());
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(WellnessError::ListenTimeout.into())
        }

        fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
            self.flag = Some(flag);
        }
    }

    pub(crate) enum Heard {
        Text(&'static str),
        Unintelligible,
        ApiDown,
    }

    pub(crate) struct FixedTranscriber(pub Heard);

    impl Transcriber for FixedTranscriber {
        fn transcribe(&self, _clip: &AudioClip) -> Result<String> {
            match self.0 {
                Heard::Text(t) => Ok(t.to_string()),
                Heard::Unintelligible => Err(WellnessError::SpeechUnintelligible.into()),
                Heard::ApiDown => Err(WellnessError::SpeechApi("connection refused".into()).into()),
            }
        }
    }

    pub(crate) fn loud_clip(secs: f64) -> AudioClip {
        let n = (secs * 16_000.0) as usize;
        AudioClip::new((0..n).map(|i| if i % 2 == 0 { 2000 } else { -2000 }).collect(), 16_000)
    }

    fn quiet_clip() -> AudioClip {
        AudioClip::new(vec![50; 16_000], 16_000)
    }

    pub(crate) fn quick_breathing() -> BreathingConfig {
        BreathingConfig {
            inhale_secs: 0,
            exhale_secs: 0,
            ..BreathingConfig::default()
        }
    }

    pub(crate) fn detector(
        clips: Vec<Result<AudioClip>>,
        heard: Heard,
        strict: bool,
    ) -> ChantDetector {
        let speech_config = SpeechConfig {
            strict_recognition: strict,
            ..SpeechConfig::default()
        };
        ChantDetector::new(
            Box::new(ScriptedMic::new(clips)),
            Box::new(FixedTranscriber(heard)),
            Arc::new(SpeechEngine::new(Box::new(SilentVoice))),
            &speech_config,
            &quick_breathing(),
        )
    }

    #[test]
    fn test_silence_is_not_a_chant() {
        let mut d = detector(vec![Ok(quiet_clip())], Heard::Text("om"), false);
        assert_eq!(d.detect_chant_blocking(None), (false, 1.0));
    }

    #[test]
    fn test_keyword_detected() {
        let mut d = detector(vec![Ok(loud_clip(2.5))], Heard::Text("  OHM shanti "), false);
        assert_eq!(d.detect_chant_blocking(None), (true, 2.5));
    }

    #[test]
    fn test_other_words_not_detected() {
        let mut d = detector(vec![Ok(loud_clip(1.0))], Heard::Text("hello there"), false);
        assert_eq!(d.detect_chant_blocking(None), (false, 1.0));
    }

    #[test]
    fn test_unintelligible_lenient_and_strict() {
        let mut lenient = detector(vec![Ok(loud_clip(1.0))], Heard::Unintelligible, false);
        assert_eq!(lenient.detect_chant_blocking(None), (true, 1.0));

        let mut strict = detector(vec![Ok(loud_clip(1.0))], Heard::Unintelligible, true);
        assert_eq!(strict.detect_chant_blocking(None), (false, 1.0));
    }

    #[test]
    fn test_api_error_not_detected() {
        let mut d = detector(vec![Ok(loud_clip(1.0))], Heard::ApiDown, false);
        assert_eq!(d.detect_chant_blocking(None), (false, 1.0));
    }

    #[test]
    fn test_device_errors() {
        let mut d = detector(
            vec![Err(WellnessError::MicrophoneUnavailable("unplugged".into()).into())],
            Heard::Text("om"),
            false,
        );
        assert_eq!(d.detect_chant_blocking(None), (false, 0.0));
        // Script exhausted: the microphone now times out.
        assert_eq!(d.detect_chant_blocking(None), (false, 0.0));
    }

    #[test]
    fn test_non_blocking() {
        let mut d = detector(
            vec![Ok(loud_clip(1.0)), Ok(quiet_clip())],
            Heard::Text("aum"),
            false,
        );
        assert_eq!(d.detect_chant_non_blocking(Duration::from_secs(1)), (true, 1.0, false));
        assert_eq!(d.detect_chant_non_blocking(Duration::from_secs(1)), (false, 1.0, false));
        assert_eq!(d.detect_chant_non_blocking(Duration::from_secs(1)), (false, 0.0, true));
    }

    #[test]
    fn test_session_stats() {
        let mut d = detector(
            vec![Ok(loud_clip(2.0)), Ok(loud_clip(4.0)), Ok(quiet_clip())],
            Heard::Text("om"),
            false,
        );
        assert!(d.complete_breathing_session().detected);
        assert!(d.complete_breathing_session().detected);
        assert!(!d.complete_breathing_session().detected);

        let stats = d.stats();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.successful_detections, 2);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((stats.total_chant_duration - 7.0).abs() < 1e-9);
        assert!((stats.average_chant_duration - 3.5).abs() < 1e-9);

        d.reset_stats();
        assert_eq!(d.stats(), ChantStats::default());
    }

    #[test]
    fn test_interrupted_session_skips_listening() {
        let mut d = detector(vec![Ok(loud_clip(1.0))], Heard::Text("om"), false);
        d.interrupt_handle().store(true, Ordering::Relaxed);
        let outcome = d.complete_breathing_session();
        assert!(!outcome.detected);
        assert_eq!(d.stats().total_sessions, 1);
    }

    struct CountingTranscriber(Arc<std::sync::atomic::AtomicUsize>);

    impl Transcriber for CountingTranscriber {
        fn transcribe(&self, _clip: &AudioClip) -> Result<String> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok("om".to_string())
        }
    }

    #[test]
    fn test_interrupt_wakes_blocked_listen() {
        let (mic, entered) = BlockingMic::new();
        let mut d = ChantDetector::new(
            Box::new(mic),
            Box::new(FixedTranscriber(Heard::Text("om"))),
            Arc::new(SpeechEngine::new(Box::new(SilentVoice))),
            &SpeechConfig::default(),
            &quick_breathing(),
        );
        let interrupt = d.interrupt_handle();
        let trigger = thread::spawn(move || {
            entered.recv_timeout(Duration::from_secs(5)).unwrap();
            interrupt.store(true, Ordering::Relaxed);
        });

        let started = Instant::now();
        assert_eq!(d.detect_chant_blocking(None), (false, 0.0));
        assert!(started.elapsed() < Duration::from_secs(1));
        trigger.join().unwrap();
    }

    #[test]
    fn test_interrupt_skips_transcription() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut d = ChantDetector::new(
            Box::new(ScriptedMic::new(vec![Ok(loud_clip(1.0))])),
            Box::new(CountingTranscriber(calls.clone())),
            Arc::new(SpeechEngine::new(Box::new(SilentVoice))),
            &SpeechConfig::default(),
            &quick_breathing(),
        );
        d.interrupt_handle().store(true, Ordering::Relaxed);
        assert_eq!(d.detect_chant_blocking(None), (false, 0.0));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_empty_clip_is_silence() {
        let mut d = detector(vec![Ok(AudioClip::new(vec![], 16_000))], Heard::Text("om"), false);
        assert_eq!(d.detect_chant_blocking(None), (false, 0.0));
    }

    #[test]
    fn test_microphone_check() {
        let mut d = detector(vec![Ok(loud_clip(1.0))], Heard::Text("testing"), false);
        assert_eq!(d.test_microphone(Duration::from_secs(1)).unwrap(), "testing");
        assert!(d.test_microphone(Duration::from_secs(1)).is_err());
    }
}
