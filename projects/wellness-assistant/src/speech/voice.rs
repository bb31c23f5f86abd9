use crate::config::TtsConfig;
use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Something that can voice a line of text, blocking until it is spoken.
pub trait VoiceBackend: Send {
    fn say(&mut self, text: &str) -> Result<()>;
}

/// Logs instead of speaking. Used when muted or when no synthesizer exists.
pub struct SilentVoice;

impl VoiceBackend for SilentVoice {
    fn say(&mut self, text: &str) -> Result<()> {
        tracing::info!("(muted) {}", text);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechProgram {
    EspeakNg,
    Espeak,
    Say,
    SpdSay,
}

impl SpeechProgram {
    const ALL: [SpeechProgram; 4] = [
        SpeechProgram::EspeakNg,
        SpeechProgram::Espeak,
        SpeechProgram::Say,
        SpeechProgram::SpdSay,
    ];

    pub fn binary(&self) -> &'static str {
        match self {
            SpeechProgram::EspeakNg => "espeak-ng",
            SpeechProgram::Espeak => "espeak",
            SpeechProgram::Say => "say",
            SpeechProgram::SpdSay => "spd-say",
        }
    }

    fn args(&self, text: &str, rate: u32, voice: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            SpeechProgram::EspeakNg | SpeechProgram::Espeak => {
                args.extend(["-s".to_string(), rate.to_string()]);
                if let Some(v) = voice {
                    args.extend(["-v".to_string(), v.to_string()]);
                }
            }
            SpeechProgram::Say => {
                args.extend(["-r".to_string(), rate.to_string()]);
                if let Some(v) = voice {
                    args.extend(["-v".to_string(), v.to_string()]);
                }
            }
            SpeechProgram::SpdSay => {
                // speech-dispatcher rates are relative, -100..=100 around ~180 wpm
                let relative = ((rate as i32 - 180) / 2).clamp(-100, 100);
                args.extend(["-w".to_string(), "-r".to_string(), relative.to_string()]);
                if let Some(v) = voice {
                    args.extend(["-t".to_string(), v.to_string()]);
                }
            }
        }
        args.push(text.to_string());
        args
    }
}

/// Speaks through whichever command-line synthesizer is installed.
pub struct CommandVoice {
    program: SpeechProgram,
    rate: u32,
    voice: Option<String>,
}

impl CommandVoice {
    pub fn new(program: SpeechProgram, rate: u32, voice: Option<String>) -> Self {
        Self {
            program,
            rate,
            voice,
        }
    }

    /// Finds the first synthesizer on `PATH` and picks a preferred voice for it.
    pub fn detect(config: &TtsConfig) -> Option<Self> {
        let program = SpeechProgram::ALL
            .into_iter()
            .find(|p| on_path(p.binary()))?;
        let voice = preferred_voice(program, &config.preferred_voices);
        tracing::info!(
            "Speech output via {} (rate {}, voice {})",
            program.binary(),
            config.speech_rate,
            voice.as_deref().unwrap_or("default")
        );
        Some(Self::new(program, config.speech_rate, voice))
    }
}

impl VoiceBackend for CommandVoice {
    fn say(&mut self, text: &str) -> Result<()> {
        let status = Command::new(self.program.binary())
            .args(self.program.args(text, self.rate, self.voice.as_deref()))
            .status()
            .with_context(|| format!("Failed to run {}", self.program.binary()))?;
        if !status.success() {
            return Err(anyhow!("{} exited with {}", self.program.binary(), status));
        }
        Ok(())
    }
}

fn on_path(binary: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_file(&dir.join(binary))))
        .unwrap_or(false)
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

fn preferred_voice(program: SpeechProgram, preferred: &[String]) -> Option<String> {
    let wants_female = preferred.iter().any(|p| p.eq_ignore_ascii_case("female"));
    match program {
        SpeechProgram::EspeakNg | SpeechProgram::Espeak => wants_female.then(|| "en+f3".to_string()),
        SpeechProgram::SpdSay => wants_female.then(|| "female1".to_string()),
        SpeechProgram::Say => {
            let output = Command::new("say").args(["-v", "?"]).output().ok()?;
            pick_listed_voice(&String::from_utf8_lossy(&output.stdout), preferred)
        }
    }
}

/// Picks the first voice from a `say -v ?` listing whose line mentions a
/// preferred keyword.
fn pick_listed_voice(listing: &str, preferred: &[String]) -> Option<String> {
    preferred.iter().find_map(|keyword| {
        let keyword = keyword.to_lowercase();
        listing
            .lines()
            .find(|line| line.to_lowercase().contains(&keyword))
            .and_then(|line| line.split_whitespace().next())
            .map(|name| name.to_string())
    })
}

/// Queued text-to-speech with a single worker thread.
///
/// `speak` never blocks the caller; utterances are voiced in the order they
/// were queued. `speak_sync` voices immediately on the calling thread and
/// shares the backend with the worker, so the two never talk over each other.
pub struct SpeechEngine {
    tx: Sender<String>,
    rx: Receiver<String>,
    backend: Arc<Mutex<Box<dyn VoiceBackend>>>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechEngine {
    pub fn new(backend: Box<dyn VoiceBackend>) -> Self {
        let (tx, rx) = channel::unbounded::<String>();
        let backend = Arc::new(Mutex::new(backend));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let rx = rx.clone();
            let backend = backend.clone();
            let stop = stop.clone();
            thread::spawn(move || speech_worker(rx, backend, stop))
        };

        Self {
            tx,
            rx,
            backend,
            stop,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Command-line synthesizer when available, silent when muted or missing.
    pub fn from_config(config: &TtsConfig) -> Self {
        if config.mute {
            return Self::new(Box::new(SilentVoice));
        }
        match CommandVoice::detect(config) {
            Some(voice) => Self::new(Box::new(voice)),
            None => {
                tracing::warn!("No speech synthesizer found (tried espeak-ng, espeak, say, spd-say); guidance will be logged only");
                Self::new(Box::new(SilentVoice))
            }
        }
    }

    pub fn speak(&self, text: impl Into<String>) {
        if self.tx.send(text.into()).is_err() {
            tracing::warn!("Speech engine stopped; dropping utterance");
        }
    }

    pub fn speak_sync(&self, text: &str) -> Result<()> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("speech backend lock poisoned"))?;
        backend.say(text)
    }

    /// Drops everything still queued and returns how many items were dropped.
    pub fn clear_queue(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SpeechEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn speech_worker(
    rx: Receiver<String>,
    backend: Arc<Mutex<Box<dyn VoiceBackend>>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let text = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(text) => text,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let result = match backend.lock() {
            Ok(mut voice) => voice.say(&text),
            Err(_) => Err(anyhow!("speech backend lock poisoned")),
        };
        if let Err(e) = result {
            tracing::warn!("Speech engine error: {:#}", e);
        }
    }
    tracing::debug!("Speech worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct Recorder {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl VoiceBackend for Recorder {
        fn say(&mut self, text: &str) -> Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Signals when it starts an utterance, then waits for a release.
    struct Gated {
        started: Sender<String>,
        release: Receiver<()>,
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl VoiceBackend for Gated {
        fn say(&mut self, text: &str) -> Result<()> {
            self.started.send(text.to_string()).unwrap();
            self.release.recv().unwrap();
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Failing;

    impl VoiceBackend for Failing {
        fn say(&mut self, _text: &str) -> Result<()> {
            Err(anyhow!("no audio device"))
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let recorder = Recorder::default();
        let engine = SpeechEngine::new(Box::new(recorder.clone()));
        for text in ["Inhale...", "Exhale...", "Begin chant Om..."] {
            engine.speak(text);
        }
        wait_for(|| recorder.spoken.lock().unwrap().len() == 3);
        assert_eq!(
            *recorder.spoken.lock().unwrap(),
            vec!["Inhale...", "Exhale...", "Begin chant Om..."]
        );
        engine.stop();
    }

    #[test]
    fn test_clear_queue_drops_pending() {
        let (started_tx, started_rx) = channel::unbounded();
        let (release_tx, release_rx) = channel::unbounded();
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let engine = SpeechEngine::new(Box::new(Gated {
            started: started_tx,
            release: release_rx,
            spoken: spoken.clone(),
        }));

        engine.speak("first");
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");
        engine.speak("second");
        engine.speak("third");
        assert_eq!(engine.pending(), 2);
        assert_eq!(engine.clear_queue(), 2);
        assert_eq!(engine.pending(), 0);

        release_tx.send(()).unwrap();
        engine.stop();
        assert_eq!(*spoken.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_backend_errors_do_not_stop_worker() {
        let engine = SpeechEngine::new(Box::new(Failing));
        engine.speak("one");
        engine.speak("two");
        wait_for(|| engine.pending() == 0);
        engine.stop();
    }

    #[test]
    fn test_speak_sync() {
        let recorder = Recorder::default();
        let engine = SpeechEngine::new(Box::new(recorder.clone()));
        engine.speak_sync("now").unwrap();
        assert_eq!(*recorder.spoken.lock().unwrap(), vec!["now"]);
    }

    #[test]
    fn test_program_args() {
        assert_eq!(
            SpeechProgram::Espeak.args("hi", 140, Some("en+f3")),
            vec!["-s", "140", "-v", "en+f3", "hi"]
        );
        assert_eq!(SpeechProgram::Say.args("hi", 140, None), vec!["-r", "140", "hi"]);
        assert_eq!(
            SpeechProgram::SpdSay.args("hi", 140, None),
            vec!["-w", "-r", "-20", "hi"]
        );
    }

    #[test]
    fn test_pick_listed_voice() {
        let listing = "Alex      en_US    # Most people recognize me by my voice.\n\
                       Zira      en_US    # Hello, my name is Zira.\n";
        let preferred = vec!["female".to_string(), "zira".to_string()];
        assert_eq!(pick_listed_voice(listing, &preferred), Some("Zira".to_string()));
        assert_eq!(pick_listed_voice(listing, &["nobody".to_string()]), None);
    }
}
