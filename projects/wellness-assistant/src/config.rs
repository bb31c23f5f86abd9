use crate::error::WellnessError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub index: i32,
    pub frame_width: i32,
    pub frame_height: i32,
    pub fps: f64,
    pub flip_horizontal: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            frame_width: 640,
            frame_height: 480,
            fps: 30.0,
            flip_horizontal: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PostureConfig {
    pub auto_calibration_frames: usize,
    pub shoulder_tilt_tolerance: f32,
    pub head_forward_tolerance: f32,
    pub slouch_tolerance: f32,
    /// Degrees
    pub head_tilt_tolerance: f32,
    pub min_detection_confidence: f32,
    /// Fractions of frame width
    pub too_close: f32,
    pub too_far: f32,
    pub model_path: String,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            auto_calibration_frames: 75,
            shoulder_tilt_tolerance: 1.5,
            head_forward_tolerance: 1.5,
            slouch_tolerance: 0.8,
            head_tilt_tolerance: 15.0,
            min_detection_confidence: 0.5,
            too_close: 0.15,
            too_far: 0.6,
            model_path: "models/yolov8n-pose.onnx".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EyeConfig {
    pub default_ear_threshold: f32,
    pub calibration_frames_min: usize,
    pub min_detection_confidence: f32,
    pub model_path: String,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            default_ear_threshold: 0.22,
            calibration_frames_min: 30,
            min_detection_confidence: 0.5,
            model_path: "models/face_landmark.onnx".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SpeechConfig {
    pub recognizer_timeout_secs: f64,
    pub phrase_time_limit_secs: f64,
    pub ambient_noise_duration_secs: f64,
    /// RMS of 16-bit samples below which a recording counts as silence
    pub silence_threshold: f64,
    pub api_timeout_secs: f64,
    pub om_keywords: Vec<String>,
    /// When false, audio the recognizer cannot understand still counts as a chant
    pub strict_recognition: bool,
    pub language: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            recognizer_timeout_secs: 1.0,
            phrase_time_limit_secs: 15.0,
            ambient_noise_duration_secs: 2.0,
            silence_threshold: 300.0,
            api_timeout_secs: 5.0,
            om_keywords: ["om", "aum", "ohm", "oom", "um", "hmm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            strict_recognition: false,
            language: "en-US".to_string(),
            endpoint: "https://speech.googleapis.com/v1/speech:recognize".to_string(),
            api_key: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TtsConfig {
    /// Words per minute
    pub speech_rate: u32,
    pub preferred_voices: Vec<String>,
    pub mute: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            speech_rate: 140,
            preferred_voices: vec!["female".to_string(), "zira".to_string()],
            mute: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BreathingConfig {
    pub enabled: bool,
    pub default_interval_secs: u64,
    pub inhale_secs: u64,
    pub exhale_secs: u64,
    pub max_listen_secs: u64,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
}

impl Default for BreathingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_interval_secs: 20,
            inhale_secs: 4,
            exhale_secs: 6,
            max_listen_secs: 15,
            min_interval_secs: 10,
            max_interval_secs: 300,
        }
    }
}

impl BreathingConfig {
    /// Inverted bounds resolve to `max_interval_secs` instead of panicking.
    pub fn clamp_interval(&self, secs: u64) -> u64 {
        secs.max(self.min_interval_secs).min(self.max_interval_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub calibration_countdown_secs: u64,
    pub calibration_duration_secs: u64,
    pub stats_update_interval_secs: f64,
    pub component_test_timeout_secs: u64,
    pub log_level: String,
    pub auto_save_stats: bool,
    pub window_name: String,
    /// Marks the detected pose keypoints on the live frame
    pub show_landmarks: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            calibration_countdown_secs: 5,
            calibration_duration_secs: 3,
            stats_update_interval_secs: 1.0,
            component_test_timeout_secs: 10,
            log_level: "info".to_string(),
            auto_save_stats: true,
            window_name: "Unified Wellness Assistant".to_string(),
            show_landmarks: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_bad_posture_streak: usize,
    pub max_eyes_closed_streak: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_bad_posture_streak: 100,
            max_eyes_closed_streak: 50,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub data_directory: PathBuf,
    pub calibration_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            calibration_file: "calibration_data.json".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn calibration_path(&self) -> PathBuf {
        self.data_directory.join(&self.calibration_file)
    }
}

/// All settings, one section per component. Every section defaults
/// independently so a partial JSON file only overrides what it names.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct WellnessConfig {
    pub camera: CameraConfig,
    pub posture: PostureConfig,
    pub eye: EyeConfig,
    pub speech: SpeechConfig,
    pub tts: TtsConfig,
    pub breathing: BreathingConfig,
    pub app: AppConfig,
    pub limits: LimitsConfig,
    pub paths: PathsConfig,
}

impl WellnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: WellnessConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise returns defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                tracing::warn!("Config file {:?} not found, using defaults", p);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Returns a list of human-readable problems; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(0..=10).contains(&self.camera.index) {
            errors.push("Invalid camera index".to_string());
        }
        if self.camera.frame_width < 320 || self.camera.frame_height < 240 {
            errors.push("Frame size too small".to_string());
        }

        let b = &self.breathing;
        if b.default_interval_secs < b.min_interval_secs {
            errors.push("Breathing interval too small".to_string());
        }
        if b.default_interval_secs > b.max_interval_secs {
            errors.push("Breathing interval too large".to_string());
        }
        if b.min_interval_secs > b.max_interval_secs {
            errors.push("Breathing min_interval_secs exceeds max_interval_secs".to_string());
        }
        if b.inhale_secs == 0 || b.exhale_secs == 0 {
            errors.push("Invalid breathing durations".to_string());
        }

        let s = &self.speech;
        for (name, value) in [
            ("speech.recognizer_timeout_secs", s.recognizer_timeout_secs),
            ("speech.phrase_time_limit_secs", s.phrase_time_limit_secs),
            ("speech.ambient_noise_duration_secs", s.ambient_noise_duration_secs),
            ("speech.api_timeout_secs", s.api_timeout_secs),
            ("app.stats_update_interval_secs", self.app.stats_update_interval_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("Invalid {}: {}", name, value));
            }
        }
        if !s.silence_threshold.is_finite() || s.silence_threshold < 0.0 {
            errors.push("Invalid speech.silence_threshold".to_string());
        }

        let p = &self.posture;
        for (name, value) in [
            ("shoulder_tilt_tolerance", p.shoulder_tilt_tolerance),
            ("head_forward_tolerance", p.head_forward_tolerance),
            ("slouch_tolerance", p.slouch_tolerance),
        ] {
            if value <= 0.0 {
                errors.push(format!("Invalid posture {}", name));
            }
        }
        if p.auto_calibration_frames == 0 {
            errors.push("Posture calibration needs at least one frame".to_string());
        }

        errors
    }

    /// `validate()` as a `Result`, for commands that must not start with a
    /// broken configuration.
    pub fn ensure_valid(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(WellnessError::InvalidConfig(problems.join("; ")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = WellnessConfig::default();
        assert_eq!(config.posture.auto_calibration_frames, 75);
        assert_eq!(config.posture.shoulder_tilt_tolerance, 1.5);
        assert_eq!(config.posture.head_forward_tolerance, 1.5);
        assert_eq!(config.posture.slouch_tolerance, 0.8);
        assert_eq!(config.breathing.default_interval_secs, 20);
        assert_eq!(config.breathing.max_listen_secs, 15);
        assert_eq!(config.speech.silence_threshold, 300.0);
        assert!(config.app.show_landmarks);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_config.json");
        fs::write(
            &path,
            r#"{ "breathing": { "default_interval_secs": 45 }, "camera": { "index": 2 } }"#,
        )
        .unwrap();

        let config = WellnessConfig::load(&path).unwrap();
        assert_eq!(config.breathing.default_interval_secs, 45);
        assert_eq!(config.breathing.inhale_secs, 4);
        assert_eq!(config.camera.index, 2);
        assert_eq!(config.camera.frame_width, 640);
        assert_eq!(config.posture.auto_calibration_frames, 75);
        assert!(config.app.show_landmarks);
    }

    #[test]
    fn test_save_then_load_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = WellnessConfig::default();
        config.tts.mute = true;
        config.save(&path).unwrap();

        let loaded = WellnessConfig::load(&path).unwrap();
        assert!(loaded.tts.mute);
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let mut config = WellnessConfig::default();
        config.camera.index = 11;
        config.camera.frame_width = 100;
        config.breathing.default_interval_secs = 5;
        config.breathing.exhale_secs = 0;
        config.posture.slouch_tolerance = 0.0;

        let errors = config.validate();
        assert!(errors.contains(&"Invalid camera index".to_string()));
        assert!(errors.contains(&"Frame size too small".to_string()));
        assert!(errors.contains(&"Breathing interval too small".to_string()));
        assert!(errors.contains(&"Invalid breathing durations".to_string()));
        assert!(errors.contains(&"Invalid posture slouch_tolerance".to_string()));
    }

    #[test]
    fn test_clamp_interval() {
        let b = BreathingConfig::default();
        assert_eq!(b.clamp_interval(1), 10);
        assert_eq!(b.clamp_interval(30), 30);
        assert_eq!(b.clamp_interval(1000), 300);
    }

    #[test]
    fn test_inverted_interval_bounds_do_not_panic() {
        let mut config = WellnessConfig::default();
        config.breathing.min_interval_secs = 100;
        config.breathing.max_interval_secs = 50;
        config.breathing.default_interval_secs = 75;

        assert_eq!(config.breathing.clamp_interval(75), 50);
        assert_eq!(config.breathing.clamp_interval(1), 50);
        let errors = config.validate();
        assert!(errors.contains(&"Breathing min_interval_secs exceeds max_interval_secs".to_string()));
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_and_nan_durations() {
        let mut config = WellnessConfig::default();
        config.app.stats_update_interval_secs = -1.0;
        config.speech.ambient_noise_duration_secs = f64::NAN;
        config.speech.api_timeout_secs = f64::INFINITY;
        config.speech.recognizer_timeout_secs = -0.5;
        config.speech.phrase_time_limit_secs = -2.0;

        let errors = config.validate();
        for field in [
            "app.stats_update_interval_secs",
            "speech.ambient_noise_duration_secs",
            "speech.api_timeout_secs",
            "speech.recognizer_timeout_secs",
            "speech.phrase_time_limit_secs",
        ] {
            assert!(
                errors.iter().any(|e| e.contains(field)),
                "missing {} in {:?}",
                field,
                errors
            );
        }

        let err = config.ensure_valid().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WellnessError>(),
            Some(WellnessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(WellnessConfig::default().ensure_valid().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config =
            WellnessConfig::load_or_default(Some(Path::new("/nonexistent/wellness.json"))).unwrap();
        assert_eq!(config.camera.index, 0);
    }
}
