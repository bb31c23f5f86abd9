mod app;
mod audio;
mod breathing;
mod cli;
mod config;
mod detectors;
mod error;
mod session_log;
mod speech;
mod video;
mod vision;
mod web;

use anyhow::{Context, Result};
use app::WellnessApp;
use audio::CpalMicrophone;
use breathing::{BreathingWorker, ChantDetector};
use cli::{Args, CadenceArgs, Command, ConfigAction, RunArgs};
use config::WellnessConfig;
use error::WellnessError;
use session_log::{list_sessions, SessionSummary};
use speech::{GoogleTranscriber, SpeechEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vision::face_model::OnnxFaceMesh;
use vision::pose_model::OnnxPoseEstimator;
use web::server::spawn_dashboard;
use web::DashboardState;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse_args();
    let mut config = WellnessConfig::load_or_default(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.app.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(dir) = &args.data_dir {
        config.paths.data_directory = dir.clone();
    }
    if let Some(key) = &args.speech_api_key {
        config.speech.api_key = Some(key.clone());
    }

    match args.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(run) => {
            apply_run_overrides(&mut config, &run);
            config.ensure_valid()?;
            run_session(config, &run)
        }
        Command::Test(run) => {
            apply_run_overrides(&mut config, &run);
            config.ensure_valid()?;
            let mut app = build_app(&config)?;
            let report = app.test_components(None);
            println!(
                "camera: {}  microphone: {}  speech: {}",
                pass_fail(report.camera),
                pass_fail(report.microphone),
                pass_fail(report.speech)
            );
            Ok(())
        }
        Command::History => print_history(&config),
        Command::Cadence(cadence) => run_cadence(&cadence),
        Command::Config { action } => run_config_action(action),
    }
}

fn apply_run_overrides(config: &mut WellnessConfig, run: &RunArgs) {
    if let Some(index) = run.camera {
        config.camera.index = index;
    }
    if let Some(secs) = run.breathing_interval {
        config.breathing.default_interval_secs = config.breathing.clamp_interval(secs);
    }
    if run.no_breathing {
        config.breathing.enabled = false;
    }
    if run.mute {
        config.tts.mute = true;
    }
}

fn build_breathing(config: &WellnessConfig, speech: &Arc<SpeechEngine>) -> Option<BreathingWorker> {
    if !config.breathing.enabled {
        tracing::info!("Breathing guidance disabled");
        return None;
    }
    let transcriber = match GoogleTranscriber::new(&config.speech) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!("Speech recognizer unavailable, breathing guidance disabled: {:#}", e);
            return None;
        }
    };
    let detector = ChantDetector::new(
        Box::new(CpalMicrophone::new()),
        Box::new(transcriber),
        speech.clone(),
        &config.speech,
        &config.breathing,
    );
    Some(BreathingWorker::new(detector, &config.breathing))
}

/// Model loading failures are fatal.
fn build_app(config: &WellnessConfig) -> Result<WellnessApp> {
    let pose = OnnxPoseEstimator::new(
        &config.posture.model_path,
        config.posture.min_detection_confidence,
    )
    .context("Failed to load pose model")?;
    let face = OnnxFaceMesh::new(&config.eye.model_path, config.eye.min_detection_confidence)
        .context("Failed to load face mesh model")?;

    let speech = Arc::new(SpeechEngine::from_config(&config.tts));
    let breathing = build_breathing(config, &speech);

    Ok(WellnessApp::new(
        config.clone(),
        Box::new(pose),
        Box::new(face),
        speech,
        breathing,
    ))
}

fn run_session(config: WellnessConfig, run: &RunArgs) -> Result<()> {
    let mut app = build_app(&config)?;
    app.set_reuse_calibration(run.reuse_calibration);

    if !run.skip_component_test {
        let report = app.test_components(None);
        if !report.camera {
            return Err(WellnessError::CameraUnavailable {
                index: config.camera.index,
            }
            .into());
        }
        if !report.microphone || !report.speech {
            tracing::warn!("Some components failed their check; continuing with reduced features");
        }
    }

    app.initialize_camera(None)?;

    if run.dashboard {
        let state = DashboardState {
            session: app.state(),
            commands: app.command_sender(),
            stream_period: Duration::from_secs_f64(config.app.stats_update_interval_secs)
                .max(Duration::from_millis(100)),
        };
        let (addr, _handle) = spawn_dashboard(run.host, run.port, state)?;
        println!("Dashboard: http://{}", addr);
    }

    app.start_session()?;

    if let Some(summary) = app.session_summary() {
        print_summary(&summary);
    }
    Ok(())
}

fn pass_fail(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "FAILED"
    }
}

fn print_summary(summary: &SessionSummary) {
    println!("Session summary");
    println!("  Total time: {:.1} minutes", summary.total_session_time / 60.0);
    println!(
        "  Posture: {:.1}% good, {:.1}% bad",
        summary.posture.good_percent, summary.posture.bad_percent
    );
    println!(
        "  Eyes: {:.1}% open, {:.1}% closed",
        summary.eyes.open_percent, summary.eyes.closed_percent
    );
    if let Some(b) = &summary.breathing {
        println!(
            "  Breathing: {}/{} chants detected ({:.1}%), average {:.1}s",
            b.successful_detections, b.total_sessions, b.success_rate, b.average_chant_duration
        );
    }
}

fn print_history(config: &WellnessConfig) -> Result<()> {
    let sessions = list_sessions(&config.paths.data_directory)?;
    if sessions.is_empty() {
        println!("No saved sessions in {:?}", config.paths.data_directory);
        return Ok(());
    }
    println!(
        "{:<20} {:>8} {:>10} {:>10} {:>8}",
        "session", "minutes", "posture ok", "eyes open", "chants"
    );
    for (name, s) in sessions {
        let chants = s
            .breathing
            .map(|b| format!("{}/{}", b.successful_detections, b.total_sessions))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:>8.1} {:>9.1}% {:>9.1}% {:>8}",
            name,
            s.total_session_time / 60.0,
            s.posture.good_percent,
            s.eyes.open_percent,
            chants
        );
    }
    Ok(())
}

fn run_cadence(args: &CadenceArgs) -> Result<()> {
    let reports = breathing::cadence::run_trainer(args.calibration_secs, args.cycles)?;
    if !reports.is_empty() {
        let mean = reports.iter().map(|r| r.accuracy).sum::<f64>() / reports.len() as f64;
        println!("Average accuracy over {} cycles: {:.1}%", reports.len(), mean);
    }
    Ok(())
}

fn run_config_action(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { path } => {
            WellnessConfig::default().save(&path)?;
            println!("Wrote default configuration to {:?}", path);
            Ok(())
        }
        ConfigAction::Check { path } => {
            let config = WellnessConfig::load(&path)?;
            let problems = config.validate();
            if problems.is_empty() {
                println!("{:?} is valid", path);
                return Ok(());
            }
            for problem in &problems {
                println!("  - {}", problem);
            }
            Err(WellnessError::InvalidConfig(problems.join("; ")).into())
        }
    }
}
