// Session artifacts on disk: one directory per session holding a JSON summary
// and a CSV timeline, plus the reusable calibration record.

use crate::breathing::ChantStats;
use crate::detectors::eye::EyeStats;
use crate::detectors::posture::{PostureReference, PostureStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SESSIONS_DIR: &str = "sessions";
const SUMMARY_FILE: &str = "summary.json";
const TIMELINE_FILE: &str = "timeline.csv";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    /// Seconds
    pub total_session_time: f64,
    pub posture: PostureStats,
    pub eyes: EyeStats,
    pub breathing: Option<ChantStats>,
    pub calibration_complete: bool,
}

/// One periodic sample of the running session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimelineRow {
    pub elapsed_secs: f64,
    pub posture_good: bool,
    pub eyes_open: bool,
    pub bad_posture_percent: f64,
    pub eyes_closed_percent: f64,
    pub breathing_sessions: usize,
}

/// Writer for the current session's directory
pub struct SessionLog {
    pub dir: PathBuf,
    timeline: csv::Writer<File>,
}

impl SessionLog {
    /// Creates `<data_dir>/sessions/<local timestamp>/` and opens its timeline.
    pub fn create(data_dir: &Path, started_at: DateTime<Utc>) -> Result<Self> {
        let stamp = started_at
            .with_timezone(&Local)
            .format("%Y%m%d-%H%M%S")
            .to_string();
        let root = data_dir.join(SESSIONS_DIR);

        let mut dir = root.join(&stamp);
        let mut suffix = 1;
        while dir.exists() {
            suffix += 1;
            dir = root.join(format!("{}-{}", stamp, suffix));
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create session directory {:?}", dir))?;

        let timeline = csv::Writer::from_path(dir.join(TIMELINE_FILE))?;
        tracing::info!("Recording session to {:?}", dir);
        Ok(Self { dir, timeline })
    }

    pub fn append(&mut self, row: &TimelineRow) -> Result<()> {
        self.timeline.serialize(row)?;
        Ok(())
    }

    /// Flushes the timeline and writes `summary.json`; returns its path.
    pub fn finish(mut self, summary: &SessionSummary) -> Result<PathBuf> {
        self.timeline.flush()?;
        let path = self.dir.join(SUMMARY_FILE);
        let content = serde_json::to_string_pretty(summary)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

/// All saved summaries under `data_dir`, oldest first.
pub fn list_sessions(data_dir: &Path) -> Result<Vec<(String, SessionSummary)>> {
    let root = data_dir.join(SESSIONS_DIR);
    let mut sessions = Vec::new();
    if !root.exists() {
        return Ok(sessions);
    }

    for entry in WalkDir::new(&root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == SUMMARY_FILE)
    {
        let content = fs::read_to_string(entry.path())?;
        let summary: SessionSummary = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Skipping unreadable summary {:?}: {}", entry.path(), e);
                continue;
            }
        };
        let name = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        sessions.push((name, summary));
    }

    sessions.sort_by_key(|(_, s)| s.started_at);
    Ok(sessions)
}

/// Stored calibration a later session may start from
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    pub posture: PostureReference,
    pub ear_threshold: f32,
    pub created_at: DateTime<Utc>,
}

impl CalibrationRecord {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `Ok(None)` when no record has been saved yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse calibration file {:?}", path))?;
        Ok(Some(record))
    }
}
