use crate::breathing::{ChantStats, SessionOutcome};
use crate::detectors::eye::EyeStats;
use crate::detectors::posture::PostureStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Latest statistics published by the main loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub posture: Option<PostureStats>,
    pub eyes: Option<EyeStats>,
    pub breathing: Option<ChantStats>,
    pub posture_good: bool,
    pub eyes_open: bool,
    pub average_ear: Option<f32>,
    pub ear_threshold: Option<f32>,
    pub warning: Option<String>,
    pub breathing_enabled: bool,
    pub breathing_paused: bool,
    pub next_breathing_secs: Option<f64>,
    pub last_breathing_session: Option<SessionOutcome>,
}

/// Session state shared between the main loop and the dashboard handlers
#[derive(Debug)]
pub struct SessionState {
    pub started_at: DateTime<Utc>,
    pub is_active: AtomicBool,
    pub is_calibrating: AtomicBool,
    pub snapshot: RwLock<StatsSnapshot>,
    pub start_time: Instant,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            is_active: AtomicBool::new(false),
            is_calibrating: AtomicBool::new(false),
            snapshot: RwLock::new(StatsSnapshot::default()),
            start_time: Instant::now(),
        }
    }

    pub fn publish(&self, snapshot: StatsSnapshot) {
        if let Ok(mut current) = self.snapshot.write() {
            *current = snapshot;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "started_at": self.started_at,
            "elapsed_secs": self.start_time.elapsed().as_secs_f64(),
            "is_active": self.is_active.load(Ordering::Relaxed),
            "is_calibrating": self.is_calibrating.load(Ordering::Relaxed),
            "stats": self.snapshot(),
        })
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_json_reflects_published_snapshot() {
        let state = SessionState::new();
        state.is_active.store(true, Ordering::Relaxed);
        state.publish(StatsSnapshot {
            posture_good: true,
            warning: Some("Move closer to camera".to_string()),
            next_breathing_secs: Some(12.5),
            ..StatsSnapshot::default()
        });

        let json = state.to_json();
        assert_eq!(json["is_active"], true);
        assert_eq!(json["is_calibrating"], false);
        assert_eq!(json["stats"]["posture_good"], true);
        assert_eq!(json["stats"]["warning"], "Move closer to camera");
        assert_eq!(json["stats"]["next_breathing_secs"], 12.5);
        assert!(json["stats"]["posture"].is_null());
    }
}
