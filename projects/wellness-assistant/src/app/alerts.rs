use crate::config::LimitsConfig;

pub const POSTURE_REMINDER: &str = "Please sit up straight and relax your shoulders.";
pub const EYES_REMINDER: &str = "Your eyes have been closed for a while. Take a short break.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    BadPosture,
    EyesClosed,
}

impl Alert {
    pub fn message(&self) -> &'static str {
        match self {
            Alert::BadPosture => POSTURE_REMINDER,
            Alert::EyesClosed => EYES_REMINDER,
        }
    }
}

/// Counts consecutive bad frames and fires each alert once per streak.
#[derive(Debug)]
pub struct StreakAlerts {
    max_bad_posture: usize,
    max_eyes_closed: usize,
    bad_posture: usize,
    eyes_closed: usize,
}

impl StreakAlerts {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_bad_posture: limits.max_bad_posture_streak,
            max_eyes_closed: limits.max_eyes_closed_streak,
            bad_posture: 0,
            eyes_closed: 0,
        }
    }

    pub fn update(&mut self, posture_good: bool, eyes_open: bool) -> Vec<Alert> {
        let mut alerts = Vec::new();

        self.bad_posture = if posture_good { 0 } else { self.bad_posture + 1 };
        if self.max_bad_posture > 0 && self.bad_posture == self.max_bad_posture {
            alerts.push(Alert::BadPosture);
        }

        self.eyes_closed = if eyes_open { 0 } else { self.eyes_closed + 1 };
        if self.max_eyes_closed > 0 && self.eyes_closed == self.max_eyes_closed {
            alerts.push(Alert::EyesClosed);
        }

        alerts
    }

    pub fn reset(&mut self) {
        self.bad_posture = 0;
        self.eyes_closed = 0;
    }
}
