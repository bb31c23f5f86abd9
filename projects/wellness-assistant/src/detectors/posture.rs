use crate::config::PostureConfig;
use crate::vision::{FrameSize, PoseLandmarks};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Per-frame posture measurements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PostureMetrics {
    /// Angle of the shoulder line from horizontal, degrees
    pub shoulder_tilt: f32,
    /// Mean ear-to-shoulder horizontal offset as a fraction of frame width
    pub head_forward: f32,
    /// Vertical shoulder-to-hip distance as a fraction of frame height
    pub shoulder_hip_height: f32,
    /// Angle of the nose from the shoulder midpoint, degrees
    pub head_tilt: f32,
}

impl PostureMetrics {
    pub fn from_landmarks(lm: &PoseLandmarks, frame: FrameSize) -> Self {
        let shoulder_tilt = (lm.left_shoulder.y - lm.right_shoulder.y)
            .abs()
            .atan2((lm.left_shoulder.x - lm.right_shoulder.x).abs() + 1e-6)
            .to_degrees();

        let head_forward = ((lm.left_ear.x - lm.left_shoulder.x)
            + (lm.right_ear.x - lm.right_shoulder.x))
            / 2.0
            / frame.width;

        let mid_shoulder = lm.left_shoulder.midpoint(&lm.right_shoulder);
        let mid_hip = lm.left_hip.midpoint(&lm.right_hip);
        let shoulder_hip_height = (mid_hip.y - mid_shoulder.y) / frame.height;

        let head_tilt = (lm.nose.x - mid_shoulder.x)
            .atan2(lm.nose.y - mid_shoulder.y + 1e-6)
            .to_degrees();

        Self {
            shoulder_tilt,
            head_forward,
            shoulder_hip_height,
            head_tilt,
        }
    }
}

/// Calibrated baseline the live metrics are compared against
pub type PostureReference = PostureMetrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostureStats {
    pub elapsed_secs: f64,
    pub total_frames: usize,
    pub good_frames: usize,
    pub bad_frames: usize,
    pub good_percent: f64,
    pub bad_percent: f64,
    pub calibrated: bool,
    pub calibration_progress: usize,
    pub calibration_target: usize,
}

/// Result of one processed frame
#[derive(Debug, Clone, PartialEq)]
pub struct PostureReading {
    pub good: bool,
    pub warning: Option<&'static str>,
    pub metrics: Option<PostureMetrics>,
}

pub struct PostureDetector {
    config: PostureConfig,
    calibration_data: Vec<PostureMetrics>,
    reference: Option<PostureReference>,
    total_frames: usize,
    good_frames: usize,
    bad_frames: usize,
    start_time: Instant,
}

impl PostureDetector {
    pub fn new(config: PostureConfig) -> Self {
        Self {
            calibration_data: Vec::with_capacity(config.auto_calibration_frames),
            config,
            reference: None,
            total_frames: 0,
            good_frames: 0,
            bad_frames: 0,
            start_time: Instant::now(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference(&self) -> Option<PostureReference> {
        self.reference
    }

    /// Installs a previously saved baseline, skipping auto-calibration.
    pub fn set_reference(&mut self, reference: PostureReference) {
        self.reference = Some(reference);
        self.calibration_data.clear();
    }

    pub fn reset_stats(&mut self) {
        self.total_frames = 0;
        self.good_frames = 0;
        self.bad_frames = 0;
        self.start_time = Instant::now();
    }

    pub fn reset_calibration(&mut self) {
        self.reference = None;
        self.calibration_data.clear();
    }

    /// Returns a camera-distance hint based on the shoulder span.
    pub fn distance_warning(&self, lm: &PoseLandmarks, frame: FrameSize) -> Option<&'static str> {
        let shoulder_width = (lm.left_shoulder.x - lm.right_shoulder.x).abs();
        if shoulder_width < frame.width * self.config.too_close {
            Some("Move closer to camera")
        } else if shoulder_width > frame.width * self.config.too_far {
            Some("Move back from camera")
        } else {
            None
        }
    }

    /// Processes one frame's landmarks. Frames without a detected body count as good.
    pub fn process(&mut self, landmarks: Option<&PoseLandmarks>, frame: FrameSize) -> PostureReading {
        let mut good = true;
        let mut warning = None;
        let mut metrics = None;

        if let Some(lm) = landmarks {
            warning = self.distance_warning(lm, frame);
            let m = PostureMetrics::from_landmarks(lm, frame);
            metrics = Some(m);

            if self.reference.is_none() {
                self.calibration_data.push(m);
                if self.calibration_data.len() >= self.config.auto_calibration_frames {
                    let reference = average(&self.calibration_data);
                    tracing::info!(
                        "Posture auto-calibrated: tilt={:.2} forward={:.3} height={:.3} head_tilt={:.2}",
                        reference.shoulder_tilt,
                        reference.head_forward,
                        reference.shoulder_hip_height,
                        reference.head_tilt
                    );
                    self.reference = Some(reference);
                    self.calibration_data.clear();
                }
            }

            if let Some(reference) = &self.reference {
                good = self.evaluate(&m, reference);
            }
        }

        self.total_frames += 1;
        if good {
            self.good_frames += 1;
        } else {
            self.bad_frames += 1;
        }

        PostureReading {
            good,
            warning,
            metrics,
        }
    }

    fn evaluate(&self, m: &PostureMetrics, r: &PostureReference) -> bool {
        let c = &self.config;
        !(m.shoulder_tilt > r.shoulder_tilt * c.shoulder_tilt_tolerance
            || m.head_forward > r.head_forward * c.head_forward_tolerance
            || m.shoulder_hip_height < r.shoulder_hip_height * c.slouch_tolerance
            || angle_delta(m.head_tilt, r.head_tilt).abs() > c.head_tilt_tolerance)
    }

    pub fn stats(&self) -> PostureStats {
        let (good_percent, bad_percent) = if self.total_frames > 0 {
            let good = self.good_frames as f64 / self.total_frames as f64 * 100.0;
            (good, 100.0 - good)
        } else {
            (0.0, 0.0)
        };

        PostureStats {
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
            total_frames: self.total_frames,
            good_frames: self.good_frames,
            bad_frames: self.bad_frames,
            good_percent,
            bad_percent,
            calibrated: self.is_calibrated(),
            calibration_progress: if self.is_calibrated() {
                self.config.auto_calibration_frames
            } else {
                self.calibration_data.len()
            },
            calibration_target: self.config.auto_calibration_frames,
        }
    }
}

/// Signed difference of two angles in degrees, wrapped into [-180, 180).
/// Upright head angles sit near ±180°.
fn angle_delta(a: f32, b: f32) -> f32 {
    (a - b + 180.0).rem_euclid(360.0) - 180.0
}

/// Element-wise mean (circular for the head angle). head_forward is floored
/// at 0.01 so the forward-lean rule keeps a positive bound.
fn average(samples: &[PostureMetrics]) -> PostureReference {
    let n = samples.len().max(1) as f32;
    let mut sum = PostureMetrics::default();
    let (mut sin_sum, mut cos_sum) = (0.0f32, 0.0f32);
    for m in samples {
        sum.shoulder_tilt += m.shoulder_tilt;
        sum.head_forward += m.head_forward;
        sum.shoulder_hip_height += m.shoulder_hip_height;
        sin_sum += m.head_tilt.to_radians().sin();
        cos_sum += m.head_tilt.to_radians().cos();
    }
    PostureMetrics {
        shoulder_tilt: sum.shoulder_tilt / n,
        head_forward: (sum.head_forward / n).max(0.01),
        shoulder_hip_height: sum.shoulder_hip_height / n,
        head_tilt: sin_sum.atan2(cos_sum).to_degrees(),
    }
}
