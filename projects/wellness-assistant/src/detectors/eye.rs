use crate::vision::FaceMesh;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Face-mesh index pairs per eye: corner-to-corner, then two lid-to-lid spans.
pub const LEFT_EYE: [[usize; 2]; 3] = [[33, 133], [159, 145], [158, 153]];
pub const RIGHT_EYE: [[usize; 2]; 3] = [[362, 263], [386, 374], [387, 373]];

/// Eye Aspect Ratio: `(|p3-p4| + |p5-p6|) / (2·|p1-p2|)`.
///
/// Returns `None` when a landmark is missing or the eye width collapses.
pub fn eye_aspect_ratio(eye: &[[usize; 2]; 3], mesh: &FaceMesh) -> Option<f32> {
    let span = |pair: [usize; 2]| -> Option<f32> {
        Some(mesh.get(pair[0])?.distance(&mesh.get(pair[1])?))
    };

    let horizontal = span(eye[0])?;
    let vertical_1 = span(eye[1])?;
    let vertical_2 = span(eye[2])?;

    if horizontal > 1e-6 {
        Some((vertical_1 + vertical_2) / (2.0 * horizontal))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeReading {
    pub eyes_open: bool,
    pub left_ear: Option<f32>,
    pub right_ear: Option<f32>,
}

impl EyeReading {
    pub fn average_ear(&self) -> Option<f32> {
        Some((self.left_ear? + self.right_ear?) / 2.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EyeCalibrationInfo {
    pub threshold: Option<f32>,
    pub lowest_ear: Option<f32>,
    pub highest_ear: Option<f32>,
    pub calibrated: bool,
    pub range: Option<f32>,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyeStats {
    pub elapsed_secs: f64,
    pub total_frames: usize,
    pub open_frames: usize,
    pub closed_frames: usize,
    pub open_percent: f64,
    pub closed_percent: f64,
    pub calibrated: bool,
}

/// Open/closed classification by EAR against a per-user threshold.
pub struct EyeDetector {
    default_threshold: f32,
    min_calibration_samples: usize,
    threshold: Option<f32>,
    lowest_ear: f32,
    highest_ear: f32,
    calibration_samples: usize,
    total_frames: usize,
    open_frames: usize,
    closed_frames: usize,
    start_time: Instant,
}

impl EyeDetector {
    pub fn new(default_threshold: f32, min_calibration_samples: usize) -> Self {
        Self {
            default_threshold,
            min_calibration_samples,
            threshold: None,
            lowest_ear: f32::INFINITY,
            highest_ear: 0.0,
            calibration_samples: 0,
            total_frames: 0,
            open_frames: 0,
            closed_frames: 0,
            start_time: Instant::now(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.threshold.is_some()
    }

    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    pub fn reset_calibration(&mut self) {
        self.threshold = None;
        self.lowest_ear = f32::INFINITY;
        self.highest_ear = 0.0;
        self.calibration_samples = 0;
    }

    pub fn reset_stats(&mut self) {
        self.total_frames = 0;
        self.open_frames = 0;
        self.closed_frames = 0;
        self.start_time = Instant::now();
    }

    /// Fixes the threshold: an explicit value wins, then the midpoint of the
    /// observed EAR range, then the configured default.
    pub fn set_threshold(&mut self, threshold: Option<f32>) -> f32 {
        let value = match threshold {
            Some(t) => t,
            None if self.highest_ear > 0.0 && self.lowest_ear.is_finite() => {
                if self.calibration_samples < self.min_calibration_samples {
                    tracing::warn!(
                        "Eye calibration saw only {} samples (wanted {})",
                        self.calibration_samples,
                        self.min_calibration_samples
                    );
                }
                (self.highest_ear + self.lowest_ear) / 2.0
            }
            None => {
                tracing::warn!(
                    "No eye samples during calibration, using default EAR threshold {:.3}",
                    self.default_threshold
                );
                self.default_threshold
            }
        };
        self.threshold = Some(value);
        value
    }

    /// Classifies one frame. While `calibrating`, the EAR range is recorded
    /// and statistics are left untouched; frames without a face never count.
    pub fn process(&mut self, mesh: Option<&FaceMesh>, calibrating: bool) -> EyeReading {
        let mut reading = EyeReading {
            eyes_open: true,
            left_ear: None,
            right_ear: None,
        };

        let Some(mesh) = mesh else {
            return reading;
        };

        reading.left_ear = eye_aspect_ratio(&LEFT_EYE, mesh);
        reading.right_ear = eye_aspect_ratio(&RIGHT_EYE, mesh);

        if let Some(avg) = reading.average_ear() {
            if calibrating {
                self.lowest_ear = self.lowest_ear.min(avg);
                self.highest_ear = self.highest_ear.max(avg);
                self.calibration_samples += 1;
            } else if let Some(threshold) = self.threshold {
                reading.eyes_open = avg > threshold;
            }
        }

        if !calibrating {
            self.total_frames += 1;
            if reading.eyes_open {
                self.open_frames += 1;
            } else {
                self.closed_frames += 1;
            }
        }

        reading
    }

    pub fn calibration_info(&self) -> EyeCalibrationInfo {
        let lowest = self.lowest_ear.is_finite().then_some(self.lowest_ear);
        let highest = (self.highest_ear > 0.0).then_some(self.highest_ear);
        EyeCalibrationInfo {
            threshold: self.threshold,
            lowest_ear: lowest,
            highest_ear: highest,
            calibrated: self.is_calibrated(),
            range: match (lowest, highest) {
                (Some(lo), Some(hi)) => Some(hi - lo),
                _ => None,
            },
            samples: self.calibration_samples,
        }
    }

    pub fn stats(&self) -> EyeStats {
        let (open_percent, closed_percent) = if self.total_frames > 0 {
            (
                self.open_frames as f64 / self.total_frames as f64 * 100.0,
                self.closed_frames as f64 / self.total_frames as f64 * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        EyeStats {
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
            total_frames: self.total_frames,
            open_frames: self.open_frames,
            closed_frames: self.closed_frames,
            open_percent,
            closed_percent,
            calibrated: self.is_calibrated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::Point2;

    /// Builds a mesh where both eyes are 30 px wide and `lid_gap` px tall.
    fn mesh_with_lid_gap(lid_gap: f32) -> FaceMesh {
        let mut points = vec![Point2::default(); FaceMesh::POINT_COUNT];
        for (eye, x0) in [(LEFT_EYE, 100.0), (RIGHT_EYE, 200.0)] {
            points[eye[0][0]] = Point2::new(x0, 100.0);
            points[eye[0][1]] = Point2::new(x0 + 30.0, 100.0);
            for pair in &eye[1..] {
                points[pair[0]] = Point2::new(x0 + 15.0, 100.0 - lid_gap / 2.0);
                points[pair[1]] = Point2::new(x0 + 15.0, 100.0 + lid_gap / 2.0);
            }
        }
        FaceMesh { points }
    }

    #[test]
    fn test_ear_formula() {
        let mesh = mesh_with_lid_gap(9.0);
        let ear = eye_aspect_ratio(&LEFT_EYE, &mesh).unwrap();
        assert!((ear - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_ear_degenerate_width() {
        let mesh = FaceMesh {
            points: vec![Point2::default(); FaceMesh::POINT_COUNT],
        };
        assert!(eye_aspect_ratio(&LEFT_EYE, &mesh).is_none());
    }

    #[test]
    fn test_ear_missing_points() {
        let mesh = FaceMesh {
            points: vec![Point2::new(1.0, 2.0); 100],
        };
        assert!(eye_aspect_ratio(&LEFT_EYE, &mesh).is_none());
    }

    #[test]
    fn test_threshold_midpoint_after_calibration() {
        let mut detector = EyeDetector::new(0.22, 2);
        detector.process(Some(&mesh_with_lid_gap(9.0)), true);
        detector.process(Some(&mesh_with_lid_gap(3.0)), true);

        let threshold = detector.set_threshold(None);
        assert!((threshold - 0.2).abs() < 1e-6);

        let info = detector.calibration_info();
        assert!((info.range.unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(info.samples, 2);
    }

    #[test]
    fn test_threshold_default_and_explicit() {
        let mut detector = EyeDetector::new(0.22, 30);
        assert_eq!(detector.set_threshold(None), 0.22);
        assert_eq!(detector.set_threshold(Some(0.18)), 0.18);
        assert!(detector.is_calibrated());
    }

    #[test]
    fn test_calibration_does_not_touch_stats() {
        let mut detector = EyeDetector::new(0.22, 1);
        detector.process(Some(&mesh_with_lid_gap(9.0)), true);
        assert_eq!(detector.stats().total_frames, 0);
    }

    #[test]
    fn test_no_face_is_open_and_uncounted() {
        let mut detector = EyeDetector::new(0.22, 1);
        detector.set_threshold(None);
        let reading = detector.process(None, false);
        assert!(reading.eyes_open);
        assert!(reading.left_ear.is_none());
        assert_eq!(detector.stats().total_frames, 0);
    }

    #[test]
    fn test_open_and_closed_classification() {
        let mut detector = EyeDetector::new(0.22, 1);
        detector.set_threshold(Some(0.2));

        assert!(detector.process(Some(&mesh_with_lid_gap(9.0)), false).eyes_open);
        assert!(!detector.process(Some(&mesh_with_lid_gap(3.0)), false).eyes_open);
        assert!(!detector.process(Some(&mesh_with_lid_gap(1.5)), false).eyes_open);

        let stats = detector.stats();
        assert_eq!(stats.total_frames, 3);
        assert_eq!(stats.open_frames, 1);
        assert_eq!(stats.closed_frames, 2);
        assert!((stats.closed_percent - 200.0 / 3.0).abs() < 1e-9);

        detector.reset_stats();
        assert_eq!(detector.stats().total_frames, 0);
    }

    #[test]
    fn test_uncalibrated_reports_open() {
        let mut detector = EyeDetector::new(0.22, 1);
        assert!(detector.process(Some(&mesh_with_lid_gap(0.5)), false).eyes_open);
    }

    #[test]
    fn test_reset_calibration() {
        let mut detector = EyeDetector::new(0.22, 1);
        detector.process(Some(&mesh_with_lid_gap(9.0)), true);
        detector.set_threshold(None);
        detector.reset_calibration();
        let info = detector.calibration_info();
        assert!(!info.calibrated);
        assert!(info.lowest_ear.is_none());
        assert!(info.highest_ear.is_none());
    }
}
