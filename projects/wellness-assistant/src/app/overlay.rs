// Text overlays drawn onto the live camera frame.

use super::controls::HELP_LINE;
use super::state::StatsSnapshot;
use crate::detectors::eye::EyeReading;
use crate::detectors::posture::PostureReading;
use crate::vision::PoseLandmarks;
use anyhow::Result;
use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

// BGR
const GREEN: (f64, f64, f64) = (0.0, 255.0, 0.0);
const RED: (f64, f64, f64) = (0.0, 0.0, 255.0);
const YELLOW: (f64, f64, f64) = (0.0, 255.0, 255.0);
const CYAN: (f64, f64, f64) = (255.0, 255.0, 0.0);
const WHITE: (f64, f64, f64) = (255.0, 255.0, 255.0);
const GREY: (f64, f64, f64) = (200.0, 200.0, 200.0);

fn put(frame: &mut Mat, text: &str, y: i32, scale: f64, color: (f64, f64, f64), thickness: i32) -> Result<()> {
    imgproc::put_text(
        frame,
        text,
        Point::new(10, y),
        imgproc::FONT_HERSHEY_SIMPLEX,
        scale,
        Scalar::new(color.0, color.1, color.2, 0.0),
        thickness,
        imgproc::LINE_AA,
        false,
    )?;
    Ok(())
}

/// Marks each pose keypoint with a filled dot.
pub fn draw_landmarks(frame: &mut Mat, pose: &PoseLandmarks) -> Result<()> {
    for p in pose.points() {
        imgproc::circle(
            frame,
            Point::new(p.x.round() as i32, p.y.round() as i32),
            4,
            Scalar::new(CYAN.0, CYAN.1, CYAN.2, 0.0),
            imgproc::FILLED,
            imgproc::LINE_AA,
            0,
        )?;
    }
    Ok(())
}

/// Single status line used while setting up and calibrating.
pub fn draw_message(frame: &mut Mat, message: &str) -> Result<()> {
    put(frame, message, 30, 0.8, YELLOW, 2)
}

pub fn draw_posture_status(
    frame: &mut Mat,
    reading: &PostureReading,
    stats: &StatsSnapshot,
) -> Result<()> {
    let (text, color) = match &stats.posture {
        Some(p) if !p.calibrated => (
            format!("CALIBRATING... {}/{}", p.calibration_progress, p.calibration_target),
            YELLOW,
        ),
        _ if reading.good => ("GOOD POSTURE".to_string(), GREEN),
        _ => ("BAD POSTURE".to_string(), RED),
    };
    put(frame, &text, 30, 1.0, color, 2)?;

    if let Some(warning) = reading.warning {
        put(frame, warning, 60, 0.7, RED, 2)?;
    }
    Ok(())
}

pub fn draw_eye_status(frame: &mut Mat, reading: &EyeReading, threshold: Option<f32>) -> Result<()> {
    let (text, color) = if reading.eyes_open {
        ("EYES OPEN", GREEN)
    } else {
        ("EYES CLOSED", RED)
    };
    put(frame, text, 90, 0.9, color, 2)?;

    if let (Some(avg), Some(threshold)) = (reading.average_ear(), threshold) {
        put(
            frame,
            &format!("Avg EAR: {:.3} (Threshold: {:.3})", avg, threshold),
            120,
            0.6,
            CYAN,
            1,
        )?;
    }
    Ok(())
}

pub fn draw_statistics(frame: &mut Mat, stats: &StatsSnapshot, elapsed_secs: f64) -> Result<()> {
    if let Some(p) = &stats.posture {
        put(
            frame,
            &format!("Posture - Good: {:.1}% | Bad: {:.1}%", p.good_percent, p.bad_percent),
            150,
            0.6,
            WHITE,
            1,
        )?;
    }

    if let Some(e) = stats.eyes.as_ref().filter(|e| e.total_frames > 0) {
        put(
            frame,
            &format!("Eyes - Open: {:.1}% | Closed: {:.1}%", e.open_percent, e.closed_percent),
            180,
            0.6,
            WHITE,
            1,
        )?;
    }

    put(frame, &format!("Session time: {:.0}s", elapsed_secs), 210, 0.6, WHITE, 1)?;

    if let Some(b) = &stats.breathing {
        let next = match (stats.breathing_paused, stats.next_breathing_secs) {
            (true, _) => " (paused)".to_string(),
            (false, Some(secs)) => format!(" (next in {:.0}s)", secs),
            (false, None) => String::new(),
        };
        put(
            frame,
            &format!("Chants: {}/{}{}", b.successful_detections, b.total_sessions, next),
            240,
            0.6,
            WHITE,
            1,
        )?;
    }

    let height = frame.rows();
    put(frame, HELP_LINE, height - 10, 0.5, GREY, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::Point2;
    use opencv::core::{Vec3b, CV_8UC3};

    fn blank_frame() -> Mat {
        Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn pose_at(points: [(f32, f32); 7]) -> PoseLandmarks {
        let p = |i: usize| Point2::new(points[i].0, points[i].1);
        PoseLandmarks {
            left_shoulder: p(0),
            right_shoulder: p(1),
            left_ear: p(2),
            right_ear: p(3),
            left_hip: p(4),
            right_hip: p(5),
            nose: p(6),
        }
    }

    #[test]
    fn test_landmarks_are_marked_on_frame() {
        let mut frame = blank_frame();
        let pose = pose_at([
            (50.0, 60.0),
            (110.0, 60.0),
            (65.0, 30.0),
            (95.0, 30.0),
            (60.0, 110.0),
            (100.0, 110.0),
            (80.0, 35.0),
        ]);
        draw_landmarks(&mut frame, &pose).unwrap();

        for p in pose.points() {
            let px = frame.at_2d::<Vec3b>(p.y as i32, p.x as i32).unwrap();
            assert_eq!(px[0], 255, "no mark at {:?}", p);
        }
        let corner = frame.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!(corner[0], 0);
    }

    #[test]
    fn test_offscreen_landmarks_are_clipped() {
        let mut frame = blank_frame();
        let pose = pose_at([(-50.0, -50.0); 7]);
        assert!(draw_landmarks(&mut frame, &pose).is_ok());
    }
}
