// Landmark types shared between the estimators and the detectors.
//
// All coordinates are in pixels of the (already flipped) camera frame.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(&self, other: &Point2) -> Point2 {
        Point2 {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSize {
    pub width: f32,
    pub height: f32,
}

impl FrameSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
        }
    }
}

/// The body points posture analysis needs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PoseLandmarks {
    pub nose: Point2,
    pub left_ear: Point2,
    pub right_ear: Point2,
    pub left_shoulder: Point2,
    pub right_shoulder: Point2,
    pub left_hip: Point2,
    pub right_hip: Point2,
}

impl PoseLandmarks {
    pub fn points(&self) -> [Point2; 7] {
        [
            self.left_shoulder,
            self.right_shoulder,
            self.left_ear,
            self.right_ear,
            self.left_hip,
            self.right_hip,
            self.nose,
        ]
    }
}

/// Dense face mesh (468 points in the canonical face-mesh topology).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceMesh {
    pub points: Vec<Point2>,
}

impl FaceMesh {
    pub const POINT_COUNT: usize = 468;

    pub fn get(&self, index: usize) -> Option<Point2> {
        self.points.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_and_midpoint() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(a.midpoint(&b), Point2::new(1.5, 2.0));
    }

    #[test]
    fn test_mesh_get_out_of_range() {
        let mesh = FaceMesh {
            points: vec![Point2::new(1.0, 1.0)],
        };
        assert!(mesh.get(0).is_some());
        assert!(mesh.get(159).is_none());
    }
}
