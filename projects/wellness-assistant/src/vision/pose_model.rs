use super::{blob_values, Point2, PoseEstimator, PoseLandmarks};
use crate::error::WellnessError;
use anyhow::{Context, Result};
use opencv::core::{Mat, Scalar, Size, CV_32F};
use opencv::dnn;
use opencv::prelude::*;

/// COCO keypoint indices used by YOLO pose models
mod coco {
    pub const NOSE: usize = 0;
    pub const LEFT_EAR: usize = 3;
    pub const RIGHT_EAR: usize = 4;
    pub const LEFT_SHOULDER: usize = 5;
    pub const RIGHT_SHOULDER: usize = 6;
    pub const LEFT_HIP: usize = 11;
    pub const RIGHT_HIP: usize = 12;
    pub const COUNT: usize = 17;
}

/// Rows per candidate: box (4) + score (1) + 17 keypoints × (x, y, visibility)
const ROWS: usize = 5 + coco::COUNT * 3;

/// Runs a YOLO pose ONNX export through OpenCV's DNN module.
///
/// The model takes a square RGB input and emits `[1, 56, N]` candidates in
/// input-pixel coordinates.
pub struct OnnxPoseEstimator {
    net: dnn::Net,
    input_size: i32,
    min_confidence: f32,
}

impl OnnxPoseEstimator {
    pub fn new(model_path: &str, min_confidence: f32) -> Result<Self> {
        let net = dnn::read_net_from_onnx(model_path)
            .map_err(|e| WellnessError::Model(format!("{}: {}", model_path, e)))
            .with_context(|| format!("Failed to load pose model '{}'", model_path))?;
        tracing::info!("Loaded pose model {}", model_path);
        Ok(Self {
            net,
            input_size: 640,
            min_confidence,
        })
    }
}

impl PoseEstimator for OnnxPoseEstimator {
    fn estimate(&mut self, frame: &Mat) -> Result<Option<PoseLandmarks>> {
        let size = frame.size()?;
        let blob = dnn::blob_from_image(
            frame,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let output = self.net.forward_single("")?;
        let values = blob_values(&output)?;

        let scale = Scale {
            x: size.width as f32 / self.input_size as f32,
            y: size.height as f32 / self.input_size as f32,
        };
        Ok(decode_pose(&values, self.min_confidence, scale))
    }
}

/// Model-input to frame-pixel factors per axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f32,
    pub y: f32,
}

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };
}

/// Picks the highest-scoring candidate from a row-major `[56, N]` output and
/// maps its keypoints into frame pixels using the per-axis `scale`.
///
/// Returns `None` when no candidate clears `min_confidence` or either
/// shoulder is not visible.
pub fn decode_pose(values: &[f32], min_confidence: f32, scale: Scale) -> Option<PoseLandmarks> {
    if values.len() < ROWS {
        return None;
    }
    let anchors = values.len() / ROWS;
    let at = |row: usize, anchor: usize| values[row * anchors + anchor];

    let (best, score) = (0..anchors)
        .map(|i| (i, at(4, i)))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if score < min_confidence {
        return None;
    }

    let keypoint = |k: usize| -> (Point2, f32) {
        let base = 5 + k * 3;
        (
            Point2::new(at(base, best) * scale.x, at(base + 1, best) * scale.y),
            at(base + 2, best),
        )
    };

    let (left_shoulder, ls_vis) = keypoint(coco::LEFT_SHOULDER);
    let (right_shoulder, rs_vis) = keypoint(coco::RIGHT_SHOULDER);
    if ls_vis < min_confidence || rs_vis < min_confidence {
        return None;
    }

    Some(PoseLandmarks {
        nose: keypoint(coco::NOSE).0,
        left_ear: keypoint(coco::LEFT_EAR).0,
        right_ear: keypoint(coco::RIGHT_EAR).0,
        left_shoulder,
        right_shoulder,
        left_hip: keypoint(coco::LEFT_HIP).0,
        right_hip: keypoint(coco::RIGHT_HIP).0,
    })
}
