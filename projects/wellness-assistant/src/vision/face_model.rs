use super::{blob_values, FaceMesh, FaceMeshEstimator, Point2, PoseLandmarks};
use crate::error::WellnessError;
use anyhow::{Context, Result};
use opencv::core::{Mat, Rect, Scalar, Size, Vector, CV_32F};
use opencv::dnn;
use opencv::prelude::*;

/// Square face region in frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRoi {
    pub x: i32,
    pub y: i32,
    pub side: i32,
}

/// Locates a square face crop from the pose's nose and ears, clamped to the frame.
///
/// The side is 1.8× the ear-to-ear distance; crops under 32 px are rejected.
pub fn face_roi(pose: &PoseLandmarks, frame_width: i32, frame_height: i32) -> Option<FaceRoi> {
    let ear_span = pose.left_ear.distance(&pose.right_ear);
    let side = (ear_span * 1.8).round() as i32;
    let side = side.min(frame_width).min(frame_height);
    if side < 32 {
        return None;
    }

    let x = (pose.nose.x.round() as i32 - side / 2).clamp(0, frame_width - side);
    let y = (pose.nose.y.round() as i32 - side / 2).clamp(0, frame_height - side);
    Some(FaceRoi { x, y, side })
}

/// Converts raw mesh output (x, y, z triples in model-input pixels) to frame pixels.
pub fn mesh_from_output(values: &[f32], roi: FaceRoi, input_size: i32) -> Option<FaceMesh> {
    if values.len() < FaceMesh::POINT_COUNT * 3 {
        return None;
    }
    let scale = roi.side as f32 / input_size as f32;
    let points = values
        .chunks_exact(3)
        .take(FaceMesh::POINT_COUNT)
        .map(|c| Point2::new(roi.x as f32 + c[0] * scale, roi.y as f32 + c[1] * scale))
        .collect();
    Some(FaceMesh { points })
}

/// Face-landmark ONNX model (468-point mesh) driven through OpenCV DNN.
///
/// Expects a 192×192 RGB crop in [0, 1] and emits 1404 mesh values plus a
/// single face-presence value (logit or probability).
pub struct OnnxFaceMesh {
    net: dnn::Net,
    output_names: Vector<String>,
    input_size: i32,
    min_confidence: f32,
}

impl OnnxFaceMesh {
    pub fn new(model_path: &str, min_confidence: f32) -> Result<Self> {
        let net = dnn::read_net_from_onnx(model_path)
            .map_err(|e| WellnessError::Model(format!("{}: {}", model_path, e)))
            .with_context(|| format!("Failed to load face mesh model '{}'", model_path))?;
        let output_names = net.get_unconnected_out_layers_names()?;
        tracing::info!(
            "Loaded face mesh model {} ({} outputs)",
            model_path,
            output_names.len()
        );
        Ok(Self {
            net,
            output_names,
            input_size: 192,
            min_confidence,
        })
    }
}

impl FaceMeshEstimator for OnnxFaceMesh {
    fn estimate(&mut self, frame: &Mat, pose: Option<&PoseLandmarks>) -> Result<Option<FaceMesh>> {
        let Some(pose) = pose else {
            return Ok(None);
        };
        let size = frame.size()?;
        let Some(roi) = face_roi(pose, size.width, size.height) else {
            return Ok(None);
        };

        let region = Mat::roi(frame, Rect::new(roi.x, roi.y, roi.side, roi.side))?;
        let mut crop = Mat::default();
        region.copy_to(&mut crop)?;
        let blob = dnn::blob_from_image(
            &crop,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;

        let mut outputs = Vector::<Mat>::new();
        self.net.forward(&mut outputs, &self.output_names)?;

        let mut mesh_values = None;
        let mut presence = None;
        for out in outputs.iter() {
            let values = blob_values(&out)?;
            match values.len() {
                1 => presence = Some(values[0]),
                n if n >= FaceMesh::POINT_COUNT * 3 => mesh_values = Some(values),
                _ => {}
            }
        }

        if let Some(p) = presence {
            let probability = if (0.0..=1.0).contains(&p) {
                p
            } else {
                1.0 / (1.0 + (-p).exp())
            };
            if probability < self.min_confidence {
                return Ok(None);
            }
        }

        Ok(mesh_values.and_then(|v| mesh_from_output(&v, roi, self.input_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_with_head(nose: Point2, ear_span: f32) -> PoseLandmarks {
        let p = Point2::new(0.0, 0.0);
        PoseLandmarks {
            nose,
            left_ear: Point2::new(nose.x - ear_span / 2.0, nose.y),
            right_ear: Point2::new(nose.x + ear_span / 2.0, nose.y),
            left_shoulder: p,
            right_shoulder: p,
            left_hip: p,
            right_hip: p,
        }
    }

    #[test]
    fn test_face_roi_centered_on_nose() {
        let roi = face_roi(&pose_with_head(Point2::new(320.0, 200.0), 100.0), 640, 480).unwrap();
        assert_eq!(roi, FaceRoi { x: 230, y: 110, side: 180 });
    }

    #[test]
    fn test_face_roi_clamped_to_frame() {
        let roi = face_roi(&pose_with_head(Point2::new(10.0, 10.0), 100.0), 640, 480).unwrap();
        assert_eq!(roi.x, 0);
        assert_eq!(roi.y, 0);
    }

    #[test]
    fn test_face_roi_rejects_tiny_face() {
        assert!(face_roi(&pose_with_head(Point2::new(320.0, 200.0), 10.0), 640, 480).is_none());
    }

    #[test]
    fn test_mesh_from_output_maps_into_frame() {
        let mut values = vec![0.0; FaceMesh::POINT_COUNT * 3];
        values[0] = 96.0;
        values[1] = 48.0;
        let roi = FaceRoi { x: 100, y: 50, side: 384 };
        let mesh = mesh_from_output(&values, roi, 192).unwrap();
        assert_eq!(mesh.points.len(), FaceMesh::POINT_COUNT);
        assert_eq!(mesh.points[0], Point2::new(292.0, 146.0));
        assert_eq!(mesh.points[1], Point2::new(100.0, 50.0));
    }

    #[test]
    fn test_mesh_from_short_output() {
        let roi = FaceRoi { x: 0, y: 0, side: 192 };
        assert!(mesh_from_output(&[0.0; 30], roi, 192).is_none());
    }
}
