pub mod face_model;
pub mod landmarks;
pub mod pose_model;

use anyhow::Result;
use opencv::core::Mat;

pub use landmarks::{FaceMesh, FrameSize, Point2, PoseLandmarks};

/// Produces body landmarks for the most prominent person in a frame.
pub trait PoseEstimator {
    fn estimate(&mut self, frame: &Mat) -> Result<Option<PoseLandmarks>>;
}

/// Produces a dense face mesh. The pose result, when present, locates the face.
pub trait FaceMeshEstimator {
    fn estimate(&mut self, frame: &Mat, pose: Option<&PoseLandmarks>) -> Result<Option<FaceMesh>>;
}

/// Reads an output blob as a flat f32 slice.
pub(crate) fn blob_values(blob: &Mat) -> Result<Vec<f32>> {
    use opencv::prelude::*;
    if blob.is_continuous() {
        Ok(blob.data_typed::<f32>()?.to_vec())
    } else {
        let mut owned = Mat::default();
        blob.copy_to(&mut owned)?;
        Ok(owned.data_typed::<f32>()?.to_vec())
    }
}
