pub mod camera;

use anyhow::Result;
use opencv::core::Mat;

pub use camera::OpencvCamera;

/// A live frame source. Frames come back already mirrored when configured.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Mat>;
    fn frame_size(&self) -> (i32, i32);
}
