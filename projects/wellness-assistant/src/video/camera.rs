use super::FrameSource;
use crate::config::CameraConfig;
use crate::error::WellnessError;
use anyhow::Result;
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH,
    },
};

pub struct OpencvCamera {
    capture: VideoCapture,
    flip_horizontal: bool,
    width: i32,
    height: i32,
}

impl OpencvCamera {
    /// Opens the camera, requests the configured size and checks that a
    /// frame can actually be read.
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let index = config.index;
        let mut capture = VideoCapture::new(index, CAP_ANY)
            .map_err(|_| WellnessError::CameraUnavailable { index })?;
        if !capture.is_opened()? {
            return Err(WellnessError::CameraUnavailable { index }.into());
        }

        capture.set(CAP_PROP_FRAME_WIDTH, config.frame_width as f64)?;
        capture.set(CAP_PROP_FRAME_HEIGHT, config.frame_height as f64)?;
        if config.fps > 0.0 {
            property_applied("fps", config.fps, capture.set(CAP_PROP_FPS, config.fps));
        }

        let mut first = Mat::default();
        if !capture.read(&mut first)? || first.empty() {
            return Err(WellnessError::CameraRead.into());
        }
        let size = first.size()?;

        tracing::info!(
            "Camera {} opened at {}x{} (requested {}x{})",
            index,
            size.width,
            size.height,
            config.frame_width,
            config.frame_height
        );

        Ok(Self {
            capture,
            flip_horizontal: config.flip_horizontal,
            width: size.width,
            height: size.height,
        })
    }
}

/// Logs a capture property the backend refused; returns whether it took.
fn property_applied(name: &str, value: f64, result: opencv::Result<bool>) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            tracing::warn!("Camera ignored requested {} = {}", name, value);
            false
        }
        Err(e) => {
            tracing::warn!("Failed to set camera {} = {}: {}", name, value, e);
            false
        }
    }
}

impl FrameSource for OpencvCamera {
    fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            return Err(WellnessError::CameraRead.into());
        }

        if self.flip_horizontal {
            let mut mirrored = Mat::default();
            core::flip(&frame, &mut mirrored, 1)?;
            return Ok(mirrored);
        }
        Ok(frame)
    }

    fn frame_size(&self) -> (i32, i32) {
        (self.width, self.height)
    }
}

impl Drop for OpencvCamera {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release camera: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_result_is_reported() {
        assert!(property_applied("fps", 30.0, Ok(true)));
        assert!(!property_applied("fps", 30.0, Ok(false)));
        let err = opencv::Error::new(core::StsError, "backend does not support CAP_PROP_FPS");
        assert!(!property_applied("fps", 30.0, Err(err)));
    }
}
