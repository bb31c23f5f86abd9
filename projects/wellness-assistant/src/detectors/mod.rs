// Threshold and calibration logic over landmark streams

pub mod eye;
pub mod posture;
