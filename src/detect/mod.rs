mod distance;
mod motion;
mod result;

pub use distance::{
    estimate_distance, Calibration, DistanceEstimator, DEFAULT_FOCAL_LENGTH_PX,
    DEFAULT_KNOWN_WIDTH_M,
};
pub use motion::{
    MotionDetector, MotionParams, DEFAULT_BLUR_KERNEL, DEFAULT_DIFF_THRESHOLD,
    DEFAULT_DILATE_ITERATIONS, DEFAULT_MIN_AREA,
};
pub use result::{MotionRegion, MotionResult};
