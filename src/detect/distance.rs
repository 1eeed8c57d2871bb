//! Pinhole-camera distance estimation.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::result::MotionRegion;

/// Real-world width of the reference object, in meters.
pub const DEFAULT_KNOWN_WIDTH_M: f64 = 0.2;
/// Camera focal length, in pixels.
pub const DEFAULT_FOCAL_LENGTH_PX: f64 = 615.0;

/// Camera-specific constants, fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub known_width_m: f64,
    pub focal_length_px: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            known_width_m: DEFAULT_KNOWN_WIDTH_M,
            focal_length_px: DEFAULT_FOCAL_LENGTH_PX,
        }
    }
}

/// `known_width * focal_length / perceived_width`, or `None` for a zero-width region.
///
/// Negative or implausible widths are not rejected; the result simply falls
/// outside any alert range.
pub fn estimate_distance(
    known_width_m: f64,
    focal_length_px: f64,
    perceived_width_px: f64,
) -> Option<f64> {
    if perceived_width_px == 0.0 {
        return None;
    }
    Some(known_width_m * focal_length_px / perceived_width_px)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DistanceEstimator {
    calibration: Calibration,
}

impl DistanceEstimator {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn estimate(&self, perceived_width_px: f64) -> Option<f64> {
        estimate_distance(
            self.calibration.known_width_m,
            self.calibration.focal_length_px,
            perceived_width_px,
        )
    }

    /// Distance to the object enclosed by `region`, from its bounding-box width.
    pub fn for_region(&self, region: &MotionRegion) -> Option<f64> {
        self.estimate(region.width as f64)
    }

    /// Focal length implied by an object of `known_width_m` that appears
    /// `perceived_width_px` wide at `known_distance_m`.
    pub fn focal_length_from_reference(
        known_distance_m: f64,
        known_width_m: f64,
        perceived_width_px: f64,
    ) -> Result<f64> {
        if !(known_distance_m > 0.0) || !(known_width_m > 0.0) || !(perceived_width_px > 0.0) {
            return Err(anyhow!(
                "calibration inputs must be positive (distance={}, width={}, perceived={})",
                known_distance_m,
                known_width_m,
                perceived_width_px
            ));
        }
        Ok(perceived_width_px * known_distance_m / known_width_m)
    }
}
