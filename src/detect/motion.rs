//! Frame-differencing motion detector.
//!
//! Both frames are reduced to intensity, blurred to suppress sensor noise,
//! differenced, thresholded and dilated. External contours of the resulting
//! mask become candidate regions.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::point::Point;

use crate::detect::result::{MotionRegion, MotionResult};
use crate::frame::Frame;

pub const DEFAULT_BLUR_KERNEL: u32 = 21;
pub const DEFAULT_DIFF_THRESHOLD: u8 = 25;
pub const DEFAULT_DILATE_ITERATIONS: u8 = 2;
pub const DEFAULT_MIN_AREA: f64 = 500.0;

/// Tuning knobs for the detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionParams {
    /// Nominal side of the square Gaussian kernel. Must be odd.
    ///
    /// Only the blur sigma is derived from it (see [`MotionParams::blur_sigma`]).
    /// `imageproc` sizes the kernel it actually applies from that sigma, so the
    /// effective support is not exactly `blur_kernel` pixels.
    pub blur_kernel: u32,
    /// Intensity differences at or below this value count as no change.
    pub diff_threshold: u8,
    /// Number of 3x3 dilation passes applied to the binary mask.
    pub dilate_iterations: u8,
    /// Minimum contour area (px^2) for a region to count as motion.
    pub min_area: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            blur_kernel: DEFAULT_BLUR_KERNEL,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            dilate_iterations: DEFAULT_DILATE_ITERATIONS,
            min_area: DEFAULT_MIN_AREA,
        }
    }
}

impl MotionParams {
    /// Sigma for a kernel of `blur_kernel` pixels when no sigma is given,
    /// matching the usual `0.3 * ((k - 1) * 0.5 - 1) + 0.8` rule.
    pub fn blur_sigma(&self) -> f32 {
        let k = self.blur_kernel.max(1) as f32;
        (0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8).max(0.1)
    }
}

/// Stateless two-frame motion detector.
#[derive(Clone, Debug, Default)]
pub struct MotionDetector {
    params: MotionParams,
}

impl MotionDetector {
    pub fn new(params: MotionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    /// Compare `prev` against `curr`. Never fails: frames that cannot be
    /// compared yield an empty result.
    pub fn detect(&self, prev: &Frame, curr: &Frame) -> MotionResult {
        if prev.width() != curr.width() || prev.height() != curr.height() {
            log::debug!(
                "motion: frame size mismatch {}x{} vs {}x{}; skipping comparison",
                prev.width(),
                prev.height(),
                curr.width(),
                curr.height()
            );
            return MotionResult::default();
        }

        let mask = self.motion_mask(prev, curr);
        let regions: Vec<MotionRegion> = find_contours::<i32>(&mask)
            .iter()
            .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
            .filter_map(|contour| region_from_points(&contour.points))
            .collect();

        let motion_detected = regions
            .iter()
            .any(|region| region.is_significant(self.params.min_area));

        MotionResult {
            motion_detected,
            regions,
        }
    }

    /// Binary change mask (0 or 255) after blur, difference, threshold and dilation.
    pub fn motion_mask(&self, prev: &Frame, curr: &Frame) -> GrayImage {
        let sigma = self.params.blur_sigma();
        let before = gaussian_blur_f32(&prev.intensity(), sigma);
        let after = gaussian_blur_f32(&curr.intensity(), sigma);

        let mut mask = GrayImage::new(before.width(), before.height());
        for ((out, a), b) in mask.pixels_mut().zip(before.pixels()).zip(after.pixels()) {
            let delta = a.0[0].abs_diff(b.0[0]);
            *out = if delta > self.params.diff_threshold {
                Luma([255])
            } else {
                Luma([0])
            };
        }

        if self.params.dilate_iterations == 0 {
            mask
        } else {
            // n passes of a 3x3 square equal one pass with chessboard radius n.
            dilate(&mask, Norm::LInf, self.params.dilate_iterations)
        }
    }
}

fn region_from_points(points: &[Point<i32>]) -> Option<MotionRegion> {
    let first = points.first()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    Some(MotionRegion {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
        area: polygon_area(points),
    })
}

/// Shoelace area of the closed polygon through `points`.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 3] = [255, 255, 255];

    fn background() -> Frame {
        Frame::solid(320, 240, [0, 0, 0])
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let detector = MotionDetector::default();
        let frame = background().with_filled_rect(40, 40, 60, 60, [90, 90, 90]);
        let result = detector.detect(&frame, &frame.clone());
        assert!(!result.motion_detected);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn filled_rectangle_is_detected_and_bounded() {
        let detector = MotionDetector::default();
        let prev = background();
        let curr = prev.with_filled_rect(100, 80, 40, 40, WHITE);

        let result = detector.detect(&prev, &curr);
        assert!(result.motion_detected);
        assert_eq!(result.regions.len(), 1);

        let region = result.regions[0];
        // Blur and dilation grow the box by a few pixels on each side.
        assert!(region.x <= 100 && region.x >= 85, "x = {}", region.x);
        assert!(region.y <= 80 && region.y >= 65, "y = {}", region.y);
        assert!(region.x + region.width >= 140 && region.x + region.width <= 155);
        assert!(region.y + region.height >= 120 && region.y + region.height <= 135);
        assert!(region.area > 1600.0);
    }

    #[test]
    fn small_blob_is_returned_but_not_significant() {
        let detector = MotionDetector::default();
        let prev = background();
        let curr = prev.with_filled_rect(150, 100, 6, 6, WHITE);

        let result = detector.detect(&prev, &curr);
        assert!(!result.motion_detected);
        assert!(!result.regions.is_empty());
        assert!(result.regions.iter().all(|r| r.area <= DEFAULT_MIN_AREA));
        assert_eq!(result.significant(DEFAULT_MIN_AREA).count(), 0);
    }

    #[test]
    fn separate_objects_yield_separate_regions() {
        let detector = MotionDetector::default();
        let prev = background();
        let curr = prev
            .with_filled_rect(20, 20, 40, 40, WHITE)
            .with_filled_rect(220, 150, 50, 50, WHITE);

        let result = detector.detect(&prev, &curr);
        assert!(result.motion_detected);
        assert_eq!(result.significant(DEFAULT_MIN_AREA).count(), 2);
    }

    #[test]
    fn detection_is_repeatable() {
        let detector = MotionDetector::default();
        let prev = background();
        let curr = prev.with_filled_rect(60, 60, 50, 30, WHITE);

        let first = detector.detect(&prev, &curr);
        let second = detector.detect(&prev, &curr);
        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_sizes_yield_empty_result() {
        let detector = MotionDetector::default();
        let result = detector.detect(&background(), &Frame::solid(64, 64, WHITE));
        assert_eq!(result, MotionResult::default());
    }

    #[test]
    fn default_sigma_matches_kernel_rule() {
        let sigma = MotionParams::default().blur_sigma();
        assert!((sigma - 3.5).abs() < 1e-6);

        let smaller = MotionParams {
            blur_kernel: 15,
            ..MotionParams::default()
        };
        assert!((smaller.blur_sigma() - 2.6).abs() < 1e-5);
    }

    #[test]
    fn shoelace_area_of_square() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
    }
}
