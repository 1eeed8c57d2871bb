/// Result of comparing two frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MotionResult {
    /// True iff at least one region exceeds the minimum area.
    pub motion_detected: bool,
    /// Every external contour found in the motion mask, in scan order.
    /// Includes regions below the area cutoff.
    pub regions: Vec<MotionRegion>,
}

impl MotionResult {
    /// Regions whose area exceeds `min_area`, in detector order.
    pub fn significant(&self, min_area: f64) -> impl Iterator<Item = &MotionRegion> {
        self.regions
            .iter()
            .filter(move |region| region.is_significant(min_area))
    }
}

/// Axis-aligned bounding box of one moving blob, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Area enclosed by the originating contour.
    pub area: f64,
}

impl MotionRegion {
    pub fn is_significant(&self, min_area: f64) -> bool {
        self.area > min_area
    }

    /// Top-left and bottom-right corners.
    pub fn diagonal(&self) -> ((u32, u32), (u32, u32)) {
        (
            (self.x, self.y),
            (self.x + self.width, self.y + self.height),
        )
    }
}
