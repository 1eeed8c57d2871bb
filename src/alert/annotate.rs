//! Alert overlays: a diagonal across the region and a distance label.
//!
//! Text uses a small built-in 5x7 glyph set so no font file is needed at
//! runtime. Only the characters the label can contain are defined; anything
//! else renders as a blank cell.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::detect::MotionRegion;
use crate::frame::Frame;

pub const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
const GLYPH_ADVANCE: i64 = GLYPH_WIDTH + 1;
/// Gap between the label's bottom edge and the region's top edge.
const LABEL_OFFSET: i64 = 10;

/// Label drawn next to an alerting region.
pub fn distance_label(distance_m: f64) -> String {
    format!("Distance: {:.2}m", distance_m)
}

/// Copy of `frame` with the alert overlay for `region` drawn on it.
pub fn annotate_alert(frame: &Frame, region: &MotionRegion, distance_m: f64) -> Frame {
    let mut image = frame.image().clone();
    let ((x0, y0), (x1, y1)) = region.diagonal();

    // Two adjacent one-pixel segments give a 2px stroke.
    for offset in [0.0f32, 1.0] {
        draw_line_segment_mut(
            &mut image,
            (x0 as f32 + offset, y0 as f32),
            (x1 as f32 + offset, y1 as f32),
            ANNOTATION_COLOR,
        );
    }

    let top = (region.y as i64 - LABEL_OFFSET - GLYPH_HEIGHT).max(0);
    draw_text(
        &mut image,
        region.x as i64,
        top,
        &distance_label(distance_m),
        ANNOTATION_COLOR,
    );

    Frame::from_image(image)
}

fn draw_text(image: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>) {
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i64 * GLYPH_ADVANCE;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = origin_x + col;
                let py = y + row as i64;
                if px >= 0 && py >= 0 && (px as u32) < image.width() && (py as u32) < image.height()
                {
                    image.put_pixel(px as u32, py as u32, color);
                }
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'a' => [0x00, 0x00, 0x0E, 0x01, 0x0F, 0x11, 0x0F],
        'c' => [0x00, 0x00, 0x0E, 0x10, 0x10, 0x11, 0x0E],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        'i' => [0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x0E],
        'm' => [0x00, 0x00, 0x1A, 0x15, 0x15, 0x11, 0x11],
        'n' => [0x00, 0x00, 0x16, 0x19, 0x11, 0x11, 0x11],
        's' => [0x00, 0x00, 0x0E, 0x10, 0x0E, 0x01, 0x1E],
        't' => [0x08, 0x08, 0x1C, 0x08, 0x08, 0x09, 0x06],
        _ => [0x00; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> MotionRegion {
        MotionRegion {
            x: 100,
            y: 100,
            width: 80,
            height: 60,
            area: 4000.0,
        }
    }

    #[test]
    fn label_uses_two_decimals() {
        assert_eq!(distance_label(1.5), "Distance: 1.50m");
        assert_eq!(distance_label(2.999), "Distance: 3.00m");
    }

    #[test]
    fn annotation_draws_diagonal_and_leaves_source_untouched() {
        let frame = Frame::solid(320, 240, [0, 0, 0]);
        let annotated = annotate_alert(&frame, &region(), 1.5);

        assert_eq!(*annotated.image().get_pixel(100, 100), ANNOTATION_COLOR);
        assert_eq!(*annotated.image().get_pixel(140, 130), ANNOTATION_COLOR);
        assert_eq!(frame.image().get_pixel(100, 100).0, [0, 0, 0]);
    }

    #[test]
    fn label_is_drawn_above_region() {
        let frame = Frame::solid(320, 240, [0, 0, 0]);
        let annotated = annotate_alert(&frame, &region(), 1.5);
        let label_rows = 83..90;
        let painted = label_rows
            .flat_map(|y| (100..200).map(move |x| (x, y)))
            .filter(|&(x, y)| *annotated.image().get_pixel(x, y) == ANNOTATION_COLOR)
            .count();
        assert!(painted > 20);
    }

    #[test]
    fn annotation_near_top_edge_is_clipped() {
        let frame = Frame::solid(64, 48, [0, 0, 0]);
        let near_top = MotionRegion {
            x: 50,
            y: 2,
            width: 30,
            height: 30,
            area: 900.0,
        };
        let annotated = annotate_alert(&frame, &near_top, 0.8);
        assert_eq!((annotated.width(), annotated.height()), (64, 48));
    }
}
