//! Multipart JPEG (MJPEG) output encoding.
//!
//! Each processed frame becomes one part of a `multipart/x-mixed-replace`
//! stream delimited by [`MULTIPART_BOUNDARY`].

use anyhow::Result;

use crate::alert::DEFAULT_JPEG_QUALITY;
use crate::frame::Frame;

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Response content type announcing the multipart stream.
pub fn stream_content_type() -> String {
    format!("multipart/x-mixed-replace;boundary={}", MULTIPART_BOUNDARY)
}

/// Frame one encoded image as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\n\r\n",
        MULTIPART_BOUNDARY, PART_CONTENT_TYPE
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 4);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n\r\n");
    part
}

/// Turns a processed frame into the JPEG bytes of one part. Failures are
/// per-frame; callers skip the frame and keep going.
pub trait FrameEncoder: Send {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug)]
pub struct StreamEncoder {
    quality: u8,
}

impl Default for StreamEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl StreamEncoder {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl FrameEncoder for StreamEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        frame.encode_jpeg(self.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_is_delimited_and_typed() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected_head = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(expected_head));
        assert!(part.ends_with(b"\xFF\xD9\r\n\r\n"));
        assert_eq!(part.len(), expected_head.len() + 4 + 4);
    }

    #[test]
    fn content_type_names_boundary() {
        assert_eq!(
            stream_content_type(),
            "multipart/x-mixed-replace;boundary=frame"
        );
    }

    #[test]
    fn encode_fails_for_empty_frame() {
        let encoder = StreamEncoder::default();
        assert!(encoder.encode(&Frame::solid(0, 0, [0, 0, 0])).is_err());
        assert!(encoder.encode(&Frame::solid(8, 8, [0, 0, 0])).is_ok());
    }
}
