//! HTTP camera source.
//!
//! Reads `multipart/x-mixed-replace` MJPEG streams when the server offers
//! one, and falls back to polling a single-JPEG snapshot URL otherwise.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_GRACE: Duration = Duration::from_secs(5);
const FRAME_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest silence tolerated on an open connection before `next_frame` fails.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MjpegHttpSource {
    url: String,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegHttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeouts(url, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeouts(url: impl Into<String>, connect: Duration, read: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect)
            .timeout_read(read)
            .build();
        Self {
            url: url.into(),
            agent,
            stream: None,
            connected_at: None,
            last_frame_at: None,
            frame_count: 0,
            last_error: None,
        }
    }

    fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http camera source not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.agent, &self.url).map(Some),
        }
    }
}

impl FrameSource for MjpegHttpSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to camera {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
            log::info!("camera {}: reading mjpeg stream", self.url);
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
            log::info!("camera {}: polling jpeg snapshots", self.url);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let jpeg = match self.next_jpeg() {
                Ok(Some(jpeg)) => jpeg,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.last_error = Some(format!("{:#}", e));
                    return Err(e);
                }
            };
            match Frame::decode_jpeg(&jpeg) {
                Ok(frame) => {
                    self.frame_count += 1;
                    self.last_frame_at = Some(Instant::now());
                    return Ok(Some(frame));
                }
                Err(e) => log::debug!("camera {}: skipping undecodable frame: {:#}", self.url, e),
            }
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        match self.last_frame_at {
            Some(last) => last.elapsed() <= FRAME_GRACE,
            None => connected_at.elapsed() <= CONNECT_GRACE,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

/// Splits a multipart body into JPEG images by SOI/EOI markers, ignoring the
/// part headers in between.
pub(crate) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` when the body ends.
    pub(crate) fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(jpeg));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
