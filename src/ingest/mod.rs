//! Frame ingestion sources.
//!
//! - HTTP MJPEG streams and JPEG snapshot endpoints (IP cameras, phone webcams)
//! - `stub://` synthetic scenes for demos and smoke tests
//! - scripted frame lists for tests
//!
//! Every source yields full-colour [`Frame`]s. `Ok(None)` means the source is
//! exhausted; the pipeline treats it the same as a disconnect.

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::frame::Frame;

mod mjpeg;
mod synthetic;

pub use mjpeg::MjpegHttpSource;
pub use synthetic::{ScriptedSource, SyntheticConfig, SyntheticSource};

/// A camera or camera-like producer of frames.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` once the source has no more frames.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build a source for `url`, dispatching on its scheme.
pub fn open_source(url: &str) -> Result<Box<dyn FrameSource>> {
    let parsed = Url::parse(url).with_context(|| format!("parse camera url {}", url))?;
    match parsed.scheme() {
        "stub" => Ok(Box::new(SyntheticSource::new(SyntheticConfig::from_url(
            &parsed,
        )?))),
        "http" | "https" => Ok(Box::new(MjpegHttpSource::new(url))),
        other => Err(anyhow!(
            "unsupported camera scheme '{}'; expected http(s) or stub",
            other
        )),
    }
}
