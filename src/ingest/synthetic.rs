//! Synthetic and scripted sources.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use url::Url;

use super::{FrameSource, SourceStats};
use crate::frame::{Frame, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

const BACKGROUND: [u8; 3] = [48, 52, 56];
const INTRUDER: [u8; 3] = [230, 230, 230];
/// Roughly 1.2 m away with the default calibration.
const INTRUDER_WIDTH: u32 = 90;
const INTRUDER_HEIGHT: u32 = 160;

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

/// Parameters of a `stub://name?frames=N&period=P&fps=F&width=W&height=H`
/// scene. Every `period` frames a bright box stands in the middle of the scene
/// for the second half of the period.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Total frames before the source is exhausted. `None` runs forever.
    pub frames: Option<u64>,
    /// Scene period in frames. Zero keeps the scene static.
    pub period: u64,
    /// Capture rate. Zero yields frames as fast as they are requested.
    pub fps: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            label: "stub://synthetic".to_string(),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            frames: None,
            period: 90,
            fps: 30,
        }
    }
}

impl SyntheticConfig {
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut config = Self {
            label: url.as_str().to_string(),
            ..Self::default()
        };
        for (key, value) in url.query_pairs() {
            let parse = |v: &str| -> Result<u64> {
                v.parse()
                    .map_err(|_| anyhow!("stub parameter '{}' must be an integer, got '{}'", key, v))
            };
            match &*key {
                "frames" => config.frames = Some(parse(&value)?),
                "period" => config.period = parse(&value)?,
                "fps" => config.fps = u32::try_from(parse(&value)?)?,
                "width" => config.width = u32::try_from(parse(&value)?)?,
                "height" => config.height = u32::try_from(parse(&value)?)?,
                other => log::warn!("ignoring unknown stub parameter '{}'", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        Ok(config)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn intruder_visible(&self, index: u64) -> bool {
        let period = self.config.period;
        period > 1 && index % period >= period / 2
    }

    fn render(&self, index: u64) -> Frame {
        let background = Frame::solid(self.config.width, self.config.height, BACKGROUND);
        if !self.intruder_visible(index) {
            return background;
        }
        let x = self.config.width.saturating_sub(INTRUDER_WIDTH) / 2;
        let y = self.config.height.saturating_sub(INTRUDER_HEIGHT) / 2;
        background.with_filled_rect(x, y, INTRUDER_WIDTH, INTRUDER_HEIGHT, INTRUDER)
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.config.fps as f64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("connected to {} (synthetic)", self.config.label);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .config
            .frames
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.pace();
        let frame = self.render(self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.label.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Scripted source
// ----------------------------------------------------------------------------

/// Replays a fixed list of frames, then reports exhaustion (or an error when
/// built with [`ScriptedSource::then_fail`]).
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    failure: Option<String>,
    frame_count: u64,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            failure: None,
            frame_count: 0,
        }
    }

    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.frame_count += 1;
                Ok(Some(frame))
            }
            None => match &self.failure {
                Some(message) => Err(anyhow!("{}", message)),
                None => Ok(None),
            },
        }
    }

    fn is_healthy(&self) -> bool {
        !self.frames.is_empty() || self.failure.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: "scripted".to_string(),
        }
    }
}
