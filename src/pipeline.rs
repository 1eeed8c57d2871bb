//! Per-feed processing loop.
//!
//! A `Pipeline` owns what one viewer's feed needs: detector, distance
//! estimator, reference frame and alert sink. Only the throttle is shared, with
//! every other pipeline watching the same camera, so one event on that camera
//! yields one alert however many viewers are connected.
//!
//! ```text
//! WarmingUp -> AwaitingFirstFrame -> SteadyState -> Terminated
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::alert::{annotate_alert, AlertSink, NotificationStatus, SharedThrottle};
use crate::config::PipelineConfig;
use crate::detect::{DistanceEstimator, MotionDetector, MotionResult};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::stream::{multipart_part, FrameEncoder, StreamEncoder};

const WARMUP_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    WarmingUp,
    AwaitingFirstFrame,
    SteadyState,
    Terminated,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_emitted: u64,
    pub encode_failures: u64,
    pub alerts_raised: u64,
    pub alerts_failed: u64,
    pub notifications_failed: u64,
}

/// What one call to [`Pipeline::process_frame`] did with its frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Dropped to hold the target frame rate.
    Paced,
    /// Stored as the first reference frame; nothing to emit.
    ReferenceStored,
    /// One multipart part ready for the viewer.
    Emitted(Vec<u8>),
    /// Processed, but the JPEG encode failed; nothing to emit.
    EncodeFailed,
}

pub struct Pipeline {
    config: PipelineConfig,
    detector: MotionDetector,
    estimator: DistanceEstimator,
    throttle: SharedThrottle,
    encoder: Box<dyn FrameEncoder>,
    sink: AlertSink,
    state: PipelineState,
    reference: Option<Frame>,
    last_processed: Option<Instant>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sink: AlertSink) -> Self {
        Self {
            detector: MotionDetector::new(config.motion),
            estimator: DistanceEstimator::new(config.calibration),
            throttle: SharedThrottle::new(config.throttle),
            encoder: Box::new(StreamEncoder::new(config.jpeg_quality)),
            sink: sink.with_jpeg_quality(config.jpeg_quality),
            config,
            state: PipelineState::WarmingUp,
            reference: None,
            last_processed: None,
            stats: PipelineStats::default(),
        }
    }

    /// Join the throttle of the camera this pipeline watches. Its policy
    /// replaces the one from the pipeline config.
    pub fn with_throttle(mut self, throttle: SharedThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_encoder(mut self, encoder: impl FrameEncoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn sink(&self) -> &AlertSink {
        &self.sink
    }

    pub fn throttle(&self) -> &SharedThrottle {
        &self.throttle
    }

    /// Drive the feed until the source ends, the viewer goes away or `stop`
    /// is set. Only a failed `connect` is reported as an error.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        out: &mut dyn Write,
        stop: &AtomicBool,
    ) -> Result<PipelineStats> {
        self.state = PipelineState::WarmingUp;
        if let Err(e) = source.connect().context("connect frame source") {
            self.state = PipelineState::Terminated;
            return Err(e);
        }

        if !self.warm_up(stop) {
            log::info!("pipeline stopped during warm-up");
            self.state = PipelineState::Terminated;
            return Ok(self.stats.clone());
        }
        self.state = PipelineState::AwaitingFirstFrame;

        while !stop.load(Ordering::SeqCst) {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("frame source {} exhausted", source.stats().source);
                    break;
                }
                Err(e) => {
                    log::warn!("frame source {} failed: {:#}", source.stats().source, e);
                    break;
                }
            };

            if let StepOutcome::Emitted(part) = self.process_frame(frame, Instant::now()) {
                if let Err(e) = out.write_all(&part).and_then(|()| out.flush()) {
                    log::info!("viewer disconnected: {}", e);
                    break;
                }
            }
        }

        self.state = PipelineState::Terminated;
        log::info!(
            "pipeline terminated: read={} processed={} emitted={} alerts={} alert_failures={}",
            self.stats.frames_read,
            self.stats.frames_processed,
            self.stats.frames_emitted,
            self.stats.alerts_raised,
            self.stats.alerts_failed
        );
        Ok(self.stats.clone())
    }

    /// One iteration of the steady-state loop for an already captured frame.
    pub fn process_frame(&mut self, frame: Frame, now: Instant) -> StepOutcome {
        self.stats.frames_read += 1;
        let frame = frame.resized(self.config.width, self.config.height);

        if let Some(last) = self.last_processed {
            if now.saturating_duration_since(last) < self.config.frame_interval() {
                return StepOutcome::Paced;
            }
        }
        self.last_processed = Some(now);
        self.stats.frames_processed += 1;

        let Some(reference) = self.reference.take() else {
            self.reference = Some(frame);
            self.state = PipelineState::SteadyState;
            return StepOutcome::ReferenceStored;
        };
        self.state = PipelineState::SteadyState;

        let result = self.detector.detect(&reference, &frame);
        let annotated = self.evaluate(&result, &frame, now);
        let encoded = self.encoder.encode(annotated.as_ref().unwrap_or(&frame));

        // The baseline is always the untouched frame.
        self.reference = Some(frame);

        match encoded {
            Ok(jpeg) => {
                self.stats.frames_emitted += 1;
                StepOutcome::Emitted(multipart_part(&jpeg))
            }
            Err(e) => {
                self.stats.encode_failures += 1;
                log::debug!("skipping frame: {:#}", e);
                StepOutcome::EncodeFailed
            }
        }
    }

    /// Raise at most one alert for this frame; returns the annotated copy when
    /// an alert was attempted.
    fn evaluate(&mut self, result: &MotionResult, frame: &Frame, now: Instant) -> Option<Frame> {
        if !result.motion_detected || !self.throttle.cooldown_elapsed(now) {
            return None;
        }

        for region in result.significant(self.detector.params().min_area) {
            let Some(distance) = self.estimator.for_region(region) else {
                continue;
            };
            log::debug!(
                "motion region {}x{} at ({}, {}) ~{:.2} m",
                region.width,
                region.height,
                region.x,
                region.y,
                distance
            );
            // Claiming starts the cool-down, even if the alert then fails.
            if !self.throttle.try_claim(now, distance) {
                continue;
            }

            let annotated = annotate_alert(frame, region, distance);
            match self.sink.raise(Utc::now(), region, distance, &annotated) {
                Ok(raised) => {
                    self.stats.alerts_raised += 1;
                    if let NotificationStatus::Failed(_) = raised.notification {
                        self.stats.notifications_failed += 1;
                    }
                }
                Err(e) => {
                    self.stats.alerts_failed += 1;
                    log::error!("failed to record alert: {:#}", e);
                }
            }
            return Some(annotated);
        }
        None
    }

    fn warm_up(&self, stop: &AtomicBool) -> bool {
        let deadline = Instant::now() + self.config.warmup;
        loop {
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(WARMUP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertMessage, LogNotifier};
    use crate::ingest::ScriptedSource;
    use crate::storage::{ArtifactStore, InMemoryAlertStore};
    use anyhow::anyhow;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct DiscardArtifacts;

    impl ArtifactStore for DiscardArtifacts {
        fn write(&self, _relative_path: &str, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }

        fn resolve(&self, relative_path: &str) -> PathBuf {
            PathBuf::from(relative_path)
        }
    }

    struct BrokenArtifacts;

    impl ArtifactStore for BrokenArtifacts {
        fn write(&self, _relative_path: &str, _bytes: &[u8]) -> Result<()> {
            Err(anyhow!("read-only filesystem"))
        }

        fn resolve(&self, relative_path: &str) -> PathBuf {
            PathBuf::from(relative_path)
        }
    }

    /// Fails the first `failures` encodes, then behaves like the real one.
    struct FlakyEncoder {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FrameEncoder for FlakyEncoder {
        fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(anyhow!("encoder out of memory"));
            }
            StreamEncoder::default().encode(frame)
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            warmup: Duration::ZERO,
            target_fps: 0,
            ..PipelineConfig::default()
        }
    }

    fn pipeline_with(artifacts: Box<dyn ArtifactStore>, config: PipelineConfig) -> Pipeline {
        let sink = AlertSink::new(
            Box::new(InMemoryAlertStore::default()),
            artifacts,
            Arc::new(LogNotifier),
            AlertMessage::default(),
        );
        Pipeline::new(config, sink)
    }

    fn pipeline() -> Pipeline {
        pipeline_with(Box::new(DiscardArtifacts), config())
    }

    fn background() -> Frame {
        Frame::solid(640, 480, [0, 0, 0])
    }

    /// Close object: ~83 px measured width, ~1.5 m.
    fn close_object() -> Frame {
        background().with_filled_rect(280, 180, 70, 120, [255, 255, 255])
    }

    /// Far object: ~23 px measured width, ~5.3 m.
    fn far_object() -> Frame {
        background().with_filled_rect(300, 200, 10, 60, [255, 255, 255])
    }

    #[test]
    fn first_frame_becomes_reference() {
        let mut p = pipeline();
        assert_eq!(p.state(), PipelineState::WarmingUp);
        let t0 = Instant::now();
        assert_eq!(p.process_frame(background(), t0), StepOutcome::ReferenceStored);
        assert_eq!(p.state(), PipelineState::SteadyState);
        assert!(matches!(
            p.process_frame(background(), t0),
            StepOutcome::Emitted(_)
        ));
        assert_eq!(p.stats().frames_emitted, 1);
        assert_eq!(p.stats().alerts_raised, 0);
    }

    #[test]
    fn frames_are_resized_before_analysis() {
        let mut p = pipeline();
        let t0 = Instant::now();
        p.process_frame(Frame::solid(320, 240, [0, 0, 0]), t0);
        let outcome = p.process_frame(Frame::solid(1280, 720, [0, 0, 0]), t0);
        let StepOutcome::Emitted(part) = outcome else {
            panic!("expected an emitted part, got {:?}", outcome);
        };
        let header_len = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".len();
        let jpeg = &part[header_len..part.len() - 4];
        let decoded = Frame::decode_jpeg(jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn close_motion_raises_one_alert_then_cools_down() {
        let mut p = pipeline();
        let t0 = Instant::now();
        p.process_frame(background(), t0);
        p.process_frame(close_object(), t0);
        assert_eq!(p.stats().alerts_raised, 1);
        assert_eq!(p.throttle().last_alert(), Some(t0));

        // Object leaves 5 s later: motion, but still cooling down.
        p.process_frame(background(), t0 + Duration::from_secs(5));
        assert_eq!(p.stats().alerts_raised, 1);

        p.process_frame(close_object(), t0 + Duration::from_secs(11));
        assert_eq!(p.stats().alerts_raised, 2);
        assert_eq!(p.sink().store().count().unwrap(), 2);
    }

    #[test]
    fn far_motion_does_not_alert() {
        let mut p = pipeline();
        let t0 = Instant::now();
        p.process_frame(background(), t0);
        assert!(matches!(
            p.process_frame(far_object(), t0),
            StepOutcome::Emitted(_)
        ));
        assert_eq!(p.stats().alerts_raised, 0);
        assert!(p.throttle().last_alert().is_none());
    }

    #[test]
    fn persistence_failure_still_starts_cooldown() {
        let mut p = pipeline_with(Box::new(BrokenArtifacts), config());
        let t0 = Instant::now();
        p.process_frame(background(), t0);
        p.process_frame(close_object(), t0);
        assert_eq!(p.stats().alerts_failed, 1);
        assert_eq!(p.stats().alerts_raised, 0);
        assert_eq!(p.throttle().last_alert(), Some(t0));
        assert_eq!(p.sink().store().count().unwrap(), 0);
    }

    #[test]
    fn two_close_objects_raise_one_alert() {
        let mut p = pipeline();
        let t0 = Instant::now();
        // Upper object ~53 px wide (~2.3 m), lower one ~83 px (~1.5 m). Both
        // qualify; the detector reports the upper one first.
        let frame = background()
            .with_filled_rect(80, 40, 40, 120, [255, 255, 255])
            .with_filled_rect(420, 300, 70, 120, [255, 255, 255]);
        p.process_frame(background(), t0);
        p.process_frame(frame, t0);

        assert_eq!(p.stats().alerts_raised, 1);
        let records = p.sink().store().recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert!(
            (records[0].distance - 2.3).abs() < 0.3,
            "recorded {} m, expected the first region",
            records[0].distance
        );
    }

    #[test]
    fn out_of_range_region_does_not_block_later_one() {
        let mut p = pipeline();
        let t0 = Instant::now();
        let frame = background()
            .with_filled_rect(100, 20, 10, 100, [255, 255, 255])
            .with_filled_rect(400, 300, 70, 120, [255, 255, 255]);
        p.process_frame(background(), t0);
        p.process_frame(frame, t0);

        assert_eq!(p.stats().alerts_raised, 1);
        let records = p.sink().store().recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert!(
            (records[0].distance - 1.5).abs() < 0.25,
            "recorded {} m, expected the close region",
            records[0].distance
        );
    }

    #[test]
    fn viewers_of_one_camera_share_the_cooldown() {
        let throttle = SharedThrottle::new(config().throttle);
        let mut first = pipeline().with_throttle(throttle.clone());
        let mut second = pipeline().with_throttle(throttle.clone());
        let t0 = Instant::now();

        for p in [&mut first, &mut second] {
            p.process_frame(background(), t0);
            p.process_frame(close_object(), t0);
        }

        assert_eq!(first.stats().alerts_raised, 1);
        assert_eq!(second.stats().alerts_raised, 0);
        assert_eq!(second.sink().store().count().unwrap(), 0);
        assert_eq!(throttle.last_alert(), Some(t0));
    }

    #[test]
    fn encode_failure_skips_emission_and_keeps_going() {
        let mut short_cooldown = config();
        short_cooldown.throttle.cooldown = Duration::from_millis(1);
        let mut p = pipeline_with(Box::new(DiscardArtifacts), short_cooldown)
            .with_encoder(FlakyEncoder {
                failures: 1,
                calls: AtomicUsize::new(0),
            });
        let t0 = Instant::now();

        p.process_frame(background(), t0);
        assert_eq!(
            p.process_frame(close_object(), t0),
            StepOutcome::EncodeFailed
        );
        assert_eq!(p.stats().encode_failures, 1);
        assert_eq!(p.stats().frames_emitted, 0);
        assert_eq!(p.stats().alerts_raised, 1);

        // Same scene again after the cool-down: no motion against the new
        // reference, so no second alert, and the frame goes out.
        assert!(matches!(
            p.process_frame(close_object(), t0 + Duration::from_secs(1)),
            StepOutcome::Emitted(_)
        ));
        assert_eq!(p.stats().frames_emitted, 1);
        assert_eq!(p.stats().alerts_raised, 1);
        assert_eq!(p.state(), PipelineState::SteadyState);
    }

    #[test]
    fn pacing_drops_frames_inside_interval() {
        let mut p = pipeline_with(
            Box::new(DiscardArtifacts),
            PipelineConfig {
                target_fps: 10,
                ..config()
            },
        );
        let t0 = Instant::now();
        p.process_frame(background(), t0);
        assert_eq!(
            p.process_frame(background(), t0 + Duration::from_millis(40)),
            StepOutcome::Paced
        );
        assert!(matches!(
            p.process_frame(background(), t0 + Duration::from_millis(120)),
            StepOutcome::Emitted(_)
        ));
        assert_eq!(p.stats().frames_read, 3);
        assert_eq!(p.stats().frames_processed, 2);
    }

    #[test]
    fn run_streams_until_source_exhausted() -> Result<()> {
        let mut p = pipeline();
        let mut source = ScriptedSource::new(vec![background(), background(), background()]);
        let mut out = Vec::new();
        let stop = AtomicBool::new(false);
        let stats = p.run(&mut source, &mut out, &stop)?;
        assert_eq!(p.state(), PipelineState::Terminated);
        assert_eq!(stats.frames_emitted, 2);
        let parts = out.windows(7).filter(|w| w == b"--frame").count();
        assert_eq!(parts, 2);
        Ok(())
    }

    #[test]
    fn source_error_terminates_gracefully() -> Result<()> {
        let mut p = pipeline();
        let mut source = ScriptedSource::new(vec![background()]).then_fail("camera unplugged");
        let stop = AtomicBool::new(false);
        let stats = p.run(&mut source, &mut std::io::sink(), &stop)?;
        assert_eq!(p.state(), PipelineState::Terminated);
        assert_eq!(stats.frames_read, 1);
        Ok(())
    }

    #[test]
    fn stop_signal_ends_warm_up() -> Result<()> {
        let mut p = pipeline_with(
            Box::new(DiscardArtifacts),
            PipelineConfig {
                warmup: Duration::from_secs(30),
                ..config()
            },
        );
        let mut source = ScriptedSource::new(vec![background()]);
        let stop = AtomicBool::new(true);
        let stats = p.run(&mut source, &mut std::io::sink(), &stop)?;
        assert_eq!(stats.frames_read, 0);
        assert_eq!(p.state(), PipelineState::Terminated);
        Ok(())
    }
}
