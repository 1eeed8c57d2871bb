//! Motion Sentinel
//!
//! Watches a camera feed for close-range motion, records alerts and serves
//! the annotated feed as a live MJPEG stream.
//!
//! # Pipeline
//!
//! Every viewer of the live feed gets its own pipeline:
//!
//! 1. **Ingest**: frames arrive from an HTTP camera or a synthetic source and
//!    are normalized to 640x480.
//! 2. **Detect**: the current frame is diffed against the previous one; the
//!    resulting regions are sized and their distance estimated with a pinhole
//!    camera model.
//! 3. **Alert**: the first region within 3 m, outside the 10 s cool-down,
//!    raises an alert: annotated snapshot, database record, then a
//!    best-effort notification.
//! 4. **Stream**: the (possibly annotated) frame is JPEG-encoded and written
//!    as one part of a `multipart/x-mixed-replace` response.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame container, resize and JPEG codec
//! - `detect`: frame differencing and distance estimation
//! - `alert`: throttle, overlays, alert sink and notifiers
//! - `storage`: alert records (SQLite / in-memory) and snapshot files
//! - `ingest`: frame sources
//! - `pipeline`: the per-feed state machine
//! - `stream`: multipart encoding
//! - `server`: HTTP endpoints
//! - `config`: file + environment configuration

pub mod alert;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod stream;

pub use alert::{
    annotate_alert, AlertMessage, AlertSink, AlertThrottle, LogNotifier, MqttNotifier,
    Notification, NotificationStatus, Notifier, RaisedAlert, SharedThrottle, ThrottlePolicy,
};
pub use config::{NotifySettings, PipelineConfig, SentinelConfig, StorageSettings};
pub use detect::{
    estimate_distance, Calibration, DistanceEstimator, MotionDetector, MotionParams,
    MotionRegion, MotionResult,
};
pub use frame::{Frame, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};
pub use ingest::{open_source, FrameSource, MjpegHttpSource, ScriptedSource, SyntheticSource};
pub use pipeline::{Pipeline, PipelineState, PipelineStats, StepOutcome};
pub use server::{ConfiguredFeeds, FeedFactory, ServerHandle, StreamServer};
pub use storage::{
    AlertRecord, AlertStore, ArtifactStore, FilesystemArtifactStore, InMemoryAlertStore,
    SqliteAlertStore,
};
pub use stream::{
    multipart_part, stream_content_type, FrameEncoder, StreamEncoder, MULTIPART_BOUNDARY,
};
