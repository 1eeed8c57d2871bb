//! Alert sink: snapshot + durable record + best-effort notification.
//!
//! The snapshot and the record are the durable source of truth and are
//! written first; notification delivery happens afterwards and its failure is
//! reported, never propagated.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::alert::notify::{Notification, Notifier};
use crate::detect::MotionRegion;
use crate::frame::Frame;
use crate::storage::{ensure_alert_distance, AlertRecord, AlertStore, ArtifactStore};

/// Directory (relative to the media root) holding alert snapshots.
pub const ALERT_IMAGE_DIR: &str = "motion_images";
pub const DEFAULT_ALERT_SUBJECT: &str = "Motion Detected Alert";
pub const DEFAULT_ALERT_SENDER: &str = "sentinel@localhost";
pub const DEFAULT_ALERT_RECIPIENT: &str = "security@localhost";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Fixed envelope of every alert notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub sender: String,
    pub recipient: String,
}

impl Default for AlertMessage {
    fn default() -> Self {
        Self {
            subject: DEFAULT_ALERT_SUBJECT.to_string(),
            sender: DEFAULT_ALERT_SENDER.to_string(),
            recipient: DEFAULT_ALERT_RECIPIENT.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationStatus {
    Delivered,
    Failed(String),
}

/// Outcome of a successfully recorded alert.
#[derive(Clone, Debug, PartialEq)]
pub struct RaisedAlert {
    pub record: AlertRecord,
    pub notification: NotificationStatus,
}

/// Human-readable alert time, second precision.
pub fn format_alert_time(alert_time: DateTime<Utc>) -> String {
    alert_time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Filesystem-safe form of a formatted timestamp: `:` becomes `-`, every
/// other character that is neither alphanumeric nor `-` becomes `_`.
pub fn sanitize_timestamp(formatted: &str) -> String {
    formatted
        .chars()
        .map(|c| match c {
            ':' => '-',
            c if c.is_ascii_alphanumeric() || c == '-' => c,
            _ => '_',
        })
        .collect()
}

/// Snapshot path for an alert, relative to the media root. Carries the
/// microseconds so alerts inside one second never share a file.
pub fn snapshot_path(alert_time: DateTime<Utc>) -> String {
    format!(
        "{}/motion_{}_{:06}.jpg",
        ALERT_IMAGE_DIR,
        sanitize_timestamp(&format_alert_time(alert_time)),
        alert_time.timestamp_subsec_micros()
    )
}

pub fn alert_body(formatted_time: &str, distance_m: f64) -> String {
    format!(
        "Alert! Unsafe condition occur.\nMotion detected at {}.\nDistance to object: {:.2} meters.",
        formatted_time, distance_m
    )
}

pub struct AlertSink {
    store: Box<dyn AlertStore>,
    artifacts: Box<dyn ArtifactStore>,
    notifier: Arc<dyn Notifier>,
    message: AlertMessage,
    jpeg_quality: u8,
}

impl AlertSink {
    pub fn new(
        store: Box<dyn AlertStore>,
        artifacts: Box<dyn ArtifactStore>,
        notifier: Arc<dyn Notifier>,
        message: AlertMessage,
    ) -> Self {
        Self {
            store,
            artifacts,
            notifier,
            message,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn store(&self) -> &dyn AlertStore {
        self.store.as_ref()
    }

    /// Persist the snapshot, create the record, then attempt delivery.
    ///
    /// Returns `Err` only when the durable part (snapshot or record) fails.
    pub fn raise(
        &mut self,
        alert_time: DateTime<Utc>,
        region: &MotionRegion,
        distance_m: f64,
        annotated: &Frame,
    ) -> Result<RaisedAlert> {
        ensure_alert_distance(distance_m)?;

        let formatted_time = format_alert_time(alert_time);
        let image_path = snapshot_path(alert_time);
        let jpeg = annotated
            .encode_jpeg(self.jpeg_quality)
            .context("encode alert snapshot")?;
        self.artifacts
            .write(&image_path, &jpeg)
            .with_context(|| format!("write alert snapshot {}", image_path))?;

        let record = self
            .store
            .create_alert(alert_time, &image_path, distance_m)
            .context("create alert record")?;

        log::info!(
            "alert #{} at {}: region {}x{} at ({}, {}), distance {:.2} m, snapshot {}",
            record.id,
            formatted_time,
            region.width,
            region.height,
            region.x,
            region.y,
            distance_m,
            image_path
        );

        let notification = Notification {
            subject: self.message.subject.clone(),
            body: alert_body(&formatted_time, distance_m),
            sender: self.message.sender.clone(),
            recipient: self.message.recipient.clone(),
            attachment: self.artifacts.resolve(&image_path),
        };
        let status = match self.notifier.send(&notification) {
            Ok(()) => {
                log::info!(
                    "alert notification sent to {} via {}",
                    notification.recipient,
                    self.notifier.name()
                );
                NotificationStatus::Delivered
            }
            Err(e) => {
                log::warn!(
                    "failed to send alert notification via {}: {:#}",
                    self.notifier.name(),
                    e
                );
                NotificationStatus::Failed(format!("{:#}", e))
            }
        };

        Ok(RaisedAlert {
            record,
            notification: status,
        })
    }
}
