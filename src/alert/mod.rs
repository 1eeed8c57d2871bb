//! Alerting: throttle policy, overlays, the alert sink and notifiers.

mod annotate;
mod notify;
mod sink;
mod throttle;

pub use annotate::{annotate_alert, distance_label, ANNOTATION_COLOR};
pub use notify::{notifier_from_settings, LogNotifier, MqttNotifier, Notification, Notifier};
pub use sink::{
    alert_body, format_alert_time, sanitize_timestamp, snapshot_path, AlertMessage, AlertSink,
    NotificationStatus, RaisedAlert, ALERT_IMAGE_DIR, DEFAULT_ALERT_RECIPIENT,
    DEFAULT_ALERT_SENDER, DEFAULT_ALERT_SUBJECT, DEFAULT_JPEG_QUALITY,
};
pub use throttle::{
    AlertThrottle, SharedThrottle, ThrottlePolicy, DEFAULT_COOLDOWN, DEFAULT_MAX_DISTANCE_M,
};
