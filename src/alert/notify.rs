//! Alert notification transports.
//!
//! Delivery is advisory: callers treat `Notifier::send` failures as
//! recoverable and never roll back the alert record because of them.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Event, MqttOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::NotifySettings;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Fully rendered notification.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub recipient: String,
    /// Snapshot image to attach.
    pub attachment: PathBuf,
}

pub trait Notifier: Send + Sync {
    /// Transport identifier for logs.
    fn name(&self) -> &'static str;

    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Build the notifier described by the configuration: MQTT when a broker is
/// configured, otherwise log-only.
pub fn notifier_from_settings(settings: &NotifySettings) -> Result<Arc<dyn Notifier>> {
    match settings.mqtt_broker_addr.as_deref() {
        Some(addr) => Ok(Arc::new(MqttNotifier::connect(
            addr,
            &settings.mqtt_client_id,
            &settings.mqtt_topic,
        )?)),
        None => {
            log::warn!("no notification transport configured; alerts will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

// ----------------------------------------------------------------------------
// Log-only
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&self, notification: &Notification) -> Result<()> {
        log::info!(
            "notification to {}: {} | {} | attachment {}",
            notification.recipient,
            notification.subject,
            notification.body.replace('\n', " "),
            notification.attachment.display()
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// MQTT
// ----------------------------------------------------------------------------

#[derive(Serialize)]
struct NotificationPayload<'a> {
    subject: &'a str,
    body: &'a str,
    sender: &'a str,
    recipient: &'a str,
    attachment_name: String,
    attachment_content_type: &'static str,
    /// Hex-encoded attachment bytes.
    attachment_data: String,
}

/// Publishes notifications as JSON (QoS 1) to a broker topic.
///
/// Publishing is non-blocking: if the outgoing queue is full (broker down or
/// slow), `send` fails immediately instead of stalling the frame loop. The
/// connection thread outlives broker outages and reconnects with backoff, so
/// queued notifications go out once the broker is back.
pub struct MqttNotifier {
    client: Client,
    topic: String,
    closing: Arc<AtomicBool>,
    _connection: JoinHandle<()>,
}

impl MqttNotifier {
    pub fn connect(broker_addr: &str, client_id: &str, topic: &str) -> Result<Self> {
        let (host, port) = parse_broker_addr(broker_addr)?;
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut connection) = Client::new(options, 16);
        let closing = Arc::new(AtomicBool::new(false));
        let thread_closing = closing.clone();
        let handle = std::thread::spawn(move || {
            let mut failures = 0u32;
            // Each poll after an error attempts a fresh connection.
            for event in connection.iter() {
                if thread_closing.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => failures = 0,
                    Err(e) => {
                        let delay = reconnect_delay(failures);
                        failures = failures.saturating_add(1);
                        log::warn!("MQTT connection error: {}; retrying in {:?}", e, delay);
                        std::thread::sleep(delay);
                    }
                }
            }
            log::debug!("MQTT connection thread exiting");
        });

        log::info!("alert notifications publish to {} on {}", topic, broker_addr);
        Ok(Self {
            client,
            topic: topic.to_string(),
            closing,
            _connection: handle,
        })
    }
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn send(&self, notification: &Notification) -> Result<()> {
        let payload = render_payload(notification)?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .context("enqueue mqtt notification")?;
        Ok(())
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.client.try_disconnect();
    }
}

/// Wait before the `attempt`-th consecutive reconnect: doubles from one second
/// up to thirty.
fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BASE
        .saturating_mul(1u32 << attempt.min(16))
        .min(RECONNECT_MAX)
}

fn render_payload(notification: &Notification) -> Result<Vec<u8>> {
    let bytes = std::fs::read(&notification.attachment).with_context(|| {
        format!(
            "read notification attachment {}",
            notification.attachment.display()
        )
    })?;
    let payload = NotificationPayload {
        subject: &notification.subject,
        body: &notification.body,
        sender: &notification.sender,
        recipient: &notification.recipient,
        attachment_name: attachment_name(&notification.attachment),
        attachment_content_type: "image/jpeg",
        attachment_data: hex::encode(bytes),
    };
    Ok(serde_json::to_vec(&payload)?)
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot.jpg".to_string())
}

fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("mqtt broker address must be host:port, got '{}'", addr))?;
    if host.is_empty() {
        return Err(anyhow!("mqtt broker address missing host: '{}'", addr));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("invalid mqtt broker port in '{}'", addr))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_addr_parsing() -> Result<()> {
        assert_eq!(parse_broker_addr("127.0.0.1:1883")?, ("127.0.0.1".to_string(), 1883));
        assert!(parse_broker_addr("localhost").is_err());
        assert!(parse_broker_addr(":1883").is_err());
        assert!(parse_broker_addr("host:notaport").is_err());
        Ok(())
    }

    #[test]
    fn reconnect_backoff_doubles_and_caps() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(4), Duration::from_secs(16));
        assert_eq!(reconnect_delay(5), Duration::from_secs(30));
        assert_eq!(reconnect_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn broker_outage_keeps_notifications_queueing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("snapshot.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9])?;
        let notification = Notification {
            subject: "Motion Detected Alert".to_string(),
            body: "body".to_string(),
            sender: "cam@example.com".to_string(),
            recipient: "owner@example.com".to_string(),
            attachment: path,
        };

        // Nothing listens on port 1: the first connection attempt is refused.
        let notifier = MqttNotifier::connect("127.0.0.1:1", "sentinel-test", "sentinel/alerts")?;
        std::thread::sleep(Duration::from_millis(1500));
        for _ in 0..3 {
            notifier.send(&notification)?;
        }
        Ok(())
    }

    #[test]
    fn payload_carries_attachment_bytes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("motion_2024-01-01_00-00-00.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9])?;
        let notification = Notification {
            subject: "Motion Detected Alert".to_string(),
            body: "body".to_string(),
            sender: "cam@example.com".to_string(),
            recipient: "owner@example.com".to_string(),
            attachment: path,
        };

        let payload: serde_json::Value = serde_json::from_slice(&render_payload(&notification)?)?;
        assert_eq!(payload["attachment_name"], "motion_2024-01-01_00-00-00.jpg");
        assert_eq!(payload["attachment_data"], "ffd8ffd9");
        assert_eq!(payload["recipient"], "owner@example.com");
        Ok(())
    }

    #[test]
    fn missing_attachment_fails_render() {
        let notification = Notification {
            subject: String::new(),
            body: String::new(),
            sender: String::new(),
            recipient: String::new(),
            attachment: PathBuf::from("/nonexistent/snapshot.jpg"),
        };
        assert!(render_payload(&notification).is_err());
    }

    #[test]
    fn log_notifier_always_succeeds() {
        let notification = Notification {
            subject: "s".to_string(),
            body: "line one\nline two".to_string(),
            sender: "a".to_string(),
            recipient: "b".to_string(),
            attachment: PathBuf::from("x.jpg"),
        };
        assert!(LogNotifier.send(&notification).is_ok());
    }
}
