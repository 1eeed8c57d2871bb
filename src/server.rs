//! Minimal HTTP/1.1 server for the live feed.
//!
//! `GET /video-feed` starts a fresh pipeline for that viewer, joined to the
//! camera's alert throttle, and streams
//! multipart JPEG parts until the viewer disconnects, the source ends or the
//! server stops. `GET /health` reports the number of active feeds.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::alert::{notifier_from_settings, AlertSink, Notifier, SharedThrottle};
use crate::config::SentinelConfig;
use crate::ingest::{self, FrameSource};
use crate::pipeline::Pipeline;
use crate::storage::{FilesystemArtifactStore, SqliteAlertStore};
use crate::stream::stream_content_type;

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const FEED_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the per-viewer parts of a feed. Each call returns fresh state, except
/// for whatever the camera's viewers must share.
pub trait FeedFactory: Send + Sync {
    fn open_source(&self) -> Result<Box<dyn FrameSource>>;
    fn build_pipeline(&self) -> Result<Pipeline>;
}

/// Feeds backed by the daemon configuration: the configured camera, a SQLite
/// alert store, the media root, a shared notifier and the camera's throttle.
pub struct ConfiguredFeeds {
    config: SentinelConfig,
    notifier: Arc<dyn Notifier>,
    throttle: SharedThrottle,
}

impl ConfiguredFeeds {
    pub fn new(config: SentinelConfig, notifier: Arc<dyn Notifier>) -> Self {
        let throttle = SharedThrottle::new(config.pipeline.throttle);
        Self {
            config,
            notifier,
            throttle,
        }
    }

    pub fn from_config(config: SentinelConfig) -> Result<Self> {
        let notifier = notifier_from_settings(&config.notify)?;
        Ok(Self::new(config, notifier))
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }
}

impl FeedFactory for ConfiguredFeeds {
    fn open_source(&self) -> Result<Box<dyn FrameSource>> {
        ingest::open_source(&self.config.camera_url)
    }

    fn build_pipeline(&self) -> Result<Pipeline> {
        let store = SqliteAlertStore::open(&self.config.storage.db_path)?;
        let artifacts = FilesystemArtifactStore::new(&self.config.storage.media_root)?;
        let sink = AlertSink::new(
            Box::new(store),
            Box::new(artifacts),
            self.notifier.clone(),
            self.config.pipeline.message.clone(),
        );
        let pipeline = Pipeline::new(self.config.pipeline.clone(), sink);
        Ok(pipeline.with_throttle(self.throttle.clone()))
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    active_feeds: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn active_feeds(&self) -> usize {
        self.active_feeds.load(Ordering::SeqCst)
    }

    /// Stop accepting, signal every feed to stop and wait for them.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    addr: String,
    feeds: Arc<dyn FeedFactory>,
}

impl StreamServer {
    pub fn new(addr: impl Into<String>, feeds: Arc<dyn FeedFactory>) -> Self {
        Self {
            addr: addr.into(),
            feeds,
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .addr
            .parse()
            .with_context(|| format!("invalid server address '{}'", self.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind stream server on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "server configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let active_feeds = Arc::new(AtomicUsize::new(0));
        let ctx = ServerContext {
            feeds: self.feeds,
            active_feeds: active_feeds.clone(),
            shutdown: shutdown.clone(),
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, ctx) {
                log::error!("stream server stopped: {:#}", err);
            }
        });
        log::info!("stream server listening on http://{}/video-feed", addr);

        Ok(ServerHandle {
            addr,
            active_feeds,
            shutdown,
            join: Some(join),
        })
    }
}

struct ServerContext {
    feeds: Arc<dyn FeedFactory>,
    active_feeds: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

/// Counts a running feed for as long as it is alive.
struct ActiveFeed(Arc<AtomicUsize>);

impl ActiveFeed {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveFeed {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_server(listener: TcpListener, ctx: ServerContext) -> Result<()> {
    let mut feeds: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        match listener.accept() {
            Ok((stream, peer)) => match handle_connection(stream, peer, &ctx) {
                Ok(Some(feed)) => feeds.push(feed),
                Ok(None) => {}
                Err(err) => log::warn!("request from {} rejected: {:#}", peer, err),
            },
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => break Err(err.into()),
        }
        feeds.retain(|feed| !feed.is_finished());
    };

    ctx.shutdown.store(true, Ordering::SeqCst);
    for feed in feeds {
        if feed.join().is_err() {
            log::warn!("feed thread panicked");
        }
    }
    result
}

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ServerContext,
) -> Result<Option<JoinHandle<()>>> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(None);
    }
    match request.path.as_str() {
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "active_feeds": ctx.active_feeds.load(Ordering::SeqCst),
            });
            write_json_response(&mut stream, 200, &body.to_string())?;
            Ok(None)
        }
        "/video-feed" => start_feed(stream, peer, ctx).map(Some),
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            Ok(None)
        }
    }
}

fn start_feed(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ServerContext,
) -> Result<JoinHandle<()>> {
    let setup = ctx
        .feeds
        .open_source()
        .and_then(|source| Ok((source, ctx.feeds.build_pipeline()?)));
    let (mut source, mut pipeline) = match setup {
        Ok(parts) => parts,
        Err(err) => {
            write_json_response(&mut stream, 503, r#"{"error":"feed_unavailable"}"#)?;
            return Err(err.context("start video feed"));
        }
    };

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        stream_content_type()
    );
    stream.write_all(header.as_bytes())?;
    stream.set_write_timeout(Some(FEED_WRITE_TIMEOUT))?;

    let guard = ActiveFeed::new(ctx.active_feeds.clone());
    let stop = ctx.shutdown.clone();
    log::info!("video feed started for {}", peer);
    let feed = std::thread::Builder::new()
        .name(format!("feed-{}", peer))
        .spawn(move || {
            let _guard = guard;
            match pipeline.run(source.as_mut(), &mut stream, &stop) {
                Ok(stats) => log::info!(
                    "video feed for {} ended after {} frames, {} alerts",
                    peer,
                    stats.frames_emitted,
                    stats.alerts_raised
                ),
                Err(err) => log::warn!("video feed for {} failed: {:#}", peer, err),
            }
        })
        .context("spawn feed thread")?;
    Ok(feed)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogNotifier;
    use crate::config::{NotifySettings, PipelineConfig, StorageSettings};
    use crate::frame::Frame;
    use crate::storage::AlertStore;
    use std::time::Instant;

    #[test]
    fn viewers_of_one_camera_raise_one_alert() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("alerts.db").to_string_lossy().into_owned();
        let config = SentinelConfig {
            camera_url: "stub://porch".to_string(),
            pipeline: PipelineConfig {
                warmup: Duration::ZERO,
                target_fps: 0,
                ..PipelineConfig::default()
            },
            storage: StorageSettings {
                db_path: db_path.clone(),
                media_root: dir.path().join("media"),
            },
            notify: NotifySettings {
                mqtt_broker_addr: None,
                mqtt_topic: "sentinel/alerts".to_string(),
                mqtt_client_id: "sentinel-test".to_string(),
            },
            server_addr: "127.0.0.1:0".to_string(),
        };
        let feeds = ConfiguredFeeds::new(config, Arc::new(LogNotifier));

        let empty = Frame::solid(640, 480, [0, 0, 0]);
        let intruder = empty.with_filled_rect(285, 170, 70, 140, [255, 255, 255]);
        let now = Instant::now();
        let mut viewers = vec![feeds.build_pipeline()?, feeds.build_pipeline()?];
        for pipeline in &mut viewers {
            pipeline.process_frame(empty.clone(), now);
            pipeline.process_frame(intruder.clone(), now);
        }

        let store = SqliteAlertStore::open(&db_path)?;
        assert_eq!(store.count()?, 1);
        Ok(())
    }

    #[test]
    fn active_feed_guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = ActiveFeed::new(counter.clone());
        let b = ActiveFeed::new(counter.clone());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop(a);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(b);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejects_unparseable_address() {
        struct NoFeeds;
        impl FeedFactory for NoFeeds {
            fn open_source(&self) -> Result<Box<dyn FrameSource>> {
                Err(anyhow!("no camera"))
            }
            fn build_pipeline(&self) -> Result<Pipeline> {
                Err(anyhow!("no pipeline"))
            }
        }
        assert!(StreamServer::new("not-an-addr", Arc::new(NoFeeds)).spawn().is_err());
    }
}
