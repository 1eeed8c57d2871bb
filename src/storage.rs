use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persisted alert entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Snapshot path relative to the media root, e.g. `motion_images/motion_<ts>.jpg`.
    pub image_path: String,
    pub distance: f64,
}

impl fmt::Display for AlertRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} meters", self.timestamp, self.distance)
    }
}

/// Alert records only ever carry a finite, non-negative distance.
pub fn ensure_alert_distance(distance: f64) -> Result<()> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(anyhow!(
            "alert distance must be finite and non-negative, got {}",
            distance
        ));
    }
    Ok(())
}

pub trait AlertStore: Send {
    /// Insert a new record. Records are never updated afterwards.
    fn create_alert(
        &mut self,
        timestamp: DateTime<Utc>,
        image_path: &str,
        distance: f64,
    ) -> Result<AlertRecord>;

    /// Most recent records first.
    fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>>;

    fn count(&self) -> Result<u64>;
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteAlertStore {
    conn: Connection,
}

impl SqliteAlertStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open alert database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS motion_alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at TEXT NOT NULL,
              image_path TEXT NOT NULL,
              distance REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_motion_alerts_created ON motion_alerts(created_at);
            "#,
        )?;
        Ok(())
    }
}

impl AlertStore for SqliteAlertStore {
    fn create_alert(
        &mut self,
        timestamp: DateTime<Utc>,
        image_path: &str,
        distance: f64,
    ) -> Result<AlertRecord> {
        ensure_alert_distance(distance)?;
        if image_path.trim().is_empty() {
            return Err(anyhow!("alert image path must not be empty"));
        }
        self.conn.execute(
            r#"
            INSERT INTO motion_alerts(created_at, image_path, distance)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                image_path,
                distance
            ],
        )?;
        Ok(AlertRecord {
            id: self.conn.last_insert_rowid(),
            timestamp,
            image_path: image_path.to_string(),
            distance,
        })
    }

    fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                "SELECT id, created_at, image_path, distance FROM motion_alerts ORDER BY id DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let created_at: String = row.get(1)?;
                let image_path: String = row.get(2)?;
                let distance: f64 = row.get(3)?;
                out.push((id, created_at, image_path, distance));
            }
            out
        };

        rows.into_iter()
            .map(|(id, created_at, image_path, distance)| {
                let timestamp = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| anyhow!("corrupt alert {}: bad created_at: {}", id, e))?
                    .with_timezone(&Utc);
                Ok(AlertRecord {
                    id,
                    timestamp,
                    image_path,
                    distance,
                })
            })
            .collect()
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM motion_alerts", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryAlertStore {
    records: Vec<AlertRecord>,
}

impl AlertStore for InMemoryAlertStore {
    fn create_alert(
        &mut self,
        timestamp: DateTime<Utc>,
        image_path: &str,
        distance: f64,
    ) -> Result<AlertRecord> {
        ensure_alert_distance(distance)?;
        if image_path.trim().is_empty() {
            return Err(anyhow!("alert image path must not be empty"));
        }
        let record = AlertRecord {
            id: self.records.len() as i64 + 1,
            timestamp,
            image_path: image_path.to_string(),
            distance,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        Ok(self.records.iter().rev().take(limit).cloned().collect())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}

// ----------------------------------------------------------------------------
// Image artifacts
// ----------------------------------------------------------------------------

/// Write-once blob storage for alert snapshots, addressed by relative path.
pub trait ArtifactStore: Send {
    fn write(&self, relative_path: &str, bytes: &[u8]) -> Result<()>;

    /// Location a consumer (e.g. a notifier) can read the artifact from.
    fn resolve(&self, relative_path: &str) -> PathBuf;
}

#[derive(Clone, Debug)]
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create media root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for FilesystemArtifactStore {
    fn write(&self, relative_path: &str, bytes: &[u8]) -> Result<()> {
        let relative = Path::new(relative_path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!(
                "artifact path must be relative without '..': {}",
                relative_path
            ));
        }
        let path = self.resolve(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, bytes)
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    // One temp file per write; concurrent writers never share it.
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
    let written = File::create(&tmp_path)
        .with_context(|| format!("create {}", tmp_path.display()))
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|()| {
            fs::rename(&tmp_path, path)
                .with_context(|| format!("rename to {}", path.display()))
        });
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}
