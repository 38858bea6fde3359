use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::sink::{DetectionRecord, ResultSink};

/// Local sink: rows in SQLite, image blobs in a directory beside the database.
pub struct SqliteSink {
    conn: Mutex<Connection>,
    blob_dir: PathBuf,
}

impl SqliteSink {
    /// Open (or create) the database at `db_path`. Blobs go to `<db_path>.blobs/`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("open sink database {}", db_path.display()))?;
        let mut blob_dir = db_path.as_os_str().to_owned();
        blob_dir.push(".blobs");
        let blob_dir = PathBuf::from(blob_dir);
        std::fs::create_dir_all(&blob_dir)
            .with_context(|| format!("create blob directory {}", blob_dir.display()))?;

        let sink = Self {
            conn: Mutex::new(conn),
            blob_dir,
        };
        sink.ensure_schema()?;
        Ok(sink)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sink database lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              source TEXT NOT NULL,
              label TEXT NOT NULL,
              confidence REAL NOT NULL,
              image_url TEXT NOT NULL,
              detected_at TEXT NOT NULL,
              used INTEGER NOT NULL DEFAULT 0,
              expiry_estimate TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_detections_detected_at ON detections(detected_at);
            "#,
        )?;
        Ok(())
    }

    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    /// Most recent rows first.
    pub fn recent(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT source, label, confidence, image_url, detected_at, used, expiry_estimate
            FROM detections ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit exceeds i64 range"))?;
        let mut rows = stmt.query(params![limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let detected_at: String = row.get(4)?;
            let expiry: Option<String> = row.get(6)?;
            out.push(DetectionRecord {
                source: row.get(0)?,
                label: row.get(1)?,
                confidence: row.get::<_, f64>(2)? as f32,
                image_url: row.get(3)?,
                detected_at: parse_timestamp(&detected_at)?,
                used: row.get::<_, i64>(5)? != 0,
                expiry_estimate: expiry.as_deref().map(parse_timestamp).transpose()?,
            });
        }
        Ok(out)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("corrupt timestamp '{}'", value))?
        .with_timezone(&Utc))
}

impl ResultSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn upload_image(&self, name: &str, jpeg: &[u8]) -> Result<String> {
        if name.contains('/') || name.contains("..") {
            return Err(anyhow!("invalid blob name '{}'", name));
        }
        let path = self.blob_dir.join(name);
        std::fs::write(&path, jpeg).with_context(|| format!("write blob {}", path.display()))?;
        let absolute = std::fs::canonicalize(&path).unwrap_or(path);
        Ok(format!("file://{}", absolute.display()))
    }

    fn record_detection(&self, record: &DetectionRecord) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO detections(source, label, confidence, image_url, detected_at, used, expiry_estimate)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.source,
                record.label,
                f64::from(record.confidence),
                record.image_url,
                record.detected_at.to_rfc3339(),
                record.used,
                record.expiry_estimate.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}
