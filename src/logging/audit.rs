//! Daily CSV audit log
//!
//! One semicolon-delimited line per inspection event, appended to
//! `log_<YYYY-MM-DD>.csv` in the log directory. A header row is written when a
//! day's file is first created. Logging is best effort: failures are traced
//! and never reach the caller.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Header row of every audit file
pub const AUDIT_HEADER: &str = "Timestamp;Date;Heure;Etat;Pixels";

/// One event as posted by the console
///
/// Field names follow the console (`ts`, `heure`, `etat`) with English
/// aliases accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "ts", alias = "timestamp", default)]
    pub timestamp: serde_json::Value,
    #[serde(default)]
    pub date: String,
    #[serde(rename = "heure", alias = "time", default)]
    pub time: String,
    #[serde(rename = "etat", alias = "state", default)]
    pub state: String,
    #[serde(rename = "pixels", alias = "pixelCount", alias = "pixel_count", default)]
    pub pixel_count: serde_json::Value,
}

impl AuditRecord {
    /// Render as one CSV line (no trailing newline)
    pub fn to_csv_line(&self) -> String {
        [
            csv_field(&self.timestamp),
            sanitize(&self.date),
            sanitize(&self.time),
            sanitize(&self.state),
            csv_field(&self.pixel_count),
        ]
        .join(";")
    }
}

fn csv_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => sanitize(s),
        other => sanitize(&other.to_string()),
    }
}

/// Separators and line breaks would corrupt the row
fn sanitize(field: &str) -> String {
    field.replace([';', '\n', '\r'], " ")
}

/// Appends audit records to per-day files
#[derive(Clone)]
pub struct AuditLogger {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl AuditLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File receiving records for `date`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("log_{}.csv", date.format("%Y-%m-%d")))
    }

    /// Append a record to today's file (UTC)
    pub async fn append(&self, record: &AuditRecord) {
        let today = Utc::now().date_naive();
        if let Err(e) = self.append_on(today, record).await {
            error!(dir = %self.dir.display(), error = %e, "Failed to write audit record");
        }
    }

    /// Append a record to the file for `date`
    pub async fn append_on(&self, date: NaiveDate, record: &AuditRecord) -> io::Result<()> {
        let _guard = self.lock.lock().await;

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(date);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", AUDIT_HEADER)?;
        }
        writeln!(file, "{}", record.to_csv_line())?;
        file.flush()?;

        debug!(path = %path.display(), state = %record.state, "Audit record appended");
        Ok(())
    }

    /// Fire-and-forget append on a background task
    pub fn spawn_append(&self, record: AuditRecord) {
        let logger = self.clone();
        tokio::spawn(async move {
            logger.append(&record).await;
        });
    }
}
