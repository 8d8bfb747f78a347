//! Process records and their on-disk store.
//!
//! A [`ProcessRecord`] is the hub's description of one supervised
//! subprocess. The in-memory record map owned by the hub is authoritative;
//! the [`RecordStore`] mirrors it to a JSON file on every mutation so a
//! human operator (or a later hub session) can inspect what was running.
//! The file is strictly best-effort: store failures are logged and
//! swallowed, and live process handles are never rehydrated from it.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use crate::registry::TransportKind;

/// Description of one running (or last-seen) server process.
///
/// Serialized with camelCase field names and an ISO-8601 `startedAt`
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// Server name, unique per live process.
    pub name: String,
    /// OS process id.
    pub pid: u32,
    /// Port the server was told to bind.
    pub port: u16,
    /// Transport the server was started for.
    pub transport: TransportKind,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Executable that was spawned.
    pub command: String,
    /// Arguments it was spawned with.
    pub args: Vec<String>,
    /// Per-server log file path.
    pub log_path: PathBuf,
}

impl ProcessRecord {
    /// Time elapsed since the process was started.
    pub fn uptime(&self) -> std::time::Duration {
        (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Write-through JSON store for process records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    /// Creates a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RecordStore { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the record map from disk.
    ///
    /// An absent file is an empty map; a corrupt file logs a warning and
    /// is treated as empty. This never fails: the store is advisory.
    pub async fn load(&self) -> HashMap<String, ProcessRecord> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read record store");
                return HashMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Record store corrupt, ignoring");
                HashMap::new()
            }
        }
    }

    /// Writes the full record map to disk, creating parent directories.
    ///
    /// Failures are logged at `warn` and swallowed; persistence must never
    /// fail a lifecycle operation.
    pub async fn persist(&self, records: &HashMap<String, ProcessRecord>) {
        if let Err(e) = self.try_persist(records).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist record store");
        }
    }

    async fn try_persist(&self, records: &HashMap<String, ProcessRecord>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let serialized = serde_json::to_string_pretty(records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&self.path, serialized).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrips_with_iso_timestamp() {
        let record = ProcessRecord {
            name: "demo".to_string(),
            pid: 4242,
            port: 3000,
            transport: TransportKind::Http,
            started_at: "2026-08-23T10:00:00Z".parse().unwrap(),
            command: "node".to_string(),
            args: vec!["/srv/demo/dist/index.js".to_string()],
            log_path: "/tmp/demo-3000.log".into(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"startedAt\":\"2026-08-23T10:00:00Z\""));
        assert!(json.contains("\"logPath\""));

        let back: ProcessRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
