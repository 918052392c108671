//! Checkpoint store: the last image version a run has acted upon.
//!
//! One record per image name, upserted on every new version. No history is
//! kept. The SQLite table is named after the configured store name so several
//! watchers can share one database file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by checkpoint stores
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint store lock poisoned")]
    Poisoned,
}

/// A stored checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub image_name: String,
    pub version: String,
    pub processed_at: DateTime<Utc>,
}

/// Key-value store of processed versions, keyed by image name
pub trait CheckpointStore: Send + Sync {
    /// Last version recorded for an image, if any
    fn last_version(&self, image: &str) -> Result<Option<String>, CheckpointError>;

    /// Upsert the version for an image, stamping it with the current time
    fn record_version(&self, image: &str, version: &str) -> Result<(), CheckpointError>;

    /// All checkpoints, ordered by image name
    fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// Delete the checkpoint for an image. Returns whether one existed.
    fn remove(&self, image: &str) -> Result<bool, CheckpointError>;
}

/// Quote a store name for use as an SQL identifier
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite-backed checkpoint store
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database file and the checkpoint table
    pub fn open(path: &Path, store_name: &str) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, store_name)
    }

    /// In-memory store (tests and dry runs)
    pub fn in_memory(store_name: &str) -> Result<Self, CheckpointError> {
        Self::with_connection(Connection::open_in_memory()?, store_name)
    }

    fn with_connection(conn: Connection, store_name: &str) -> Result<Self, CheckpointError> {
        let table = quote_identifier(store_name);
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                image_name TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                processed_at TEXT NOT NULL
            );
            "#
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
            table,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CheckpointError> {
        self.conn.lock().map_err(|_| CheckpointError::Poisoned)
    }

    fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<Checkpoint> {
        let image_name: String = row.get(0)?;
        let version: String = row.get(1)?;
        let processed_at_str: String = row.get(2)?;

        // Rows written by hand may carry odd timestamps; they are informational only
        let processed_at = DateTime::parse_from_rfc3339(&processed_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(Checkpoint {
            image_name,
            version,
            processed_at,
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn last_version(&self, image: &str) -> Result<Option<String>, CheckpointError> {
        let conn = self.lock()?;
        let version = conn
            .query_row(
                &format!("SELECT version FROM {} WHERE image_name = ?1", self.table),
                params![image],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(version)
    }

    fn record_version(&self, image: &str, version: &str) -> Result<(), CheckpointError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (image_name, version, processed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(image_name) DO UPDATE SET
                     version = excluded.version,
                     processed_at = excluded.processed_at",
                self.table
            ),
            params![image, version, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT image_name, version, processed_at FROM {} ORDER BY image_name",
            self.table
        ))?;
        let rows = stmt.query_map([], Self::row_to_checkpoint)?;
        let checkpoints = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(checkpoints)
    }

    fn remove(&self, image: &str) -> Result<bool, CheckpointError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE image_name = ?1", self.table),
            params![image],
        )?;
        Ok(deleted > 0)
    }
}

/// Process-local checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing versions
    pub fn with_versions<I, K, V>(versions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let now = Utc::now();
        let records = versions
            .into_iter()
            .map(|(k, v)| {
                let image_name = k.into();
                let checkpoint = Checkpoint {
                    image_name: image_name.clone(),
                    version: v.into(),
                    processed_at: now,
                };
                (image_name, checkpoint)
            })
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, CheckpointError> {
        self.records.lock().map_err(|_| CheckpointError::Poisoned)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn last_version(&self, image: &str) -> Result<Option<String>, CheckpointError> {
        Ok(self.lock()?.get(image).map(|c| c.version.clone()))
    }

    fn record_version(&self, image: &str, version: &str) -> Result<(), CheckpointError> {
        self.lock()?.insert(
            image.to_string(),
            Checkpoint {
                image_name: image.to_string(),
                version: version.to_string(),
                processed_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut all: Vec<Checkpoint> = self.lock()?.values().cloned().collect();
        all.sort_by(|a, b| a.image_name.cmp(&b.image_name));
        Ok(all)
    }

    fn remove(&self, image: &str) -> Result<bool, CheckpointError> {
        Ok(self.lock()?.remove(image).is_some())
    }
}
