//! Durable storage for cache entry records.
//!
//! The store is addressed by entry id, with a secondary lookup by URL.
//! Writes are partial: callers pass only the columns they changed and the
//! store merges them into the existing row. Store errors are returned to the
//! caller unchanged; nothing here retries.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::entry::EntryStatus;
use crate::error::{Error, FileSystemError, Result};

const SCHEMA_VERSION: i32 = 1;

const SELECT_COLUMNS: &str = "id, url, extension, status, error, metadata, reencode, \
     created_at, updated_at, live_at, deleted, ttl";

/// A full stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Entry id.
    pub id: String,
    /// Source URL.
    pub url: String,
    /// Output extension.
    pub extension: String,
    /// Raw status string.
    pub status: String,
    /// Opaque failure reference.
    pub error: Option<String>,
    /// Serialized metadata JSON.
    pub metadata: Option<String>,
    /// Serialized reencode options JSON.
    pub reencode: Option<String>,
    /// Creation time (ms).
    pub created_at: u64,
    /// Last update (ms).
    pub updated_at: u64,
    /// Last completion (ms).
    pub live_at: Option<u64>,
    /// Soft-deleted flag.
    pub deleted: bool,
    /// TTL in seconds.
    pub ttl: u64,
}

impl EntryRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            extension: row.get(2)?,
            status: row.get(3)?,
            error: row.get(4)?,
            metadata: row.get(5)?,
            reencode: row.get(6)?,
            created_at: row.get::<_, i64>(7)? as u64,
            updated_at: row.get::<_, i64>(8)? as u64,
            live_at: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
            deleted: row.get(10)?,
            ttl: row.get::<_, i64>(11)? as u64,
        })
    }
}

/// A partial set of columns to merge into a row.
///
/// `None` leaves a column untouched. Nullable columns are doubly optional so
/// that `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFields {
    /// Source URL.
    pub url: Option<String>,
    /// Output extension.
    pub extension: Option<String>,
    /// Status.
    pub status: Option<EntryStatus>,
    /// Failure reference.
    pub error: Option<Option<String>>,
    /// Serialized metadata.
    pub metadata: Option<Option<String>>,
    /// Serialized reencode options.
    pub reencode: Option<Option<String>>,
    /// Creation time (ms).
    pub created_at: Option<u64>,
    /// Last update (ms).
    pub updated_at: Option<u64>,
    /// Last completion (ms).
    pub live_at: Option<Option<u64>>,
    /// Soft-deleted flag.
    pub deleted: Option<bool>,
    /// TTL in seconds.
    pub ttl: Option<u64>,
}

impl EntryFields {
    /// Only the soft-delete flag.
    pub fn deleted(deleted: bool) -> Self {
        Self {
            deleted: Some(deleted),
            ..Self::default()
        }
    }

    /// Whether no column is set.
    pub fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        fn text(value: Option<&String>) -> Value {
            value.map_or(Value::Null, |v| Value::Text(v.clone()))
        }
        fn int(value: u64) -> Value {
            Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
        }

        let mut columns = Vec::new();
        if let Some(url) = &self.url {
            columns.push(("url", Value::Text(url.clone())));
        }
        if let Some(extension) = &self.extension {
            columns.push(("extension", Value::Text(extension.clone())));
        }
        if let Some(status) = self.status {
            columns.push(("status", Value::Text(status.as_str().to_string())));
        }
        if let Some(error) = &self.error {
            columns.push(("error", text(error.as_ref())));
        }
        if let Some(metadata) = &self.metadata {
            columns.push(("metadata", text(metadata.as_ref())));
        }
        if let Some(reencode) = &self.reencode {
            columns.push(("reencode", text(reencode.as_ref())));
        }
        if let Some(created_at) = self.created_at {
            columns.push(("created_at", int(created_at)));
        }
        if let Some(updated_at) = self.updated_at {
            columns.push(("updated_at", int(updated_at)));
        }
        if let Some(live_at) = self.live_at {
            columns.push(("live_at", live_at.map_or(Value::Null, int)));
        }
        if let Some(deleted) = self.deleted {
            columns.push(("deleted", Value::Integer(i64::from(deleted))));
        }
        if let Some(ttl) = self.ttl {
            columns.push(("ttl", int(ttl)));
        }
        columns
    }
}

/// Durable entry storage.
#[cfg_attr(test, mockall::automock)]
pub trait EntryStore: Send + Sync {
    /// Fetch a row by id.
    fn get(&self, id: &str) -> Result<Option<EntryRecord>>;

    /// Fetch a row by source URL.
    fn get_by_url(&self, url: &str) -> Result<Option<EntryRecord>>;

    /// Live rows whose TTL elapsed before `now` (ms).
    fn list_expired(&self, now: u64) -> Result<Vec<EntryRecord>>;

    /// Rows in any of `statuses`, oldest first.
    fn list_by_status(&self, statuses: &[EntryStatus]) -> Result<Vec<EntryRecord>>;

    /// Merge `fields` into the row for `id`, inserting it if absent.
    fn upsert(&self, id: &str, fields: &EntryFields) -> Result<()>;

    /// Remove the row for `id`.
    fn delete(&self, id: &str) -> Result<()>;

    /// One zero-based page of rows, oldest first.
    fn list_page(&self, page: usize, limit: usize) -> Result<Vec<EntryRecord>>;
}

/// SQLite-backed [`EntryStore`].
pub struct SqliteEntryStore {
    conn: Mutex<Connection>,
}

impl SqliteEntryStore {
    /// Open (or create) a database file and apply migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: format!("Failed to create database directory: {e}"),
                })
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        migrate(&conn)?;
        info!("Opened entry store at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_one(&self, filter: &str, value: &str) -> Result<Option<EntryRecord>> {
        let conn = self.conn();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM media WHERE {filter} = ?1 LIMIT 1");
        let record = conn
            .query_row(&sql, params![value], EntryRecord::from_row)
            .optional()?;
        Ok(record)
    }
}

impl std::fmt::Debug for SqliteEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEntryStore").finish_non_exhaustive()
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
    if version < SCHEMA_VERSION {
        debug!("Migrating entry store from version {version} to {SCHEMA_VERSION}");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS media (
                id         TEXT PRIMARY KEY,
                url        TEXT NOT NULL,
                extension  TEXT NOT NULL DEFAULT '',
                status     TEXT NOT NULL DEFAULT 'pending',
                error      TEXT,
                metadata   TEXT,
                reencode   TEXT,
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0,
                live_at    INTEGER,
                deleted    INTEGER NOT NULL DEFAULT 0,
                ttl        INTEGER NOT NULL DEFAULT 3600
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_media_url ON media(url);
            CREATE INDEX IF NOT EXISTS idx_media_expiry ON media(deleted, live_at);
            CREATE INDEX IF NOT EXISTS idx_media_status ON media(status);

            PRAGMA user_version = 1;",
        )?;
    }
    Ok(())
}

impl EntryStore for SqliteEntryStore {
    fn get(&self, id: &str) -> Result<Option<EntryRecord>> {
        self.query_one("id", id)
    }

    fn get_by_url(&self, url: &str) -> Result<Option<EntryRecord>> {
        self.query_one("url", url)
    }

    fn list_expired(&self, now: u64) -> Result<Vec<EntryRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM media
             WHERE deleted = 0 AND live_at IS NOT NULL AND live_at + ttl * 1000 < ?1
             ORDER BY live_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![now as i64], EntryRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_by_status(&self, statuses: &[EntryStatus]) -> Result<Vec<EntryRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM media WHERE status IN ({placeholders})
             ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(statuses.iter().map(|s| s.as_str())),
            EntryRecord::from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn upsert(&self, id: &str, fields: &EntryFields) -> Result<()> {
        let columns = fields.columns();
        let conn = self.conn();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM media WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;

        let mut values = vec![Value::Text(id.to_string())];
        let sql = if exists {
            if columns.is_empty() {
                return Ok(());
            }
            let assignments = columns
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{name} = ?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            format!("UPDATE media SET {assignments} WHERE id = ?1")
        } else {
            let names = std::iter::once("id")
                .chain(columns.iter().map(|(name, _)| *name))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=columns.len() + 1)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO media ({names}) VALUES ({placeholders})")
        };
        values.extend(columns.into_iter().map(|(_, value)| value));

        conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM media WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_page(&self, page: usize, limit: usize) -> Result<Vec<EntryRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM media ORDER BY created_at, id LIMIT ?1 OFFSET ?2"
        );
        let offset = page.saturating_mul(limit);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![limit as i64, offset as i64],
            EntryRecord::from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
