//! Embedded Durable Store
//!
//! Keeps entries in a single SQLite table. The connection is opened by
//! `open()` and dropped by `close()` or when the store is dropped, so the
//! handle is released on every path out of the cache.
//!
//! Logical record: (key bytes, provider tag, value, inserted_at, expires_at,
//! size, generation). Timestamps are epoch milliseconds.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::entry::{CacheEntry, EntryMeta};
use super::store::EntryStore;
use crate::digest::{DigestId, DigestProvider};
use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    key BLOB NOT NULL,
    provider INTEGER NOT NULL,
    value BLOB NOT NULL,
    inserted_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    size INTEGER NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (key, provider)
);
CREATE INDEX IF NOT EXISTS idx_entries_expires_at ON entries(expires_at);
";

const META_COLUMNS: &str = "key, provider, size, inserted_at, expires_at, generation";

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    File(PathBuf),
    /// Private in-memory database, gone on close
    Memory,
}

pub struct SqliteStore {
    location: SqliteLocation,
    conn: Mutex<Option<Connection>>,
    count: AtomicU64,
    size: AtomicU64,
}

impl SqliteStore {
    pub fn new(location: SqliteLocation) -> Self {
        Self {
            location,
            conn: Mutex::new(None),
            count: AtomicU64::new(0),
            size: AtomicU64::new(0),
        }
    }

    pub fn open_path(path: impl AsRef<Path>) -> Self {
        Self::new(SqliteLocation::File(path.as_ref().to_path_buf()))
    }

    pub fn in_memory() -> Self {
        Self::new(SqliteLocation::Memory)
    }

    pub fn location(&self) -> &SqliteLocation {
        &self.location
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn label(&self) -> String {
        match &self.location {
            SqliteLocation::File(path) => path.display().to_string(),
            SqliteLocation::Memory => ":memory:".to_string(),
        }
    }

    /// Run `f` with the open connection; counters are only touched inside `f`
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::NotInitialized(self.label()))?;
        f(conn)
    }

    fn apply_insert(&self, new_size: u64, old: Option<&EntryMeta>) {
        match old {
            Some(prev) => {
                self.size.fetch_add(new_size, Ordering::Relaxed);
                self.size.fetch_sub(prev.size, Ordering::Relaxed);
            }
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
                self.size.fetch_add(new_size, Ordering::Relaxed);
            }
        }
    }

    fn apply_remove(&self, removed: &EntryMeta) {
        self.count.fetch_sub(1, Ordering::Relaxed);
        self.size.fetch_sub(removed.size, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("location", &self.location)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Columns of one row before identifier and timestamp validation
struct RawMeta {
    key: Vec<u8>,
    provider: i64,
    size: i64,
    inserted_at: i64,
    expires_at: i64,
    generation: i64,
}

impl RawMeta {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            provider: row.get(1)?,
            size: row.get(2)?,
            inserted_at: row.get(3)?,
            expires_at: row.get(4)?,
            generation: row.get(5)?,
        })
    }

    fn into_meta(self) -> Result<EntryMeta> {
        let tag = u8::try_from(self.provider)
            .map_err(|_| Error::Internal(format!("stored provider tag out of range: {}", self.provider)))?;
        let provider = DigestProvider::from_tag(tag)?;
        Ok(EntryMeta {
            key: DigestId::from_binary(&self.key, provider, None)?,
            size: self.size as u64,
            inserted_at: from_millis(self.inserted_at)?,
            expires_at: from_millis(self.expires_at)?,
            generation: self.generation as u64,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Internal(format!("stored timestamp out of range: {}", ms)))
}

fn probe_in(conn: &Connection, key: &DigestId) -> Result<Option<EntryMeta>> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM entries WHERE key = ?1 AND provider = ?2", META_COLUMNS),
            params![key.as_bytes(), key.provider().tag()],
            RawMeta::from_row,
        )
        .optional()?;
    raw.map(RawMeta::into_meta).transpose()
}

impl EntryStore for SqliteStore {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn open(&self) -> Result<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.location {
            SqliteLocation::File(path) => {
                let conn = Connection::open(path)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn
            }
            SqliteLocation::Memory => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA)?;

        let (count, size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        self.count.store(count as u64, Ordering::Relaxed);
        self.size.store(size as u64, Ordering::Relaxed);

        info!(location = %self.label(), entries = count, bytes = size, "Opened sqlite store");
        *guard = Some(conn);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        self.count.store(0, Ordering::Relaxed);
        self.size.store(0, Ordering::Relaxed);

        conn.close().map_err(|(_, e)| Error::Storage(e))?;
        debug!(location = %self.label(), "Closed sqlite store");
        Ok(())
    }

    fn upsert(&self, entry: CacheEntry) -> Result<Option<EntryMeta>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let old = probe_in(&tx, entry.key())?;
            tx.execute(
                "INSERT OR REPLACE INTO entries
                    (key, provider, value, inserted_at, expires_at, size, generation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.key().as_bytes(),
                    entry.key().provider().tag(),
                    &entry.value[..],
                    entry.meta.inserted_at.timestamp_millis(),
                    entry.meta.expires_at.timestamp_millis(),
                    entry.meta.size as i64,
                    entry.meta.generation as i64,
                ],
            )?;
            tx.commit()?;

            self.apply_insert(entry.meta.size, old.as_ref());
            Ok(old)
        })
    }

    fn fetch(&self, key: &DigestId) -> Result<Option<CacheEntry>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {}, value FROM entries WHERE key = ?1 AND provider = ?2",
                        META_COLUMNS
                    ),
                    params![key.as_bytes(), key.provider().tag()],
                    |row| Ok((RawMeta::from_row(row)?, row.get::<_, Vec<u8>>(6)?)),
                )
                .optional()?;

            row.map(|(raw, value)| {
                Ok(CacheEntry {
                    meta: raw.into_meta()?,
                    value: Bytes::from(value),
                })
            })
            .transpose()
        })
    }

    fn probe(&self, key: &DigestId) -> Result<Option<EntryMeta>> {
        self.with_conn(|conn| probe_in(conn, key))
    }

    fn remove(&self, key: &DigestId) -> Result<Option<EntryMeta>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "DELETE FROM entries WHERE key = ?1 AND provider = ?2 RETURNING {}",
                        META_COLUMNS
                    ),
                    params![key.as_bytes(), key.provider().tag()],
                    RawMeta::from_row,
                )
                .optional()?;

            let removed = raw.map(RawMeta::into_meta).transpose()?;
            if let Some(meta) = &removed {
                self.apply_remove(meta);
            }
            Ok(removed)
        })
    }

    fn remove_generation(&self, key: &DigestId, generation: u64) -> Result<Option<EntryMeta>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "DELETE FROM entries WHERE key = ?1 AND provider = ?2 AND generation = ?3 RETURNING {}",
                        META_COLUMNS
                    ),
                    params![key.as_bytes(), key.provider().tag(), generation as i64],
                    RawMeta::from_row,
                )
                .optional()?;

            let removed = raw.map(RawMeta::into_meta).transpose()?;
            if let Some(meta) = &removed {
                self.apply_remove(meta);
            }
            Ok(removed)
        })
    }

    fn scan(&self) -> Result<Vec<EntryMeta>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM entries", META_COLUMNS))?;
            let rows = stmt.query_map([], RawMeta::from_row)?;

            let mut out = Vec::new();
            for raw in rows {
                out.push(raw?.into_meta()?);
            }
            Ok(out)
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<EntryMeta>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "DELETE FROM entries WHERE expires_at <= ?1 RETURNING {}",
                META_COLUMNS
            ))?;
            let rows = stmt.query_map(params![now.timestamp_millis()], RawMeta::from_row)?;

            let mut raws = Vec::new();
            for raw in rows {
                raws.push(raw?);
            }
            drop(stmt);

            let mut purged = Vec::with_capacity(raws.len());
            for raw in raws {
                let meta = raw.into_meta()?;
                self.apply_remove(&meta);
                purged.push(meta);
            }
            Ok(purged)
        })
    }

    fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn size_bytes(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
