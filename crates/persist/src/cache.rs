//! Last-response cache for catalog lists, keyed by `ListFilter::cache_key`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use metrics::{counter, histogram};
use rusqlite::OptionalExtension;
use shelf_core::{CacheEntry, ItemSummary};
use tracing::debug;

use crate::{maybe_compress, maybe_decompress, open_db};

/// Key-value store of the last successful list per filter. Reads are
/// synchronous so cached rows can be shown before any network I/O.
pub trait ListCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    /// Overwrites any previous entry for the key wholesale.
    fn put(&self, entry: &CacheEntry) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub struct SqliteListCache {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteListCache {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self { db: Mutex::new(open_db(path)?) })
    }

    fn db(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ListCache for SqliteListCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let started = Instant::now();
        let row: Option<(Vec<u8>, i64)> = self
            .db()
            .query_row("SELECT payload, stored_at FROM list_cache WHERE key = ?1", [key], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .optional()
            .with_context(|| format!("reading cache entry {}", key))?;
        let Some((blob, ms)) = row else {
            counter!("cache_miss_total", 1u64);
            return Ok(None);
        };
        let payload: Vec<ItemSummary> = serde_json::from_slice(&maybe_decompress(&blob))
            .with_context(|| format!("decoding cache entry {}", key))?;
        let stored_at = Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now);
        histogram!("cache_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(key, rows = payload.len(), "cache: hit");
        Ok(Some(CacheEntry { key: key.to_string(), payload, stored_at }))
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        let started = Instant::now();
        let blob = maybe_compress(&serde_json::to_vec(&entry.payload)?);
        self.db()
            .execute(
                "INSERT INTO list_cache(key, payload, stored_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, stored_at = excluded.stored_at",
                (&entry.key, &blob, entry.stored_at.timestamp_millis()),
            )
            .with_context(|| format!("writing cache entry {}", entry.key))?;
        histogram!("cache_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("cache_put_total", 1u64);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db().execute("DELETE FROM list_cache WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Process-local cache; also handy as a test double.
#[derive(Default)]
pub struct MemoryListCache {
    map: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryListCache {
    pub fn new() -> Self { Self::default() }

    pub fn with_entry(self, entry: CacheEntry) -> Self {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).insert(entry.key.clone(), entry);
        self
    }
}

impl ListCache for MemoryListCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.map.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}
