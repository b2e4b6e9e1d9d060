//! Shelf persistence: SQLite-backed list cache and a local implementation of
//! the per-user preference document. Synchronous and small.

#![forbid(unsafe_code)]

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use metrics::histogram;
use tracing::debug;

pub mod cache;
pub mod docs;

pub use cache::{ListCache, MemoryListCache, SqliteListCache};
pub use docs::SqliteDocumentStore;

/// Open (or create) the database at `path` with the shared schema.
pub(crate) fn open_db(path: &str) -> Result<rusqlite::Connection> {
    let started = Instant::now();
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
    db.pragma_update(None, "journal_mode", "WAL").ok();
    db.pragma_update(None, "synchronous", "NORMAL").ok();
    db.busy_timeout(std::time::Duration::from_secs(2)).ok();
    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS list_cache (
            key       TEXT PRIMARY KEY,
            payload   BLOB NOT NULL,
            stored_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_docs (
            user  TEXT PRIMARY KEY,
            doc   TEXT NOT NULL
        );",
    )
    .context("creating shelf tables")?;
    histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
    debug!(path, "persist: opened");
    Ok(db)
}

pub fn maybe_compress(raw: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("SHELF_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(raw, lvl).unwrap_or_else(|_| raw.to_vec());
    }
    raw.to_vec()
}

/// Inverse of `maybe_compress`; plain blobs written without the feature pass through.
pub fn maybe_decompress(blob: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return de;
        }
    }
    blob.to_vec()
}

#[cfg(test)]
pub(crate) fn temp_db(tag: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("shelf-{}-{}.db", tag, nanos)).to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_round_trips_plain_bytes() {
        let raw = br#"[{"id":1,"name":"Portal"}]"#;
        assert_eq!(maybe_decompress(&maybe_compress(raw)), raw.to_vec());
    }

    #[test]
    fn open_creates_missing_parent_dir() {
        let dir = std::env::temp_dir().join(format!("shelf-dir-{}", std::process::id()));
        let path = dir.join("nested").join("shelf.db");
        let _ = std::fs::remove_dir_all(&dir);
        open_db(&path.to_string_lossy()).unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
