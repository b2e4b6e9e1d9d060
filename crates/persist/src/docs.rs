//! Local preference documents in SQLite, for running without a remote
//! document service. Commits made through this handle reach its listeners;
//! other processes writing the same file are not observed.

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use metrics::counter;
use rusqlite::OptionalExtension;
use shelf_core::{ItemId, LikedSet, ShelfError, ShelfResult, UserId};
use shelf_prefs::{CommitHub, DocumentListener, DocumentStore, UserDocument};
use tracing::debug;

use crate::open_db;

pub struct SqliteDocumentStore {
    db: Mutex<rusqlite::Connection>,
    hub: CommitHub,
}

impl SqliteDocumentStore {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self { db: Mutex::new(open_db(path)?), hub: CommitHub::default() })
    }

    fn db(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, user: &UserId) -> Result<Option<LikedSet>> {
        let doc: Option<String> = self
            .db()
            .query_row("SELECT doc FROM user_docs WHERE user = ?1", [user.as_str()], |r| r.get(0))
            .optional()?;
        match doc {
            Some(raw) => {
                let doc: UserDocument = serde_json::from_str(&raw).context("decoding user document")?;
                Ok(Some(doc.into()))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write inside one transaction. Fails when the row is missing.
    fn update(&self, user: &UserId, op: &'static str, f: impl FnOnce(&mut LikedSet) -> bool) -> Result<LikedSet> {
        let mut db = self.db();
        let tx = db.transaction()?;
        let raw: Option<String> = tx
            .query_row("SELECT doc FROM user_docs WHERE user = ?1", [user.as_str()], |r| r.get(0))
            .optional()?;
        let Some(raw) = raw else {
            anyhow::bail!("document for {} not found", user);
        };
        let doc: UserDocument = serde_json::from_str(&raw).context("decoding user document")?;
        let mut set = LikedSet::from(doc);
        let changed = f(&mut set);
        if changed {
            let body = serde_json::to_string(&UserDocument::from(&set))?;
            tx.execute("UPDATE user_docs SET doc = ?2 WHERE user = ?1", (user.as_str(), body))?;
        }
        tx.commit()?;
        debug!(user = %user, op, changed, "docstore: committed");
        Ok(set)
    }
}

fn write_err(e: anyhow::Error) -> ShelfError {
    counter!("docstore_write_failed_total", 1u64);
    ShelfError::StoreWrite(format!("{:#}", e))
}

#[async_trait::async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, user: &UserId) -> ShelfResult<Option<LikedSet>> {
        self.load(user).map_err(|e| ShelfError::Internal(format!("{:#}", e)))
    }

    async fn set(&self, user: &UserId, liked: &LikedSet) -> ShelfResult<()> {
        let body = serde_json::to_string(&UserDocument::from(liked)).map_err(|e| ShelfError::Internal(e.to_string()))?;
        self.db()
            .execute(
                "INSERT INTO user_docs(user, doc) VALUES (?1, ?2)
                 ON CONFLICT(user) DO UPDATE SET doc = excluded.doc",
                (user.as_str(), body),
            )
            .map_err(|e| write_err(e.into()))?;
        self.hub.publish(user, Some(liked.clone()));
        Ok(())
    }

    async fn array_union(&self, user: &UserId, id: ItemId) -> ShelfResult<()> {
        let set = self.update(user, "array_union", |s| s.insert(id)).map_err(write_err)?;
        self.hub.publish(user, Some(set));
        Ok(())
    }

    async fn array_remove(&self, user: &UserId, id: ItemId) -> ShelfResult<()> {
        let set = self.update(user, "array_remove", |s| s.remove(id)).map_err(write_err)?;
        self.hub.publish(user, Some(set));
        Ok(())
    }

    async fn listen(&self, user: &UserId) -> ShelfResult<DocumentListener> {
        let changes = self.hub.subscribe(user);
        let initial = self.get(user).await?;
        Ok(DocumentListener { initial, changes })
    }
}
