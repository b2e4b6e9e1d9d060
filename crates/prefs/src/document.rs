//! Remote document store seam. One document per user, shaped
//! `{"likedItems": [id, ...]}`, mutated by atomic array-union/removal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shelf_core::{ItemId, LikedSet, ShelfError, ShelfResult, UserId};
use tokio::sync::broadcast;
use tracing::debug;

/// Serialized form of the per-user document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(default)]
    pub liked_items: Vec<ItemId>,
}

impl From<&LikedSet> for UserDocument {
    fn from(s: &LikedSet) -> Self { Self { liked_items: s.to_vec() } }
}

impl From<UserDocument> for LikedSet {
    fn from(d: UserDocument) -> Self { d.liked_items.into_iter().collect() }
}

/// Initial document state plus every later commit, in commit order.
/// `None` means the document does not exist.
pub struct DocumentListener {
    pub initial: Option<LikedSet>,
    pub changes: broadcast::Receiver<Option<LikedSet>>,
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full document, or `None` when not found.
    async fn get(&self, user: &UserId) -> ShelfResult<Option<LikedSet>>;

    /// Create or overwrite the document.
    async fn set(&self, user: &UserId, liked: &LikedSet) -> ShelfResult<()>;

    /// Atomic array-union of one id. Fails when the document is missing.
    async fn array_union(&self, user: &UserId, id: ItemId) -> ShelfResult<()>;

    /// Atomic array-removal of one id. Fails when the document is missing.
    async fn array_remove(&self, user: &UserId, id: ItemId) -> ShelfResult<()>;

    /// Subscribe to the document. Subscription happens before the initial
    /// read, so a concurrent commit is delivered at least once.
    async fn listen(&self, user: &UserId) -> ShelfResult<DocumentListener>;
}

/// Per-user commit fan-out shared by store backends.
#[derive(Default)]
pub struct CommitHub {
    map: Mutex<HashMap<UserId, broadcast::Sender<Option<LikedSet>>>>,
}

impl CommitHub {
    const CAP: usize = 64;

    pub fn subscribe(&self, user: &UserId) -> broadcast::Receiver<Option<LikedSet>> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(user.clone()).or_insert_with(|| broadcast::channel(Self::CAP).0).subscribe()
    }

    pub fn publish(&self, user: &UserId, state: Option<LikedSet>) {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = map.get(user) {
            // no receivers left is fine
            let _ = tx.send(state);
        }
    }
}

/// In-process document store with commit notifications and fault injection.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<UserId, LikedSet>>,
    hub: CommitHub,
    fail_writes: AtomicUsize,
    write_delay_ms: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_document(self, user: &UserId, liked: LikedSet) -> Self {
        self.docs().insert(user.clone(), liked);
        self
    }

    /// Make the next `n` mutations fail with `StoreWrite`.
    pub fn fail_next_writes(&self, n: usize) { self.fail_writes.store(n, Ordering::SeqCst); }

    pub fn set_write_delay(&self, d: Duration) {
        self.write_delay_ms.store(d.as_millis() as u64, Ordering::SeqCst);
    }

    /// Mutations attempted so far (failed ones included).
    pub fn writes(&self) -> usize { self.writes.load(Ordering::SeqCst) }

    pub fn document(&self, user: &UserId) -> Option<LikedSet> { self.docs().get(user).cloned() }

    /// Replace the document as another device would, notifying listeners.
    pub fn remote_replace(&self, user: &UserId, liked: LikedSet) {
        self.docs().insert(user.clone(), liked.clone());
        self.hub.publish(user, Some(liked));
    }

    fn docs(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, LikedSet>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn mutate(&self, user: &UserId, op: &str, f: impl FnOnce(&mut HashMap<UserId, LikedSet>) -> ShelfResult<()>) -> ShelfResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(user = %user, op, "docstore: injected write failure");
            return Err(ShelfError::StoreWrite(format!("{} rejected by store", op)));
        }
        let state = {
            let mut docs = self.docs();
            f(&mut docs)?;
            docs.get(user).cloned()
        };
        self.hub.publish(user, state);
        Ok(())
    }
}

fn missing(user: &UserId) -> ShelfError { ShelfError::StoreWrite(format!("document for {} not found", user)) }

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, user: &UserId) -> ShelfResult<Option<LikedSet>> { Ok(self.document(user)) }

    async fn set(&self, user: &UserId, liked: &LikedSet) -> ShelfResult<()> {
        let liked = liked.clone();
        self.mutate(user, "set", move |docs| {
            docs.insert(user.clone(), liked);
            Ok(())
        })
        .await
    }

    async fn array_union(&self, user: &UserId, id: ItemId) -> ShelfResult<()> {
        self.mutate(user, "array_union", |docs| {
            docs.get_mut(user).ok_or_else(|| missing(user))?.insert(id);
            Ok(())
        })
        .await
    }

    async fn array_remove(&self, user: &UserId, id: ItemId) -> ShelfResult<()> {
        self.mutate(user, "array_remove", |docs| {
            docs.get_mut(user).ok_or_else(|| missing(user))?.remove(id);
            Ok(())
        })
        .await
    }

    async fn listen(&self, user: &UserId) -> ShelfResult<DocumentListener> {
        let changes = self.hub.subscribe(user);
        Ok(DocumentListener { initial: self.document(user), changes })
    }
}
