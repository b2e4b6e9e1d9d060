//! Shelf preferences: the user's liked set kept in a remote document, a live
//! feed of its full state, and the toggle controller that writes to it.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use metrics::counter;
use shelf_core::{CancelHandle, ItemId, LikedSet, ShelfError, ShelfResult, StreamHandle, UserId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub mod document;
pub mod toggle;

pub use document::{CommitHub, DocumentListener, DocumentStore, MemoryDocumentStore, UserDocument};
pub use toggle::{LikeToggleController, ToggleNotice, ToggleState};

/// Live liked-set feed. Every delivery is the entire current set.
pub type LikedFeed = StreamHandle<LikedSet>;

/// User-scoped access to the liked set.
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Point-in-time snapshot. A missing document reads as empty.
    async fn read(&self) -> ShelfResult<LikedSet>;

    /// Atomic set-union. Adding a present id is a no-op remotely.
    async fn add(&self, id: ItemId) -> ShelfResult<()>;

    /// Atomic set-removal. Removing an absent id is a no-op remotely.
    async fn remove(&self, id: ItemId) -> ShelfResult<()>;

    /// Initial state once, then the full set after every remote change,
    /// including this client's own writes. Duplicates may be delivered.
    async fn subscribe(&self) -> ShelfResult<LikedFeed>;

    /// Create the document with `default` when it does not exist yet.
    async fn ensure_initialized(&self, default: LikedSet) -> ShelfResult<()>;

    /// Last known set (from reads, acknowledged writes or the feed).
    fn current(&self) -> Arc<LikedSet>;
}

/// `PreferenceStore` over a `DocumentStore` backend for one user.
pub struct RemotePreferenceStore {
    docs: Arc<dyn DocumentStore>,
    user: UserId,
    snap: Arc<ArcSwap<LikedSet>>,
}

impl RemotePreferenceStore {
    pub fn new(docs: Arc<dyn DocumentStore>, user: UserId) -> Self {
        Self { docs, user, snap: Arc::new(ArcSwap::from_pointee(LikedSet::new())) }
    }

    pub fn user(&self) -> &UserId { &self.user }

    fn write_failed(&self, op: &'static str, id: ItemId, e: ShelfError) -> ShelfError {
        warn!(user = %self.user, %id, op, error = %e, "prefs: write failed");
        counter!("prefs_write_failed_total", 1u64, "op" => op);
        match e {
            ShelfError::StoreWrite(_) | ShelfError::NotAuthenticated => e,
            other => ShelfError::StoreWrite(other.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl PreferenceStore for RemotePreferenceStore {
    async fn read(&self) -> ShelfResult<LikedSet> {
        let set = self.docs.get(&self.user).await?.unwrap_or_default();
        self.snap.store(Arc::new(set.clone()));
        debug!(user = %self.user, liked = set.len(), "prefs: read");
        Ok(set)
    }

    async fn add(&self, id: ItemId) -> ShelfResult<()> {
        self.docs.array_union(&self.user, id).await.map_err(|e| self.write_failed("add", id, e))?;
        self.snap.rcu(|cur| {
            let mut next = (**cur).clone();
            next.insert(id);
            next
        });
        counter!("prefs_write_total", 1u64, "op" => "add");
        info!(user = %self.user, %id, "prefs: added");
        Ok(())
    }

    async fn remove(&self, id: ItemId) -> ShelfResult<()> {
        self.docs.array_remove(&self.user, id).await.map_err(|e| self.write_failed("remove", id, e))?;
        self.snap.rcu(|cur| {
            let mut next = (**cur).clone();
            next.remove(id);
            next
        });
        counter!("prefs_write_total", 1u64, "op" => "remove");
        info!(user = %self.user, %id, "prefs: removed");
        Ok(())
    }

    async fn subscribe(&self) -> ShelfResult<LikedFeed> {
        let DocumentListener { initial, mut changes } = self.docs.listen(&self.user).await?;
        let (tx, rx) = mpsc::channel::<LikedSet>(16);
        let docs = self.docs.clone();
        let user = self.user.clone();
        let snap = self.snap.clone();
        let task = tokio::spawn(async move {
            let t0 = Instant::now();
            let mut delivered = 0usize;
            let mut next = Some(initial.unwrap_or_default());
            loop {
                if let Some(set) = next.take() {
                    snap.store(Arc::new(set.clone()));
                    if tx.send(set).await.is_err() { break; }
                    delivered += 1;
                }
                match changes.recv().await {
                    Ok(state) => next = Some(state.unwrap_or_default()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // deliveries are full sets: re-read instead of replaying
                        debug!(user = %user, skipped, "prefs: feed lagged; re-reading");
                        match docs.get(&user).await {
                            Ok(state) => next = Some(state.unwrap_or_default()),
                            Err(e) => warn!(user = %user, error = %e, "prefs: re-read after lag failed"),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!(user = %user, delivered, ran_ms = %t0.elapsed().as_millis(), "prefs: feed ended");
        });
        Ok(StreamHandle { rx, cancel: CancelHandle::new(task) })
    }

    async fn ensure_initialized(&self, default: LikedSet) -> ShelfResult<()> {
        if self.docs.get(&self.user).await?.is_some() {
            return Ok(());
        }
        // Racing initializers write identical content; last one wins.
        self.docs.set(&self.user, &default).await?;
        self.snap.store(Arc::new(default));
        info!(user = %self.user, "prefs: document initialized");
        Ok(())
    }

    fn current(&self) -> Arc<LikedSet> { self.snap.load_full() }
}
