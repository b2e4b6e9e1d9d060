//! Shelf façade for frontends (CLI today).
//!
//! Everything is injected: a catalog client, a list cache and a document
//! store. A session without a user can browse the catalog; user-scoped
//! operations fail with `NotAuthenticated` before touching any backend.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use shelf_catalog::CatalogClient;
use shelf_core::{CancelHandle, FetchResult, ItemDetail, ItemId, LikedSet, ListFilter, Settings, ShelfError, ShelfResult, StreamHandle, UserId};
use shelf_fetch::DetailFetchCoordinator;
use shelf_persist::ListCache;
use shelf_prefs::{DocumentStore, LikeToggleController, PreferenceStore, RemotePreferenceStore, ToggleNotice};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub mod favorites;
pub mod pipeline;

pub use favorites::FavoritesFeed;
pub use pipeline::{CatalogListPipeline, ListUpdate};

/// Backends a session is wired from.
#[derive(Clone)]
pub struct SessionDeps {
    pub catalog: Arc<dyn CatalogClient>,
    pub cache: Arc<dyn ListCache>,
    pub docs: Arc<dyn DocumentStore>,
}

/// User-scoped half of a session; absent when nobody is signed in.
struct Signed {
    user: UserId,
    prefs: Arc<dyn PreferenceStore>,
    toggles: LikeToggleController,
}

pub struct Session {
    pipeline: CatalogListPipeline,
    fetch: DetailFetchCoordinator,
    signed: Option<Signed>,
    notices: Mutex<Option<mpsc::UnboundedReceiver<ToggleNotice>>>,
    // keeps the toggle controller reconciled with the liked feed
    follow: Mutex<Option<CancelHandle>>,
}

impl Session {
    pub fn new(deps: SessionDeps, user: Option<UserId>, settings: &Settings) -> Self {
        let fetch = DetailFetchCoordinator::new(deps.catalog.clone(), settings.fetch_concurrency);
        let pipeline = CatalogListPipeline::new(deps.catalog.clone(), deps.cache);
        let Some(user) = user else {
            return Self { pipeline, fetch, signed: None, notices: Mutex::new(None), follow: Mutex::new(None) };
        };
        let prefs: Arc<dyn PreferenceStore> = Arc::new(RemotePreferenceStore::new(deps.docs, user.clone()));
        let pipeline = pipeline.with_prefs(prefs.clone());
        let (toggles, rx) = LikeToggleController::new(prefs.clone());
        let signed = Some(Signed { user, prefs, toggles });
        let notices = Some(rx);
        Self { pipeline, fetch, signed, notices: Mutex::new(notices), follow: Mutex::new(None) }
    }

    /// Create the user's document if needed, prime the liked snapshot and
    /// start feeding remote changes into the toggle controller.
    /// Failures are logged; browsing keeps working without them.
    pub async fn bootstrap(&self) {
        let Some(s) = &self.signed else { return; };
        let t0 = Instant::now();
        if let Err(e) = s.prefs.ensure_initialized(LikedSet::new()).await {
            warn!(user = %s.user, error = %e, "session: initialize document failed");
        }
        match s.prefs.read().await {
            Ok(liked) => info!(user = %s.user, liked = liked.len(), took_ms = %t0.elapsed().as_millis(), "session: ready"),
            Err(e) => warn!(user = %s.user, error = %e, "session: initial read failed"),
        }
        match s.prefs.subscribe().await {
            Ok(feed) => {
                let handle = s.toggles.follow(feed);
                if let Some(old) = lock(&self.follow).replace(handle) {
                    old.cancel();
                }
            }
            Err(e) => warn!(user = %s.user, error = %e, "session: liked feed unavailable"),
        }
    }

    fn signed(&self) -> ShelfResult<&Signed> { self.signed.as_ref().ok_or(ShelfError::NotAuthenticated) }

    pub fn user(&self) -> ShelfResult<&UserId> { self.signed().map(|s| &s.user) }

    pub fn refresh(&self, filter: ListFilter) -> StreamHandle<ListUpdate> { self.pipeline.refresh(filter) }

    pub async fn details(&self, ids: impl IntoIterator<Item = ItemId>) -> FetchResult<ItemDetail> {
        self.fetch.fetch_details(ids).await
    }

    /// Against the last known liked set; no I/O.
    pub fn is_liked(&self, id: ItemId) -> ShelfResult<bool> { Ok(self.signed()?.prefs.current().contains(id)) }

    pub async fn favorites(&self) -> ShelfResult<FavoritesFeed> {
        let feed = self.signed()?.prefs.subscribe().await?;
        Ok(favorites::spawn_favorites(feed, self.fetch.clone()))
    }

    pub fn toggles(&self) -> ShelfResult<&LikeToggleController> { self.signed().map(|s| &s.toggles) }

    /// Toggle notices; handed out once.
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<ToggleNotice>> { lock(&self.notices).take() }

    /// One-shot like/unlike for headless callers: sync the shown state with the
    /// store, issue the gesture and wait for its outcome. `None` when the item
    /// was already in the desired state.
    pub async fn set_liked(&self, id: ItemId, liked: bool) -> ShelfResult<Option<ToggleNotice>> {
        let s = self.signed()?;
        let current = s.prefs.read().await?;
        s.toggles.render(id, current.contains(id));
        let Some(write) = s.toggles.on_toggle(id, liked) else {
            return Ok(None);
        };
        write.await.map_err(|e| ShelfError::Internal(e.to_string()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(follow) = lock(&self.follow).take() {
            follow.cancel();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }
