//! Cache-then-network list refresh.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use shelf_catalog::CatalogClient;
use shelf_core::{CacheEntry, CancelHandle, LikedSet, ListFilter, RenderedList, StreamHandle};
use shelf_persist::ListCache;
use shelf_prefs::PreferenceStore;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One publication of a refresh. `Cached` (if any) always comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListUpdate {
    Cached(RenderedList),
    Fresh(RenderedList),
}

impl ListUpdate {
    pub fn list(&self) -> &RenderedList {
        match self {
            Self::Cached(l) | Self::Fresh(l) => l,
        }
    }

    pub fn into_list(self) -> RenderedList {
        match self {
            Self::Cached(l) | Self::Fresh(l) => l,
        }
    }

    pub fn is_fresh(&self) -> bool { matches!(self, Self::Fresh(_)) }
}

#[derive(Clone)]
pub struct CatalogListPipeline {
    catalog: Arc<dyn CatalogClient>,
    cache: Arc<dyn ListCache>,
    prefs: Option<Arc<dyn PreferenceStore>>,
}

impl CatalogListPipeline {
    pub fn new(catalog: Arc<dyn CatalogClient>, cache: Arc<dyn ListCache>) -> Self {
        Self { catalog, cache, prefs: None }
    }

    /// Merge rows with this store's liked set. Without one nothing is liked.
    pub fn with_prefs(mut self, prefs: Arc<dyn PreferenceStore>) -> Self {
        self.prefs = Some(prefs);
        self
    }

    fn liked(&self) -> Arc<LikedSet> {
        self.prefs.as_ref().map(|p| p.current()).unwrap_or_default()
    }

    /// Publish the cached rows (read before returning) and then the fresh
    /// rows from a background request. Failures only end the stream early.
    pub fn refresh(&self, filter: ListFilter) -> StreamHandle<ListUpdate> {
        let key = filter.cache_key();
        let (tx, rx) = mpsc::channel::<ListUpdate>(2);
        match self.cache.get(&key) {
            Ok(Some(entry)) => {
                let list = RenderedList::merge(entry.payload, &self.liked());
                debug!(key = %key, items = list.len(), stored_at = %entry.stored_at, "pipeline: cached published");
                // capacity 2 and nothing sent yet
                let _ = tx.try_send(ListUpdate::Cached(list));
            }
            Ok(None) => debug!(key = %key, "pipeline: cache miss"),
            Err(e) => warn!(key = %key, error = %format!("{:#}", e), "pipeline: cache read failed"),
        }
        let me = self.clone();
        let task = tokio::spawn(async move { me.fetch_fresh(filter, key, tx).await });
        StreamHandle { rx, cancel: CancelHandle::new(task) }
    }

    async fn fetch_fresh(&self, filter: ListFilter, key: String, tx: mpsc::Sender<ListUpdate>) {
        let t0 = Instant::now();
        let rows = match self.catalog.list(&filter).await {
            Ok(rows) => rows,
            Err(e) => {
                counter!("pipeline_refresh_failed_total", 1u64);
                warn!(key = %key, error = %e, took_ms = %t0.elapsed().as_millis(), "pipeline: refresh failed; keeping last state");
                return;
            }
        };
        if tx.is_closed() {
            debug!(key = %key, "pipeline: subscriber gone; result dropped");
            return;
        }
        if let Err(e) = self.cache.put(&CacheEntry::new(key.clone(), rows.clone())) {
            warn!(key = %key, error = %format!("{:#}", e), "pipeline: cache write failed");
        }
        let list = RenderedList::merge(rows, &self.liked());
        histogram!("pipeline_refresh_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(key = %key, items = list.len(), images = list.image_urls().len(), took_ms = %t0.elapsed().as_millis(), "pipeline: fresh published");
        let _ = tx.send(ListUpdate::Fresh(list)).await;
    }
}
