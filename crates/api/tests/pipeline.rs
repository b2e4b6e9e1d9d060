#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use shelf_api::{CatalogListPipeline, ListUpdate};
use shelf_catalog::MockCatalog;
use shelf_core::{CacheEntry, GenreId, ItemId, ItemSummary, LikedSet, ListFilter, StreamHandle, UserId};
use shelf_persist::{ListCache, MemoryListCache};
use shelf_prefs::{MemoryDocumentStore, PreferenceStore, RemotePreferenceStore};

fn id(n: u64) -> ItemId { ItemId::new(n).unwrap() }

fn row(n: u64, name: &str) -> ItemSummary {
    ItemSummary { id: id(n), name: name.into(), image_url: format!("https://img.example/{}.jpg", n) }
}

struct BrokenCache;

impl ListCache for BrokenCache {
    fn get(&self, _key: &str) -> anyhow::Result<Option<CacheEntry>> { anyhow::bail!("disk unavailable") }
    fn put(&self, _entry: &CacheEntry) -> anyhow::Result<()> { anyhow::bail!("disk full") }
    fn remove(&self, _key: &str) -> anyhow::Result<()> { Ok(()) }
}

#[tokio::test]
async fn cached_rows_come_before_fresh_rows() {
    let filter = ListFilter::Featured;
    let cache = Arc::new(MemoryListCache::new().with_entry(CacheEntry::new(filter.cache_key(), vec![row(10, "Old")])));
    let catalog = Arc::new(
        MockCatalog::new()
            .with_list(&filter, vec![row(10, "New"), row(11, "Extra")])
            .with_list_delay(Duration::from_millis(20)),
    );
    let pipeline = CatalogListPipeline::new(catalog.clone(), cache.clone());

    let mut updates = pipeline.refresh(filter.clone());
    match updates.recv().await {
        Some(ListUpdate::Cached(list)) => assert_eq!(list.names(), vec!["Old"]),
        other => panic!("expected cached rows first, got {:?}", other),
    }
    match updates.recv().await {
        Some(ListUpdate::Fresh(list)) => {
            assert_eq!(list.names(), vec!["New", "Extra"]);
            assert_eq!(list.image_urls().len(), 2);
        }
        other => panic!("expected fresh rows, got {:?}", other),
    }
    assert!(updates.recv().await.is_none());

    let stored = cache.get(&filter.cache_key()).unwrap().unwrap();
    assert_eq!(stored.payload, vec![row(10, "New"), row(11, "Extra")]);
    assert_eq!(catalog.list_calls(), 1);
}

#[tokio::test]
async fn empty_cache_publishes_only_fresh() {
    let filter = ListFilter::Genre(GenreId(4));
    let catalog = Arc::new(MockCatalog::new().with_list(&filter, vec![row(1, "Doom")]));
    let pipeline = CatalogListPipeline::new(catalog, Arc::new(MemoryListCache::new()));
    let mut updates = pipeline.refresh(filter);
    let first = updates.recv().await.unwrap();
    assert!(first.is_fresh());
    assert_eq!(first.list().len(), 1);
    assert!(updates.recv().await.is_none());
}

#[tokio::test]
async fn network_failure_keeps_last_good_state() {
    let filter = ListFilter::NewReleases;
    let cache = Arc::new(MemoryListCache::new().with_entry(CacheEntry::new(filter.cache_key(), vec![row(5, "Cached")])));
    // nothing configured: the mock answers with a network error
    let pipeline = CatalogListPipeline::new(Arc::new(MockCatalog::new()), cache.clone());

    let mut updates = pipeline.refresh(filter.clone());
    assert!(matches!(updates.recv().await, Some(ListUpdate::Cached(_))));
    assert!(updates.recv().await.is_none());
    assert_eq!(cache.get(&filter.cache_key()).unwrap().unwrap().payload, vec![row(5, "Cached")]);
}

#[tokio::test]
async fn cache_errors_do_not_block_fresh_rows() {
    let filter = ListFilter::search("portal", None);
    let catalog = Arc::new(MockCatalog::new().with_list(&filter, vec![row(400, "Portal")]));
    let pipeline = CatalogListPipeline::new(catalog, Arc::new(BrokenCache));
    let mut updates = pipeline.refresh(filter);
    let only = updates.recv().await.unwrap();
    assert!(only.is_fresh());
    assert_eq!(only.into_list().names(), vec!["Portal"]);
}

#[tokio::test]
async fn rows_carry_liked_flags() {
    let user = UserId::new("u").unwrap();
    let docs = Arc::new(MemoryDocumentStore::new().with_document(&user, [id(11)].into_iter().collect::<LikedSet>()));
    let prefs = Arc::new(RemotePreferenceStore::new(docs, user));
    prefs.read().await.unwrap();

    let filter = ListFilter::Featured;
    let catalog = Arc::new(MockCatalog::new().with_list(&filter, vec![row(10, "New"), row(11, "Extra")]));
    let pipeline = CatalogListPipeline::new(catalog, Arc::new(MemoryListCache::new())).with_prefs(prefs);
    let list = pipeline.refresh(filter).recv().await.unwrap().into_list();
    assert_eq!(list.items.iter().map(|i| i.liked).collect::<Vec<_>>(), vec![false, true]);
}

#[tokio::test]
async fn cancelled_refresh_publishes_nothing_fresh() {
    let filter = ListFilter::Featured;
    let cache = Arc::new(MemoryListCache::new());
    let catalog = Arc::new(
        MockCatalog::new().with_list(&filter, vec![row(1, "Late")]).with_list_delay(Duration::from_millis(80)),
    );
    let pipeline = CatalogListPipeline::new(catalog, cache.clone());
    let StreamHandle { mut rx, cancel } = pipeline.refresh(filter.clone());
    cancel.cancel();
    assert!(rx.recv().await.is_none());
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get(&filter.cache_key()).unwrap().is_none());
}
