#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use shelf_api::{FavoritesFeed, Session, SessionDeps};
use shelf_catalog::MockCatalog;
use shelf_core::{ItemDetail, ItemId, LikedSet, ListFilter, Settings, ShelfError, UserId};
use shelf_persist::MemoryListCache;
use shelf_prefs::{MemoryDocumentStore, ToggleNotice};

fn id(n: u64) -> ItemId { ItemId::new(n).unwrap() }
fn user() -> UserId { UserId::new("player-1").unwrap() }

fn catalog() -> Arc<MockCatalog> {
    Arc::new(
        MockCatalog::new()
            .with_item(id(1), "Alpha")
            .with_item(id(2), "Beta")
            .with_item(id(3), "Gamma")
            .with_list(&ListFilter::Featured, Vec::new()),
    )
}

fn session(catalog: Arc<MockCatalog>, docs: Arc<MemoryDocumentStore>, user: Option<UserId>) -> Session {
    session_with(catalog, docs, user, &Settings::default())
}

fn session_with(catalog: Arc<MockCatalog>, docs: Arc<MemoryDocumentStore>, user: Option<UserId>, settings: &Settings) -> Session {
    let deps = SessionDeps { catalog, cache: Arc::new(MemoryListCache::new()), docs };
    Session::new(deps, user, settings)
}

fn liked(ids: &[u64]) -> LikedSet { ids.iter().copied().map(id).collect() }

async fn next_matching(feed: &mut FavoritesFeed, f: impl Fn(&[ItemDetail]) -> bool) -> Vec<ItemDetail> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let items = feed.recv().await.expect("favorites feed ended");
            if f(&items) {
                return items;
            }
        }
    })
    .await
    .expect("no matching favorites delivery")
}

#[tokio::test]
async fn signed_out_session_rejects_user_operations() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let s = session(catalog(), docs.clone(), None);
    assert_eq!(s.user().err(), Some(ShelfError::NotAuthenticated));
    assert_eq!(s.is_liked(id(1)).err(), Some(ShelfError::NotAuthenticated));
    assert!(matches!(s.favorites().await, Err(ShelfError::NotAuthenticated)));
    assert!(matches!(s.set_liked(id(1), true).await, Err(ShelfError::NotAuthenticated)));
    assert!(s.toggles().is_err());
    assert!(s.take_notices().is_none());
    assert_eq!(docs.writes(), 0);

    // browsing still works
    s.bootstrap().await;
    assert!(s.refresh(ListFilter::Featured).recv().await.unwrap().is_fresh());
    assert_eq!(s.details([id(1), id(2)]).await.ok().len(), 2);
}

#[tokio::test]
async fn bootstrap_creates_document_once() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let s = session(catalog(), docs.clone(), Some(user()));
    s.bootstrap().await;
    assert_eq!(docs.document(&user()), Some(LikedSet::new()));
    s.bootstrap().await;
    assert_eq!(docs.writes(), 1);
}

#[tokio::test]
async fn bootstrap_failure_is_not_fatal() {
    let docs = Arc::new(MemoryDocumentStore::new());
    docs.fail_next_writes(1);
    let s = session(catalog(), docs.clone(), Some(user()));
    s.bootstrap().await;
    assert!(docs.document(&user()).is_none());
    assert!(!s.is_liked(id(1)).unwrap());
}

#[tokio::test]
async fn set_liked_reports_outcome() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let s = session(catalog(), docs.clone(), Some(user()));
    s.bootstrap().await;

    assert_eq!(s.set_liked(id(2), true).await.unwrap(), Some(ToggleNotice::Added(id(2))));
    assert!(s.is_liked(id(2)).unwrap());
    assert_eq!(s.set_liked(id(2), true).await.unwrap(), None);

    docs.fail_next_writes(1);
    match s.set_liked(id(2), false).await.unwrap() {
        Some(ToggleNotice::Failed { reverted_to, .. }) => assert!(reverted_to),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(s.is_liked(id(2)).unwrap());
    assert!(docs.document(&user()).unwrap().contains(id(2)));
}

#[tokio::test]
async fn favorites_follow_the_liked_set() {
    let docs = Arc::new(MemoryDocumentStore::new().with_document(&user(), [id(1), id(3)].into_iter().collect()));
    let s = session(catalog(), docs.clone(), Some(user()));
    let mut feed = s.favorites().await.unwrap();

    let first = next_matching(&mut feed, |v| v.len() == 2).await;
    assert_eq!(first.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), vec!["Alpha", "Gamma"]);

    s.set_liked(id(2), true).await.unwrap();
    let second = next_matching(&mut feed, |v| v.len() == 3).await;
    assert_eq!(second.iter().map(|d| d.id).collect::<Vec<_>>(), vec![id(1), id(2), id(3)]);
    feed.cancel.cancel();
}

#[tokio::test]
async fn empty_favorites_need_no_network() {
    let catalog = catalog();
    let docs = Arc::new(MemoryDocumentStore::new().with_document(&user(), LikedSet::new()));
    let s = session(catalog.clone(), docs, Some(user()));
    let mut feed = s.favorites().await.unwrap();
    assert!(feed.recv().await.unwrap().is_empty());
    assert_eq!(catalog.detail_calls(), 0);
}

#[tokio::test]
async fn favorites_skip_items_that_fail_to_load() {
    let docs = Arc::new(MemoryDocumentStore::new().with_document(&user(), [id(1), id(99)].into_iter().collect()));
    let s = session(catalog(), docs, Some(user()));
    let mut feed = s.favorites().await.unwrap();
    let items = feed.recv().await.unwrap();
    assert_eq!(items.iter().map(|d| d.id).collect::<Vec<_>>(), vec![id(1)]);
}

#[tokio::test]
async fn toggles_emit_notices_and_track_remote_changes() {
    let docs = Arc::new(MemoryDocumentStore::new().with_document(&user(), liked(&[1])));
    let s = session(catalog(), docs.clone(), Some(user()));
    s.bootstrap().await;
    let mut notices = s.take_notices().unwrap();
    assert!(s.take_notices().is_none());

    let toggles = s.toggles().unwrap();
    toggles.render(id(1), true);
    toggles.on_toggle(id(3), true).unwrap().await.unwrap();
    assert_eq!(notices.recv().await, Some(ToggleNotice::Added(id(3))));

    // another device drops item 1
    docs.remote_replace(&user(), liked(&[3]));
    for _ in 0..100 {
        if !toggles.rendered(id(1)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!toggles.rendered(id(1)));
    assert!(toggles.rendered(id(3)));
    assert_eq!(docs.writes(), 1);
}

#[tokio::test]
async fn superseded_favorites_batch_is_never_published() {
    let catalog = Arc::new(
        MockCatalog::new()
            .with_item(id(1), "Alpha")
            .with_item(id(2), "Beta")
            .with_item(id(3), "Gamma")
            .with_detail_delay_for(id(1), Duration::from_millis(200))
            .with_detail_delay_for(id(3), Duration::from_millis(200)),
    );
    let docs = Arc::new(MemoryDocumentStore::new().with_document(&user(), liked(&[1, 3])));
    let settings = Settings { fetch_concurrency: 1, ..Settings::default() };
    let s = session_with(catalog.clone(), docs.clone(), Some(user()), &settings);
    let mut feed = s.favorites().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    docs.remote_replace(&user(), liked(&[2]));

    let first = tokio::time::timeout(Duration::from_secs(2), feed.recv()).await.unwrap().unwrap();
    assert_eq!(first.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), vec!["Beta"]);

    // long enough for the stale batch to have finished had it kept going
    let late = tokio::time::timeout(Duration::from_millis(500), feed.recv()).await;
    assert!(late.is_err(), "stale batch published {:?}", late);
    assert!(catalog.detail_calls() <= 2, "detail calls: {}", catalog.detail_calls());
    feed.cancel.cancel();
}
