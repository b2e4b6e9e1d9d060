#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use shelf_catalog::MockCatalog;
use shelf_core::{ItemId, ShelfError};
use shelf_fetch::{fetch_details, DetailFetchCoordinator};
use tokio_util::sync::CancellationToken;

fn id(n: u64) -> ItemId { ItemId::new(n).unwrap() }

fn catalog_with(n: u64, delay_ms: u64) -> Arc<MockCatalog> {
    let mut c = MockCatalog::new().with_detail_delay(Duration::from_millis(delay_ms));
    for i in 1..=n {
        c = c.with_item(id(i), &format!("Item {}", i));
    }
    Arc::new(c)
}

#[tokio::test]
async fn empty_input_returns_empty_without_network() {
    let catalog = catalog_with(3, 0);
    let res = fetch_details(catalog.clone(), &BTreeSet::new(), 5).await;
    assert!(res.is_empty());
    assert!(res.ok().is_empty());
    assert!(res.failed().is_empty());
    assert_eq!(catalog.detail_calls(), 0);
}

#[tokio::test]
async fn timeout_on_one_id_does_not_abort_siblings() {
    let catalog = Arc::new(
        MockCatalog::new()
            .with_item(id(1), "Alpha")
            .with_detail_error(id(2), ShelfError::Network("timeout".into()))
            .with_item(id(3), "Gamma"),
    );
    let ids: BTreeSet<_> = [id(1), id(2), id(3)].into_iter().collect();
    let res = fetch_details(catalog.clone(), &ids, 2).await;

    let names: Vec<(u64, &str)> = res.ok().iter().map(|(k, v)| (k.get(), v.name.as_str())).collect();
    assert_eq!(names, vec![(1, "Alpha"), (3, "Gamma")]);
    assert_eq!(res.failed().iter().map(|i| i.get()).collect::<Vec<_>>(), vec![2]);
    assert_eq!(catalog.detail_calls(), 3);
}

#[tokio::test]
async fn in_flight_never_exceeds_limit() {
    for k in 1..=4usize {
        let catalog = catalog_with(12, 15);
        let coord = DetailFetchCoordinator::new(catalog.clone(), k);
        let res = coord.fetch_details((1..=12).map(id)).await;
        assert_eq!(res.ok().len(), 12);
        assert_eq!(catalog.detail_calls(), 12, "each id fetched exactly once");
        assert!(catalog.peak_in_flight() <= k, "k={} peak={}", k, catalog.peak_in_flight());
        assert!(catalog.peak_in_flight() >= 1);
    }
}

#[tokio::test]
async fn zero_limit_is_clamped_to_one() {
    let catalog = catalog_with(4, 5);
    let coord = DetailFetchCoordinator::new(catalog.clone(), 0);
    assert_eq!(coord.limit(), 1);
    let res = coord.fetch_details((1..=4).map(id)).await;
    assert_eq!(res.ok().len(), 4);
    assert_eq!(catalog.peak_in_flight(), 1);
}

#[tokio::test]
async fn every_id_is_accounted_for_exactly_once() {
    // ids 1..=6 exist, 7..=9 are unknown to the catalog
    let catalog = catalog_with(6, 1);
    let ids: BTreeSet<_> = (1..=9).map(id).collect();
    let res = fetch_details(catalog, &ids, 3).await;
    assert_eq!(res.ok().len() + res.failed().len(), ids.len());
    assert!(res.ok().keys().all(|k| !res.failed().contains(k)));
    assert_eq!(res.failed().iter().map(|i| i.get()).collect::<Vec<_>>(), vec![7, 8, 9]);
}

#[tokio::test]
async fn all_failed_is_a_valid_terminal_state() {
    let catalog = Arc::new(MockCatalog::new());
    let res = fetch_details(catalog, &[id(1), id(2)].into_iter().collect(), 5).await;
    assert!(res.ok().is_empty());
    assert_eq!(res.failed().len(), 2);
}

#[tokio::test]
async fn duplicate_ids_collapse() {
    let catalog = catalog_with(2, 0);
    let coord = DetailFetchCoordinator::new(catalog.clone(), 5);
    let res = coord.fetch_details(vec![id(1), id(1), id(2), id(1)]).await;
    assert_eq!(res.attempted(), 2);
    assert_eq!(catalog.detail_calls(), 2);
}

#[tokio::test]
async fn cancelled_batch_discards_results() {
    let catalog = catalog_with(8, 40);
    let coord = DetailFetchCoordinator::new(catalog.clone(), 1);
    let scope = CancellationToken::new();
    let handle = coord.spawn((1..=8).map(id), &scope);
    tokio::time::sleep(Duration::from_millis(60)).await;
    scope.cancel();
    assert!(handle.join().await.is_none());
    // the worker stops picking up ids once cancelled
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(catalog.detail_calls() < 8);
}

#[tokio::test]
async fn spawned_batch_completes_when_left_alone() {
    let catalog = catalog_with(3, 1);
    let coord = DetailFetchCoordinator::new(catalog, 2);
    let scope = CancellationToken::new();
    let res = coord.spawn((1..=3).map(id), &scope).join().await.unwrap();
    assert_eq!(res.ok().len(), 3);
}
