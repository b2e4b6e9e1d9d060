//! Favorites view: resolve the liked set into details on every delivery.

use shelf_core::{CancelHandle, ItemDetail, StreamHandle};
use shelf_fetch::{BatchHandle, DetailFetchCoordinator};
use shelf_prefs::LikedFeed;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Details in id order; ids whose fetch failed are left out.
pub type FavoritesFeed = StreamHandle<Vec<ItemDetail>>;

async fn settle(pending: &mut Option<BatchHandle>) -> Option<shelf_core::FetchResult<ItemDetail>> {
    match pending {
        Some(batch) => batch.wait().await,
        None => std::future::pending().await,
    }
}

/// A newer delivery cancels the batch still running for the previous one.
pub(crate) fn spawn_favorites(mut feed: LikedFeed, fetch: DetailFetchCoordinator) -> FavoritesFeed {
    let (tx, rx) = mpsc::channel::<Vec<ItemDetail>>(4);
    let task = tokio::spawn(async move {
        let scope = CancellationToken::new();
        // aborting this task drops the guard and stops any running batch
        let _guard = scope.clone().drop_guard();
        let mut pending: Option<BatchHandle> = None;
        loop {
            tokio::select! {
                next = feed.rx.recv() => {
                    let Some(liked) = next else { break; };
                    if let Some(old) = pending.take() {
                        debug!("favorites: superseded batch cancelled");
                        old.cancel();
                    }
                    if liked.is_empty() {
                        if tx.send(Vec::new()).await.is_err() { break; }
                        continue;
                    }
                    pending = Some(fetch.spawn(liked.iter(), &scope));
                }
                res = settle(&mut pending) => {
                    pending = None;
                    let Some(res) = res else { continue; };
                    if !res.failed().is_empty() {
                        debug!(failed = res.failed().len(), "favorites: dropping failed ids");
                    }
                    let (ok, _) = res.into_parts();
                    let items: Vec<ItemDetail> = ok.into_values().collect();
                    info!(items = items.len(), "favorites: published");
                    if tx.send(items).await.is_err() { break; }
                }
            }
        }
        feed.cancel.cancel();
    });
    StreamHandle { rx, cancel: CancelHandle::new(task) }
}
