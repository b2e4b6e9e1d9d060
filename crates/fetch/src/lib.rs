//! Shelf fetch: resolves a set of item ids into details with a fixed-size
//! worker pool. Workers send outcomes into a channel; a single collector
//! folds them and releases the result once every id has reported.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use metrics::{counter, histogram};
use shelf_catalog::CatalogClient;
use shelf_core::{FetchResult, ItemDetail, ItemId};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use shelf_core::config::DEFAULT_FETCH_CONCURRENCY;

/// One worker report. Exactly one per dispatched id.
#[derive(Debug)]
enum Outcome {
    Ok(ItemId, ItemDetail),
    Failed(ItemId),
}

/// Fan-out engine bound to a catalog and a concurrency cap.
#[derive(Clone)]
pub struct DetailFetchCoordinator {
    catalog: Arc<dyn CatalogClient>,
    limit: usize,
}

impl DetailFetchCoordinator {
    pub fn new(catalog: Arc<dyn CatalogClient>, concurrency_limit: usize) -> Self {
        Self { catalog, limit: concurrency_limit.max(1) }
    }

    pub fn limit(&self) -> usize { self.limit }

    /// Fetch every id once. Individual failures land in `failed`.
    pub async fn fetch_details(&self, ids: impl IntoIterator<Item = ItemId>) -> FetchResult<ItemDetail> {
        let ids: BTreeSet<ItemId> = ids.into_iter().collect();
        // A fresh token is never cancelled, so the batch always completes.
        run_batch(self.catalog.clone(), ids, self.limit, CancellationToken::new())
            .await
            .unwrap_or_default()
    }

    /// Like `fetch_details`, but returns `None` when `cancel` fires first.
    /// In-flight requests finish; their results are dropped.
    pub async fn fetch_details_cancellable(
        &self,
        ids: impl IntoIterator<Item = ItemId>,
        cancel: CancellationToken,
    ) -> Option<FetchResult<ItemDetail>> {
        run_batch(self.catalog.clone(), ids.into_iter().collect(), self.limit, cancel).await
    }

    /// Run the batch as a background task tied to `scope` (the owning render
    /// context). Cancelling `scope` or the returned handle discards the batch.
    pub fn spawn(&self, ids: impl IntoIterator<Item = ItemId>, scope: &CancellationToken) -> BatchHandle {
        let cancel = scope.child_token();
        let (tx, rx) = oneshot::channel();
        let ids: BTreeSet<ItemId> = ids.into_iter().collect();
        let catalog = self.catalog.clone();
        let limit = self.limit;
        let token = cancel.clone();
        tokio::spawn(async move {
            let res = run_batch(catalog, ids, limit, token).await;
            let _ = tx.send(res);
        });
        BatchHandle { rx, cancel }
    }
}

/// Handle for a spawned batch.
pub struct BatchHandle {
    rx: oneshot::Receiver<Option<FetchResult<ItemDetail>>>,
    cancel: CancellationToken,
}

impl BatchHandle {
    pub fn cancel(&self) { self.cancel.cancel(); }

    /// Wait for the batch. `None` when it was cancelled.
    pub async fn join(self) -> Option<FetchResult<ItemDetail>> {
        self.rx.await.ok().flatten()
    }

    /// Borrowing form of `join` for use inside `select!` loops.
    pub async fn wait(&mut self) -> Option<FetchResult<ItemDetail>> {
        (&mut self.rx).await.ok().flatten()
    }
}

/// Free-standing form: fetch `ids` with at most `concurrency_limit` requests
/// in flight.
pub async fn fetch_details(
    catalog: Arc<dyn CatalogClient>,
    ids: &BTreeSet<ItemId>,
    concurrency_limit: usize,
) -> FetchResult<ItemDetail> {
    DetailFetchCoordinator::new(catalog, concurrency_limit).fetch_details(ids.iter().copied()).await
}

async fn run_batch(
    catalog: Arc<dyn CatalogClient>,
    ids: BTreeSet<ItemId>,
    limit: usize,
    cancel: CancellationToken,
) -> Option<FetchResult<ItemDetail>> {
    let total = ids.len();
    if total == 0 {
        return Some(FetchResult::empty());
    }
    let t0 = Instant::now();
    let workers = limit.max(1).min(total);
    let queue: Arc<Mutex<VecDeque<ItemId>>> = Arc::new(Mutex::new(ids.iter().copied().collect()));
    let (tx, mut rx) = mpsc::channel::<Outcome>(total);

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let catalog = Arc::clone(&catalog);
        let tx = tx.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() { break; }
                let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                let Some(id) = next else { break; };
                let outcome = match catalog.detail(id).await {
                    Ok(d) => Outcome::Ok(id, d),
                    Err(e) => {
                        debug!(worker, %id, error = %e, "fetch: detail failed");
                        Outcome::Failed(id)
                    }
                };
                if tx.send(outcome).await.is_err() { break; }
            }
        }));
    }
    drop(tx);

    // Collector: sole owner of the aggregate. Releases after `total` reports.
    let mut ok: BTreeMap<ItemId, ItemDetail> = BTreeMap::new();
    let mut failed: BTreeSet<ItemId> = BTreeSet::new();
    let mut remaining = total;
    while remaining > 0 {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(ids = total, reported = total - remaining, took_ms = %t0.elapsed().as_millis(), "fetch: batch cancelled");
                return None;
            }
            maybe = rx.recv() => {
                match maybe {
                    Some(Outcome::Ok(id, d)) => { ok.insert(id, d); }
                    Some(Outcome::Failed(id)) => { failed.insert(id); }
                    None => break,
                }
                remaining -= 1;
            }
        }
    }

    for res in futures::future::join_all(handles).await {
        if let Err(e) = res {
            warn!(error = %e, "fetch: worker ended abnormally");
        }
    }
    if cancel.is_cancelled() {
        return None;
    }
    // A worker that died mid-request never reported; count its id as failed.
    if remaining > 0 {
        for id in ids.iter() {
            if !ok.contains_key(id) { failed.insert(*id); }
        }
    }

    histogram!("fetch_batch_ms", t0.elapsed().as_secs_f64() * 1000.0);
    if !failed.is_empty() {
        counter!("fetch_failed_total", failed.len() as u64);
    }
    info!(ids = total, ok = ok.len(), failed = failed.len(), workers, took_ms = %t0.elapsed().as_millis(), "fetch: batch done");
    Some(FetchResult::from_parts(ok, failed))
}
