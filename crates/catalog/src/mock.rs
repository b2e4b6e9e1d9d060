//! In-memory catalog for tests and demos. Tracks call counts and the peak
//! number of concurrently running detail requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use shelf_core::{ItemDetail, ItemId, ItemSummary, ListFilter, ShelfError, ShelfResult};

use crate::CatalogClient;

#[derive(Default)]
pub struct MockCatalog {
    lists: Mutex<HashMap<String, ShelfResult<Vec<ItemSummary>>>>,
    details: Mutex<HashMap<ItemId, ShelfResult<ItemDetail>>>,
    detail_delays: Mutex<HashMap<ItemId, Duration>>,
    detail_delay: Duration,
    list_delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    detail_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl MockCatalog {
    pub fn new() -> Self { Self::default() }

    pub fn with_item(self, id: ItemId, name: &str) -> Self {
        self.with_detail(ItemDetail {
            id,
            name: name.to_string(),
            image_url: format!("https://img.example/{}.jpg", id),
            description: format!("About {}", name),
        })
    }

    pub fn with_detail(self, d: ItemDetail) -> Self {
        lock(&self.details).insert(d.id, Ok(d));
        self
    }

    pub fn with_detail_error(self, id: ItemId, err: ShelfError) -> Self {
        lock(&self.details).insert(id, Err(err));
        self
    }

    /// Delay applied to every detail request.
    pub fn with_detail_delay(mut self, d: Duration) -> Self {
        self.detail_delay = d;
        self
    }

    /// Delay for one id, overriding the global detail delay.
    pub fn with_detail_delay_for(self, id: ItemId, d: Duration) -> Self {
        lock(&self.detail_delays).insert(id, d);
        self
    }

    pub fn with_list(self, filter: &ListFilter, items: Vec<ItemSummary>) -> Self {
        self.set_list(filter, Ok(items));
        self
    }

    pub fn with_list_delay(mut self, d: Duration) -> Self {
        self.list_delay = d;
        self
    }

    /// Replace the response for a filter between refreshes.
    pub fn set_list(&self, filter: &ListFilter, res: ShelfResult<Vec<ItemSummary>>) {
        lock(&self.lists).insert(filter.cache_key(), res);
    }

    pub fn detail_calls(&self) -> usize { self.detail_calls.load(Ordering::SeqCst) }
    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }
    pub fn peak_in_flight(&self) -> usize { self.peak_in_flight.load(Ordering::SeqCst) }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

#[async_trait::async_trait]
impl CatalogClient for MockCatalog {
    async fn list(&self, filter: &ListFilter) -> ShelfResult<Vec<ItemSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        lock(&self.lists)
            .get(&filter.cache_key())
            .cloned()
            .unwrap_or_else(|| Err(ShelfError::Network(format!("no list configured for {}", filter))))
    }

    async fn detail(&self, id: ItemId) -> ShelfResult<ItemDetail> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = lock(&self.detail_delays).get(&id).copied().unwrap_or(self.detail_delay);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        let res = lock(&self.details)
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Err(ShelfError::Network(format!("no item {}", id))));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }
}
