//! Shelf core types: catalog records, the liked set, batch results and
//! rendered rows shared by every other crate.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod filter;
pub mod stream;

pub use config::Settings;
pub use error::{ShelfError, ShelfResult};
pub use filter::{GenreId, ListFilter, GENRES, PAGE_SIZE};
pub use stream::{CancelHandle, StreamHandle};

pub mod prelude {
    pub use super::{
        CacheEntry, FetchResult, ItemDetail, ItemId, ItemSummary, LikedSet, ListFilter, RenderedItem,
        RenderedList, Settings, ShelfError, ShelfResult, UserId,
    };
}

/// Catalog item identifier. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ItemId(u64);

impl ItemId {
    pub fn new(raw: u64) -> Option<Self> { (raw > 0).then_some(Self(raw)) }
    pub fn get(self) -> u64 { self.0 }
}

impl TryFrom<u64> for ItemId {
    type Error = String;
    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| "item id must be positive".to_string())
    }
}

impl From<ItemId> for u64 {
    fn from(id: ItemId) -> Self { id.0 }
}

impl FromStr for ItemId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u64 = s.trim().parse().map_err(|e| format!("invalid item id '{}': {}", s, e))?;
        Self::try_from(raw)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.0, f) }
}

/// Identity of the signed-in user; scopes the preference document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() { None } else { Some(Self(raw)) }
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Minimal record returned by list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub image_url: String,
}

/// Full record from the per-id endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetail {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub description: String,
}

impl ItemDetail {
    pub fn summary(&self) -> ItemSummary {
        ItemSummary { id: self.id, name: self.name.clone(), image_url: self.image_url.clone() }
    }
}

/// The user's liked item ids. Replaced wholesale by feed deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LikedSet(BTreeSet<ItemId>);

impl LikedSet {
    pub fn new() -> Self { Self::default() }
    pub fn contains(&self, id: ItemId) -> bool { self.0.contains(&id) }
    /// Set-union with a single id. Returns false when already present.
    pub fn insert(&mut self, id: ItemId) -> bool { self.0.insert(id) }
    /// Set-removal of a single id. Returns false when absent.
    pub fn remove(&mut self, id: ItemId) -> bool { self.0.remove(&id) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ { self.0.iter().copied() }
    pub fn to_vec(&self) -> Vec<ItemId> { self.iter().collect() }
}

impl FromIterator<ItemId> for LikedSet {
    fn from_iter<I: IntoIterator<Item = ItemId>>(iter: I) -> Self { Self(iter.into_iter().collect()) }
}

/// Outcome of a batch fetch. Built once, after every id was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult<T> {
    ok: BTreeMap<ItemId, T>,
    failed: BTreeSet<ItemId>,
}

impl<T> Default for FetchResult<T> {
    fn default() -> Self { Self { ok: BTreeMap::new(), failed: BTreeSet::new() } }
}

impl<T> FetchResult<T> {
    pub fn empty() -> Self { Self::default() }

    /// Assemble a final result. An id present in both sides counts as ok.
    pub fn from_parts(ok: BTreeMap<ItemId, T>, mut failed: BTreeSet<ItemId>) -> Self {
        failed.retain(|id| !ok.contains_key(id));
        Self { ok, failed }
    }

    pub fn ok(&self) -> &BTreeMap<ItemId, T> { &self.ok }
    pub fn failed(&self) -> &BTreeSet<ItemId> { &self.failed }
    pub fn attempted(&self) -> usize { self.ok.len() + self.failed.len() }
    pub fn is_empty(&self) -> bool { self.attempted() == 0 }
    pub fn into_parts(self) -> (BTreeMap<ItemId, T>, BTreeSet<ItemId>) { (self.ok, self.failed) }
}

/// Last successfully parsed list response for a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<ItemSummary>,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Vec<ItemSummary>) -> Self {
        Self { key: key.into(), payload, stored_at: Utc::now() }
    }
}

/// A list row with its liked flag, as handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedItem {
    pub summary: ItemSummary,
    pub liked: bool,
}

/// Ordered rendered rows. Order follows the catalog response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderedList {
    pub items: Vec<RenderedItem>,
}

impl RenderedList {
    /// Merge summaries with a liked-set snapshot (membership test per row).
    pub fn merge(summaries: Vec<ItemSummary>, liked: &LikedSet) -> Self {
        let items = summaries
            .into_iter()
            .map(|summary| {
                let liked = liked.contains(summary.id);
                RenderedItem { summary, liked }
            })
            .collect();
        Self { items }
    }

    /// Recompute liked flags after a new liked set arrived; no refetch.
    pub fn relike(&mut self, liked: &LikedSet) {
        for it in self.items.iter_mut() {
            it.liked = liked.contains(it.summary.id);
        }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn names(&self) -> Vec<&str> { self.items.iter().map(|i| i.summary.name.as_str()).collect() }

    /// Non-empty image URLs in row order, for a frontend prefetcher.
    pub fn image_urls(&self) -> Vec<&str> {
        self.items
            .iter()
            .map(|i| i.summary.image_url.as_str())
            .filter(|u| !u.is_empty())
            .collect()
    }
}
