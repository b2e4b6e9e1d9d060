//! Shelf catalog client: stateless HTTP/JSON access to the remote catalog
//! (`GET /games` lists and `GET /games/{id}` details).

#![forbid(unsafe_code)]

use std::time::Instant;

use metrics::{counter, histogram};
use reqwest::Client;
use serde::Deserialize;
use shelf_core::{ItemDetail, ItemId, ItemSummary, ListFilter, Settings, ShelfError, ShelfResult};
use tracing::{debug, info, warn};
use url::Url;

pub mod mock;

pub use mock::MockCatalog;

/// Read-only catalog accessor. Injected into the fetch coordinator and the
/// list pipeline as `Arc<dyn CatalogClient>`.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// One page of summaries for the filter, in response order.
    async fn list(&self, filter: &ListFilter) -> ShelfResult<Vec<ItemSummary>>;

    /// Full record for a single id.
    async fn detail(&self, id: ItemId) -> ShelfResult<ItemDetail>;
}

/// reqwest-backed client for a RAWG-style catalog.
pub struct HttpCatalogClient {
    client: Client,
    base: Url,
    api_key: Option<String>,
    release_window: String,
}

impl HttpCatalogClient {
    pub fn from_settings(settings: &Settings) -> ShelfResult<Self> {
        let client = Client::builder()
            .timeout(settings.http_timeout())
            .build()
            .map_err(|e| ShelfError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(client, settings)
    }

    pub fn with_client(client: Client, settings: &Settings) -> ShelfResult<Self> {
        let base: Url = settings
            .base_url
            .parse()
            .map_err(|e| ShelfError::Internal(format!("invalid base url '{}': {}", settings.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ShelfError::Internal(format!("base url '{}' cannot carry a path", settings.base_url)));
        }
        Ok(Self {
            client,
            base,
            api_key: settings.api_key.clone(),
            release_window: settings.release_window.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for s in segments { path.push(s); }
        }
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        url
    }

    async fn get_json(&self, op: &'static str, url: Url) -> ShelfResult<serde_json::Value> {
        let t0 = Instant::now();
        let res = self.client.get(url).send().await;
        let out = match res {
            Err(e) => Err(ShelfError::Network(e.to_string())),
            Ok(resp) if !resp.status().is_success() => Err(ShelfError::Network(format!("status {}", resp.status()))),
            Ok(resp) => match resp.bytes().await {
                Err(e) => Err(ShelfError::Network(e.to_string())),
                Ok(body) => serde_json::from_slice(&body).map_err(|e| ShelfError::Parse(e.to_string())),
            },
        };
        histogram!("catalog_request_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
        if out.is_err() {
            counter!("catalog_request_failed_total", 1u64, "op" => op);
        }
        out
    }
}

#[async_trait::async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list(&self, filter: &ListFilter) -> ShelfResult<Vec<ItemSummary>> {
        let t0 = Instant::now();
        let mut url = self.endpoint(&["games"]);
        {
            let mut q = url.query_pairs_mut();
            for (k, v) in filter.query_params(&self.release_window) {
                q.append_pair(k, &v);
            }
        }
        debug!(filter = %filter, "catalog: list start");
        let body = self.get_json("list", url).await;
        let items = body.and_then(|v| parse_list(&v));
        match &items {
            Ok(items) => info!(filter = %filter, items = items.len(), took_ms = %t0.elapsed().as_millis(), "catalog: list ok"),
            Err(e) => warn!(filter = %filter, error = %e, took_ms = %t0.elapsed().as_millis(), "catalog: list failed"),
        }
        items
    }

    async fn detail(&self, id: ItemId) -> ShelfResult<ItemDetail> {
        let t0 = Instant::now();
        let url = self.endpoint(&["games", &id.to_string()]);
        let res = self.get_json("detail", url).await.and_then(|v| parse_detail(&v));
        match &res {
            Ok(_) => debug!(%id, took_ms = %t0.elapsed().as_millis(), "catalog: detail ok"),
            Err(e) => debug!(%id, error = %e, took_ms = %t0.elapsed().as_millis(), "catalog: detail failed"),
        }
        res
    }
}

// ----------------- Wire format -----------------

#[derive(Debug, Deserialize)]
struct WireItem {
    id: Option<u64>,
    name: Option<String>,
    image: Option<String>,
    background_image: Option<String>,
    description: Option<String>,
}

impl WireItem {
    fn id(&self) -> ShelfResult<ItemId> {
        self.id
            .and_then(ItemId::new)
            .ok_or_else(|| ShelfError::Parse("item missing positive id".into()))
    }

    fn name(&self) -> ShelfResult<String> {
        self.name.clone().ok_or_else(|| ShelfError::Parse("item missing name".into()))
    }

    // `image` wins when both are present; missing or null reads as empty.
    fn image_url(&self) -> String {
        self.image.clone().or_else(|| self.background_image.clone()).unwrap_or_default()
    }
}

/// Parse a list response `{results: [...]}`. Any malformed row fails the
/// whole page.
pub fn parse_list(v: &serde_json::Value) -> ShelfResult<Vec<ItemSummary>> {
    let results = v
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| ShelfError::Parse("list response missing results array".into()))?;
    results
        .iter()
        .map(|raw| {
            let w: WireItem = serde_json::from_value(raw.clone()).map_err(|e| ShelfError::Parse(e.to_string()))?;
            Ok(ItemSummary { id: w.id()?, name: w.name()?, image_url: w.image_url() })
        })
        .collect()
}

/// Parse a single detail object.
pub fn parse_detail(v: &serde_json::Value) -> ShelfResult<ItemDetail> {
    let w: WireItem = serde_json::from_value(v.clone()).map_err(|e| ShelfError::Parse(e.to_string()))?;
    Ok(ItemDetail {
        id: w.id()?,
        name: w.name()?,
        image_url: w.image_url(),
        description: w.description.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_defaults_optional_fields() {
        let v = json!({"results": [
            {"id": 1, "name": "Alpha", "background_image": "http://img/a.jpg"},
            {"id": 2, "name": "Beta", "image": null},
            {"id": 3, "name": "Gamma", "image": "http://img/c.png", "background_image": "http://img/other"}
        ]});
        let items = parse_list(&v).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].image_url, "http://img/a.jpg");
        assert_eq!(items[1].image_url, "");
        assert_eq!(items[2].image_url, "http://img/c.png");
    }

    #[test]
    fn list_rejects_rows_missing_required_fields() {
        assert!(matches!(parse_list(&json!({"results": [{"id": 1}]})), Err(ShelfError::Parse(_))));
        assert!(matches!(parse_list(&json!({"results": [{"name": "x"}]})), Err(ShelfError::Parse(_))));
        assert!(matches!(parse_list(&json!({"count": 0})), Err(ShelfError::Parse(_))));
    }

    #[test]
    fn detail_keeps_description() {
        let d = parse_detail(&json!({"id": 7, "name": "Seven", "description": "<p>hi</p>"})).unwrap();
        assert_eq!(d.id.get(), 7);
        assert_eq!(d.description, "<p>hi</p>");
        assert_eq!(d.image_url, "");
        assert!(parse_detail(&json!({"id": 0, "name": "zero"})).is_err());
    }
}
