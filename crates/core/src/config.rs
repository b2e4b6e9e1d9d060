//! Runtime settings read from `SHELF_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://api.rawg.io/api";
pub const DEFAULT_FETCH_CONCURRENCY: usize = 5;
pub const DEFAULT_RELEASE_WINDOW: &str = "2023-01-01,2023-12-31";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub fetch_concurrency: usize,
    pub http_timeout_secs: u64,
    pub db_path: String,
    pub release_window: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            http_timeout_secs: 10,
            db_path: default_db_path(),
            release_window: DEFAULT_RELEASE_WINDOW.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build settings from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            base_url: get("SHELF_BASE_URL").map(|s| s.trim_end_matches('/').to_string()).unwrap_or(d.base_url),
            api_key: get("SHELF_API_KEY").filter(|s| !s.trim().is_empty()),
            fetch_concurrency: parsed(&get, "SHELF_FETCH_CONCURRENCY").unwrap_or(d.fetch_concurrency).max(1),
            http_timeout_secs: parsed(&get, "SHELF_HTTP_TIMEOUT_SECS").unwrap_or(d.http_timeout_secs),
            db_path: get("SHELF_DB_PATH").unwrap_or(d.db_path),
            release_window: get("SHELF_RELEASE_WINDOW").unwrap_or(d.release_window),
        }
    }

    pub fn http_timeout(&self) -> Duration { Duration::from_secs(self.http_timeout_secs.max(1)) }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, var: &str) -> Option<T> {
    let raw = get(var)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var, value = %raw, "ignoring unparsable setting; using default");
            None
        }
    }
}

/// `~/.shelf/shelf.db`, or `shelf.db` in the working directory without HOME.
pub fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".shelf");
        p.push("shelf.db");
        return p.to_string_lossy().to_string();
    }
    "shelf.db".to_string()
}
