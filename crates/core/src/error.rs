use serde::{Deserialize, Serialize};

/// Errors surfaced by the engine. Per-item fetch failures never show up here;
/// they are folded into `FetchResult::failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ShelfError {
    #[error("network: {0}")]
    Network(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("store_write: {0}")]
    StoreWrite(String),
    #[error("not_authenticated")]
    NotAuthenticated,
    #[error("cache: {0}")]
    Cache(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ShelfError {
    /// Only a missing session stops the caller; everything else is transient.
    pub fn is_fatal(&self) -> bool { matches!(self, Self::NotAuthenticated) }
}

pub type ShelfResult<T> = Result<T, ShelfError>;
