//! List filters: query parameters and canonical cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Catalog genre identifier as used by the remote `genres=` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenreId(pub u32);

impl fmt::Display for GenreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.0, f) }
}

/// Rows requested per list call.
pub const PAGE_SIZE: u32 = 20;

/// Genres offered for browsing, in display order.
pub const GENRES: &[(&str, GenreId)] = &[
    ("Action", GenreId(4)),
    ("Indie", GenreId(51)),
    ("Adventure", GenreId(3)),
    ("RPG", GenreId(5)),
    ("Simulation", GenreId(14)),
    ("Puzzle", GenreId(7)),
    ("Arcade", GenreId(11)),
    ("Platformer", GenreId(83)),
    ("Racing", GenreId(1)),
    ("Sports", GenreId(15)),
];

impl GenreId {
    /// Resolve a genre by display name (case-insensitive) or numeric id.
    pub fn lookup(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return Some(GenreId(n));
        }
        GENRES.iter().find(|(name, _)| name.eq_ignore_ascii_case(s)).map(|(_, id)| *id)
    }

    pub fn name(self) -> Option<&'static str> {
        GENRES.iter().find(|(_, id)| *id == self).map(|(name, _)| *name)
    }
}

/// Which catalog list to show. Variants only differ in query parameters
/// and cache key; the refresh pipeline treats them alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListFilter {
    Featured,
    NewReleases,
    Genre(GenreId),
    Search { query: String, genre: Option<GenreId> },
}

impl ListFilter {
    pub fn search(query: impl Into<String>, genre: Option<GenreId>) -> Self {
        Self::Search { query: query.into(), genre }
    }

    pub fn cache_key(&self) -> String {
        match self {
            Self::Featured => "items:featured".to_string(),
            Self::NewReleases => "items:new".to_string(),
            Self::Genre(g) => format!("items:genre:{}", g),
            Self::Search { query, genre } => {
                let q = query.trim().to_lowercase();
                match genre {
                    Some(g) => format!("items:search:{}:genre:{}", q, g),
                    None => format!("items:search:{}", q),
                }
            }
        }
    }

    /// Query parameters for the list endpoint. `release_window` is the
    /// `dates=` value used by new-release and genre lists.
    pub fn query_params(&self, release_window: &str) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(4);
        match self {
            Self::Featured => {}
            Self::NewReleases => {
                params.push(("dates", release_window.to_string()));
                params.push(("ordering", "-released".to_string()));
            }
            Self::Genre(g) => {
                params.push(("dates", release_window.to_string()));
                params.push(("ordering", "-released".to_string()));
                params.push(("genres", g.to_string()));
            }
            Self::Search { query, genre } => {
                params.push(("search", query.clone()));
                if let Some(g) = genre { params.push(("genres", g.to_string())); }
            }
        }
        params.push(("page_size", PAGE_SIZE.to_string()));
        params
    }
}

impl fmt::Display for ListFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.cache_key()) }
}
