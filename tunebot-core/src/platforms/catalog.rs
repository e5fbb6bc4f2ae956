// File: src/platforms/catalog.rs

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tunebot_common::models::{Track, UserId};
use tunebot_common::traits::TrackResolver;

use crate::Error;

/// One playable item in the local catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub title: String,
    pub artist: String,
    pub duration_secs: u64,
    pub source_uri: String,
}

impl CatalogEntry {
    pub fn new(title: &str, artist: &str, duration_secs: u64, source_uri: &str) -> Self {
        Self {
            title: title.to_string(),
            artist: artist.to_string(),
            duration_secs,
            source_uri: source_uri.to_string(),
        }
    }

    fn to_track(&self, requested_by: Option<UserId>) -> Track {
        Track::new(
            self.title.clone(),
            self.artist.clone(),
            Duration::from_secs(self.duration_secs),
            self.source_uri.clone(),
        )
        .requested_by(requested_by)
    }
}

/// In-memory list of known tracks.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Loads a JSON array of entries.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&raw)?;
        info!("Loaded {} catalog entries from {:?}", entries.len(), path);
        Ok(Self { entries })
    }

    /// A handful of built-in tracks so the server is usable without a file.
    pub fn demo() -> Self {
        Self::new(vec![
            CatalogEntry::new("Blue Monday", "New Order", 448, "loopback://new-order/blue-monday"),
            CatalogEntry::new("Windowlicker", "Aphex Twin", 367, "loopback://aphex-twin/windowlicker"),
            CatalogEntry::new("Teardrop", "Massive Attack", 330, "loopback://massive-attack/teardrop"),
            CatalogEntry::new("Around the World", "Daft Punk", 429, "loopback://daft-punk/around-the-world"),
            CatalogEntry::new("Roygbiv", "Boards of Canada", 151, "loopback://boc/roygbiv"),
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Matches, in order: exact source URI, exact title (case-insensitive),
    /// then the first entry whose "title artist" contains the query.
    pub fn lookup(&self, query: &str) -> Option<&CatalogEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.source_uri == query.trim())
            .or_else(|| self.entries.iter().find(|e| e.title.to_lowercase() == needle))
            .or_else(|| {
                self.entries.iter().find(|e| {
                    format!("{} {}", e.title, e.artist)
                        .to_lowercase()
                        .contains(&needle)
                })
            })
    }

    pub fn duration_of(&self, source_uri: &str) -> Option<Duration> {
        self.entries
            .iter()
            .find(|e| e.source_uri == source_uri)
            .map(|e| Duration::from_secs(e.duration_secs))
    }
}

/// `TrackResolver` backed by a `Catalog`.
pub struct CatalogResolver {
    catalog: Catalog,
}

impl CatalogResolver {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

#[async_trait]
impl TrackResolver for CatalogResolver {
    async fn resolve(&self, query: &str, requested_by: Option<UserId>) -> Result<Track, Error> {
        debug!("CatalogResolver::resolve('{}')", query);
        self.catalog
            .lookup(query)
            .map(|entry| entry.to_track(requested_by))
            .ok_or_else(|| Error::TrackNotFound(query.to_string()))
    }
}
