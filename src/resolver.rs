use std::sync::Arc;

use tracing::debug;

use crate::cache::AudioCache;
use crate::catalog::{AudioCandidate, ReciterId, SourceCatalog};
use crate::quran::VerseKey;

/// Decides what to try next for a verse: a cached winner, or the full catalog list
pub struct AudioResolver {
    catalog: Arc<SourceCatalog>,
    cache: Arc<AudioCache>,
}

impl AudioResolver {
    pub fn new(catalog: Arc<SourceCatalog>, cache: Arc<AudioCache>) -> Self {
        Self { catalog, cache }
    }

    /// Ordered candidates for a reciter and verse.
    ///
    /// An unexpired cached winner short-circuits to a single-element list.
    pub fn resolve(&self, reciter: ReciterId, verse: VerseKey) -> Vec<AudioCandidate> {
        if let Some(cached) = self.cache.resolved(reciter, verse) {
            debug!(%reciter, %verse, url = %cached.url, "Using cached source");
            let mut candidate = (*cached).clone();
            candidate.priority = 0;
            return vec![candidate];
        }

        self.catalog.candidates(reciter, verse)
    }

    /// Full catalog list, ignoring the cache
    pub fn resolve_uncached(&self, reciter: ReciterId, verse: VerseKey) -> Vec<AudioCandidate> {
        self.catalog.candidates(reciter, verse)
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }
}
