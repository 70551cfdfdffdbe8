use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::catalog::{AudioCandidate, ReciterId};
use crate::quran::VerseKey;

/// Time-to-live for raw audio bytes (5 minutes)
pub const AUDIO_BYTES_TTL: Duration = Duration::from_secs(5 * 60);

/// Time-to-live for resolved audio URLs and verse metadata (1 hour)
pub const RESOLVED_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Time-to-live for chapter-level metadata (24 hours)
pub const CHAPTER_METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cached value with its creation time
struct CacheEntry<V> {
    value: Arc<V>,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

/// In-memory map with per-entry TTL. Expired entries are dropped when read
/// and swept on every write.
///
/// Values are stored as immutable `Arc` snapshots and replaced wholesale on
/// write, so a reader never observes a half-updated entry.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Get a value if present and not expired
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    trace!(?key, "Cache hit");
                    return Some(Arc::clone(&entry.value));
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict, re-checking in case a writer replaced it meanwhile
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                return Some(Arc::clone(&entry.value));
            }
            debug!(?key, "Evicting expired cache entry");
            entries.remove(key);
        }
        None
    }

    /// Store a value, replacing any previous snapshot
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        self.insert_with_ttl(key, value, self.ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Arc<V> {
        let value = Arc::new(value);
        let now = Instant::now();
        let mut entries = self.entries.write();

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "Swept expired cache entries");
        }

        entries.insert(
            key,
            CacheEntry {
                value: Arc::clone(&value),
                created_at: now,
                ttl,
            },
        );
        value
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.write().remove(key).map(|entry| entry.value)
    }

    /// Number of stored entries; expired ones count until the next write
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Audio-side caches: resolved winning sources and fetched audio bytes
pub struct AudioCache {
    resolved: TtlCache<(ReciterId, VerseKey), AudioCandidate>,
    bytes: TtlCache<String, Bytes>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::with_ttls(RESOLVED_URL_TTL, AUDIO_BYTES_TTL)
    }

    pub fn with_ttls(resolved_ttl: Duration, bytes_ttl: Duration) -> Self {
        Self {
            resolved: TtlCache::new(resolved_ttl),
            bytes: TtlCache::new(bytes_ttl),
        }
    }

    /// Previously winning source for a verse
    pub fn resolved(&self, reciter: ReciterId, verse: VerseKey) -> Option<Arc<AudioCandidate>> {
        self.resolved.get(&(reciter, verse))
    }

    pub fn store_resolved(&self, reciter: ReciterId, verse: VerseKey, candidate: AudioCandidate) {
        debug!(%reciter, %verse, url = %candidate.url, "Caching resolved source");
        self.resolved.insert((reciter, verse), candidate);
    }

    /// Drop a cached source that stopped working
    pub fn forget_resolved(&self, reciter: ReciterId, verse: VerseKey) {
        self.resolved.remove(&(reciter, verse));
    }

    pub fn audio_bytes(&self, url: &str) -> Option<Bytes> {
        self.bytes.get(&url.to_string()).map(|b| Bytes::clone(&b))
    }

    pub fn store_audio_bytes(&self, url: &str, bytes: Bytes) {
        trace!(url, len = bytes.len(), "Caching audio bytes");
        self.bytes.insert(url.to_string(), bytes);
    }
}

impl Default for AudioCache {
    fn default() -> Self {
        Self::new()
    }
}
