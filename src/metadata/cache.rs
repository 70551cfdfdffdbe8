use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::cache::{TtlCache, CHAPTER_METADATA_TTL, RESOLVED_URL_TTL};
use crate::catalog::ReciterId;
use crate::error::MetadataError;

use super::types::{AudioFile, Chapter, PersistedChapters, Verse};

const CHAPTERS_FILE: &str = "chapters.json";

/// Cache for metadata API responses.
///
/// Chapters live for a day and are also written to disk; verses and audio
/// file lists live for an hour in memory only.
pub struct MetadataCache {
    cache_dir: PathBuf,
    chapters: TtlCache<(), Vec<Chapter>>,
    /// Keyed by chapter and translation resource
    verses: TtlCache<(u16, Option<u32>), Vec<Verse>>,
    audio: TtlCache<(ReciterId, u16), Vec<AudioFile>>,
}

impl MetadataCache {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        let cache_dir = cache_dir.unwrap_or_else(default_cache_dir);

        // Create cache directory if it doesn't exist
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            warn!(path = ?cache_dir, error = %e, "Failed to create cache directory");
        }

        debug!(path = ?cache_dir, "Initialized metadata cache");

        Self {
            cache_dir,
            chapters: TtlCache::new(CHAPTER_METADATA_TTL),
            verses: TtlCache::new(RESOLVED_URL_TTL),
            audio: TtlCache::new(RESOLVED_URL_TTL),
        }
    }

    /// Cached chapters, falling back to a fresh enough copy on disk
    pub fn chapters(&self) -> Option<Arc<Vec<Chapter>>> {
        if let Some(chapters) = self.chapters.get(&()) {
            return Some(chapters);
        }

        let persisted = self.load_chapters()?;
        let age = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .saturating_sub(Duration::from_secs(persisted.fetched_at));
        if age > CHAPTER_METADATA_TTL {
            debug!(age_secs = age.as_secs(), "Persisted chapters are stale");
            return None;
        }

        debug!("Using persisted chapters");
        let remaining = CHAPTER_METADATA_TTL - age;
        Some(self.chapters.insert_with_ttl((), persisted.chapters, remaining))
    }

    pub fn store_chapters(&self, chapters: Vec<Chapter>) -> Arc<Vec<Chapter>> {
        debug!(count = chapters.len(), "Caching chapters");
        if let Err(e) = self.save_chapters(&chapters) {
            warn!(error = %e, "Failed to persist chapters");
        }
        self.chapters.insert((), chapters)
    }

    pub fn verses(&self, chapter: u16, translation: Option<u32>) -> Option<Arc<Vec<Verse>>> {
        self.verses.get(&(chapter, translation))
    }

    pub fn store_verses(
        &self,
        chapter: u16,
        translation: Option<u32>,
        verses: Vec<Verse>,
    ) -> Arc<Vec<Verse>> {
        self.verses.insert((chapter, translation), verses)
    }

    pub fn audio_files(&self, reciter: ReciterId, chapter: u16) -> Option<Arc<Vec<AudioFile>>> {
        self.audio.get(&(reciter, chapter))
    }

    pub fn store_audio_files(
        &self,
        reciter: ReciterId,
        chapter: u16,
        files: Vec<AudioFile>,
    ) -> Arc<Vec<AudioFile>> {
        self.audio.insert((reciter, chapter), files)
    }

    /// Clear all caches, including the disk copy
    pub fn clear(&self) {
        debug!("Clearing metadata cache");
        self.chapters.clear();
        self.verses.clear();
        self.audio.clear();
        let _ = std::fs::remove_file(self.cache_file(CHAPTERS_FILE));
    }

    /// Get path for a cache file
    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    fn load_chapters(&self) -> Option<PersistedChapters> {
        let path = self.cache_file(CHAPTERS_FILE);
        let data = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(persisted) => Some(persisted),
            Err(e) => {
                warn!(path = ?path, error = %e, "Ignoring corrupt chapters cache");
                None
            }
        }
    }

    fn save_chapters(&self, chapters: &[Chapter]) -> Result<(), MetadataError> {
        let fetched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let persisted = PersistedChapters {
            fetched_at,
            chapters: chapters.to_vec(),
        };

        // Write then rename so a reader never sees a partial file
        let path = self.cache_file(CHAPTERS_FILE);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&persisted)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Per-user cache directory for tilawa
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilawa")
}
