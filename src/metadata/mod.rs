mod cache;
mod client;
mod types;

pub use client::{DEFAULT_API_BASE, DEFAULT_AUDIO_BASE};
pub use types::{Chapter, Verse};

use cache::MetadataCache;
use client::QuranApiClient;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::catalog::ReciterId;
use crate::cli::Args;
use crate::error::MetadataError;
use crate::quran::VerseKey;

/// Where and how metadata is fetched
#[derive(Debug, Clone)]
pub struct MetadataSettings {
    pub api_base: String,
    pub audio_base: String,
    pub language: String,
    pub rate_limit_ms: u64,
    pub cache_dir: Option<PathBuf>,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            audio_base: DEFAULT_AUDIO_BASE.to_string(),
            language: "en".to_string(),
            rate_limit_ms: 0,
            cache_dir: None,
        }
    }
}

impl MetadataSettings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            api_base: args.api_base.clone(),
            audio_base: args.audio_base.clone(),
            rate_limit_ms: args.rate_limit_ms,
            cache_dir: args.cache_dir.clone(),
            ..Self::default()
        }
    }
}

/// Metadata API client with caching
pub struct MetadataService {
    client: QuranApiClient,
    cache: Arc<MetadataCache>,
    settings: MetadataSettings,
}

impl MetadataService {
    pub fn new(settings: MetadataSettings) -> Result<Self, MetadataError> {
        Ok(Self {
            client: QuranApiClient::new(&settings.api_base, settings.rate_limit_ms)?,
            cache: Arc::new(MetadataCache::new(settings.cache_dir.clone())),
            settings,
        })
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// All chapters (with caching)
    #[instrument(skip(self))]
    pub async fn chapters(&self) -> Result<Arc<Vec<Chapter>>, MetadataError> {
        if let Some(chapters) = self.cache.chapters() {
            return Ok(chapters);
        }

        let chapters = self.client.get_chapters(&self.settings.language).await?;
        Ok(self.cache.store_chapters(chapters))
    }

    #[instrument(skip(self))]
    pub async fn chapter(&self, id: u16) -> Result<Chapter, MetadataError> {
        self.chapters()
            .await?
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(MetadataError::ChapterNotFound(id))
    }

    /// Verses of a chapter (with caching)
    #[instrument(skip(self))]
    pub async fn verses(
        &self,
        chapter: u16,
        translation: Option<u32>,
    ) -> Result<Arc<Vec<Verse>>, MetadataError> {
        if let Some(verses) = self.cache.verses(chapter, translation) {
            return Ok(verses);
        }

        let verses = self.client.get_verses(chapter, translation).await?;
        Ok(self.cache.store_verses(chapter, translation, verses))
    }

    /// Absolute audio URL of each verse of a chapter, per the recitation API
    #[instrument(skip(self))]
    pub async fn chapter_audio(
        &self,
        reciter: ReciterId,
        chapter: u16,
    ) -> Result<Vec<(VerseKey, String)>, MetadataError> {
        let files = match self.cache.audio_files(reciter, chapter) {
            Some(files) => files,
            None => {
                let files = self.client.get_chapter_audio(reciter, chapter).await?;
                self.cache.store_audio_files(reciter, chapter, files)
            }
        };

        debug!(%reciter, chapter, count = files.len(), "Resolved chapter audio");
        Ok(files
            .iter()
            .map(|f| (f.verse_key, f.absolute_url(&self.settings.audio_base)))
            .collect())
    }

    /// Audio URL of one verse, per the recitation API
    pub async fn verse_audio(
        &self,
        reciter: ReciterId,
        verse: VerseKey,
    ) -> Result<Option<String>, MetadataError> {
        Ok(self
            .chapter_audio(reciter, verse.chapter())
            .await?
            .into_iter()
            .find(|(key, _)| *key == verse)
            .map(|(_, url)| url))
    }
}
