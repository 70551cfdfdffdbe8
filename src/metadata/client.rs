use std::time::Duration;

use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, instrument};

use crate::catalog::ReciterId;
use crate::error::MetadataError;

use super::types::*;

pub const DEFAULT_API_BASE: &str = "https://api.quran.com/api/v4";
pub const DEFAULT_AUDIO_BASE: &str = "https://verses.quran.com";
const USER_AGENT: &str = concat!("tilawa/", env!("CARGO_PKG_VERSION"));

/// Largest page the API hands out
const PER_PAGE: u32 = 50;

/// Chapter/verse/recitation metadata API client
pub struct QuranApiClient {
    client: Client,
    api_base: String,
    rate_limit_delay: Duration,
}

impl QuranApiClient {
    pub fn new(api_base: &str, rate_limit_ms: u64) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            rate_limit_delay: Duration::from_millis(rate_limit_ms),
        })
    }

    /// Apply rate limiting delay
    async fn rate_limit(&self) {
        sleep(self.rate_limit_delay).await;
    }

    /// Make a GET request and parse JSON response
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, MetadataError> {
        self.rate_limit().await;
        debug!(url, "Fetching");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(MetadataError::HttpStatus(response.status()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch all 114 chapters
    #[instrument(skip(self))]
    pub async fn get_chapters(&self, language: &str) -> Result<Vec<Chapter>, MetadataError> {
        let url = format!(
            "{}/chapters?language={}",
            self.api_base,
            urlencoding::encode(language)
        );
        let response: ChaptersResponse = self.get_json(&url).await?;
        debug!(count = response.chapters.len(), "Fetched chapters");
        Ok(response.chapters)
    }

    /// Fetch every verse of a chapter, following pagination
    #[instrument(skip(self))]
    pub async fn get_verses(
        &self,
        chapter: u16,
        translation: Option<u32>,
    ) -> Result<Vec<Verse>, MetadataError> {
        let mut verses = Vec::new();
        let mut page = 1;

        loop {
            let mut url = format!(
                "{}/verses/by_chapter/{}?fields={}&per_page={}&page={}",
                self.api_base,
                chapter,
                urlencoding::encode("text_uthmani"),
                PER_PAGE,
                page
            );
            if let Some(id) = translation {
                url.push_str(&format!("&translations={}", id));
            }

            let response: VersesResponse = self.get_json(&url).await?;
            verses.extend(response.verses);

            match response.pagination.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        debug!(chapter, count = verses.len(), "Fetched verses");
        Ok(verses)
    }

    /// Fetch per-verse audio paths of a recitation for one chapter
    #[instrument(skip(self))]
    pub async fn get_chapter_audio(
        &self,
        reciter: ReciterId,
        chapter: u16,
    ) -> Result<Vec<AudioFile>, MetadataError> {
        let mut files = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/recitations/{}/by_chapter/{}?per_page={}&page={}",
                self.api_base, reciter, chapter, PER_PAGE, page
            );
            let response: AudioFilesResponse = self.get_json(&url).await?;
            files.extend(response.audio_files);

            match response.pagination.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        debug!(%reciter, chapter, count = files.len(), "Fetched audio files");
        Ok(files)
    }
}
