use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, instrument, trace};

use crate::cache::AudioCache;
use crate::error::FetchError;

/// Typical size of a single verse clip
const EXPECTED_CLIP_BYTES: usize = 256 * 1024;

/// Fetches the raw bytes of an audio file
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Plain HTTP fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("tilawa/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ByteFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        trace!(content_type, "Audio content type");

        let capacity = response
            .content_length()
            .map(|len| len as usize)
            .unwrap_or(EXPECTED_CLIP_BYTES);
        let mut buffer = BytesMut::with_capacity(capacity);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        if buffer.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        debug!(bytes = buffer.len(), "Fetched audio");
        Ok(buffer.freeze())
    }
}

/// Fetcher that serves repeat requests for a URL from the audio byte cache
pub struct CachedFetcher<F> {
    inner: F,
    cache: Arc<AudioCache>,
}

impl<F: ByteFetcher> CachedFetcher<F> {
    pub fn new(inner: F, cache: Arc<AudioCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<F: ByteFetcher> ByteFetcher for CachedFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        if let Some(bytes) = self.cache.audio_bytes(url) {
            trace!(url, "Audio cache hit");
            return Ok(bytes);
        }

        let bytes = self.inner.fetch(url).await?;
        self.cache.store_audio_bytes(url, bytes.clone());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::AUDIO_BYTES_TTL;

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ByteFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.ends_with("missing.mp3") {
                return Err(FetchError::EmptyBody);
            }
            Ok(Bytes::from_static(b"ID3 audio"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_fetch_within_ttl_is_cached() {
        let fetcher = CachedFetcher::new(CountingFetcher::default(), Arc::new(AudioCache::new()));
        let url = "https://cdn.example/002255.mp3";

        let first = fetcher.fetch(url).await.unwrap();
        let second = fetcher.fetch(url).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_again_after_ttl() {
        let fetcher = CachedFetcher::new(CountingFetcher::default(), Arc::new(AudioCache::new()));
        let url = "https://cdn.example/002255.mp3";

        fetcher.fetch(url).await.unwrap();
        tokio::time::advance(AUDIO_BYTES_TTL + Duration::from_secs(1)).await;
        fetcher.fetch(url).await.unwrap();

        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let fetcher = CachedFetcher::new(CountingFetcher::default(), Arc::new(AudioCache::new()));
        let url = "https://cdn.example/missing.mp3";

        assert!(fetcher.fetch(url).await.is_err());
        assert!(fetcher.fetch(url).await.is_err());
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 2);
    }
}
