use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::app::QueueOptions;
use crate::cache::AudioCache;
use crate::catalog::{ReciterId, SourceCatalog};
use crate::error::{AttemptFailure, FallbackError};
use crate::playback::{
    Attempt, AttemptEngine, FallbackPolicy, FallbackSequencer, HealthSubscription, MediaError,
    MediaEvent, MediaEventKind, PlaybackHandle, PlaybackSuccess, RecommendedAction,
    StreamHealthMonitor, StreamQualityMetrics,
};
use crate::quran::VerseKey;
use crate::resolver::AudioResolver;
use crate::tasks::{QueueController, VersePlayer};

/// How often a playing verse consults the health monitor
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Fresh fallback runs allowed per verse when the stream degrades
const MAX_RECONNECTS: u32 = 1;

/// Entry point tying resolution, fallback playback, health and queueing together
pub struct RecitationService<A = AttemptEngine> {
    resolver: AudioResolver,
    fallback: FallbackSequencer<A>,
    monitor: StreamHealthMonitor,
}

impl RecitationService<AttemptEngine> {
    pub fn new(catalog: Arc<SourceCatalog>, cache: Arc<AudioCache>, policy: FallbackPolicy) -> Self {
        Self::from_parts(catalog, cache, FallbackSequencer::new(policy))
    }
}

impl<A: Attempt + 'static> RecitationService<A> {
    pub fn with_attempt(
        catalog: Arc<SourceCatalog>,
        cache: Arc<AudioCache>,
        attempt: A,
        policy: FallbackPolicy,
    ) -> Self {
        Self::from_parts(catalog, cache, FallbackSequencer::with_attempt(attempt, policy))
    }

    fn from_parts(
        catalog: Arc<SourceCatalog>,
        cache: Arc<AudioCache>,
        fallback: FallbackSequencer<A>,
    ) -> Self {
        Self {
            resolver: AudioResolver::new(catalog, cache),
            fallback,
            monitor: StreamHealthMonitor::new(),
        }
    }

    pub fn monitor(&self) -> &StreamHealthMonitor {
        &self.monitor
    }

    /// Find a working source for a verse and start it playing on `handle`.
    ///
    /// The winner is cached; a cached winner that stopped working is dropped
    /// and the full candidate list tried instead.
    #[instrument(skip(self, handle, cancel), fields(%reciter, %verse))]
    pub async fn resolve_and_play(
        &self,
        reciter: ReciterId,
        verse: VerseKey,
        handle: &dyn PlaybackHandle,
        cancel: &CancellationToken,
    ) -> Result<PlaybackSuccess, FallbackError> {
        let cache = self.resolver.cache();
        let was_cached = cache.resolved(reciter, verse).is_some();
        let candidates = self.resolver.resolve(reciter, verse);
        debug!(candidates = candidates.len(), was_cached, "Resolved candidates");

        let result = match self.fallback.run(&candidates, handle, cancel).await {
            Err(FallbackError::Exhausted { .. }) if was_cached => {
                warn!("Cached source stopped working, trying all sources");
                cache.forget_resolved(reciter, verse);
                let candidates = self.resolver.resolve_uncached(reciter, verse);
                self.fallback.run(&candidates, handle, cancel).await
            }
            other => other,
        };

        if let Ok(success) = &result {
            cache.store_resolved(reciter, verse, success.candidate.clone());
        }
        result
    }

    /// Queue of verses played back to back on `handle`
    pub fn build_queue(
        self: &Arc<Self>,
        reciter: ReciterId,
        verses: Vec<VerseKey>,
        options: &QueueOptions,
        handle: Arc<dyn PlaybackHandle>,
    ) -> QueueController {
        let player = HandleVersePlayer::new(Arc::clone(self), handle, reciter);
        QueueController::spawn(Arc::new(player), verses, options)
    }

    /// Register for health updates of a stream URL
    pub fn subscribe_stream_health<F>(&self, url: &str, callback: F) -> HealthSubscription
    where
        F: Fn(&str, &StreamQualityMetrics) + Send + Sync + 'static,
    {
        self.monitor.subscribe(url, callback)
    }
}

/// How a playing verse came to an end
#[derive(Debug)]
enum VerseEnd {
    Finished,
    Cancelled,
    /// The monitor judged the stream dead
    Dead,
    /// The monitor asked for a fresh connection
    Reconnect,
    /// The source failed mid-playback
    Failed(MediaError),
}

/// [`VersePlayer`] that plays through a playback handle and waits for the end
pub struct HandleVersePlayer<A = AttemptEngine> {
    service: Arc<RecitationService<A>>,
    handle: Arc<dyn PlaybackHandle>,
    reciter: ReciterId,
}

impl<A: Attempt + 'static> HandleVersePlayer<A> {
    pub fn new(
        service: Arc<RecitationService<A>>,
        handle: Arc<dyn PlaybackHandle>,
        reciter: ReciterId,
    ) -> Self {
        Self {
            service,
            handle,
            reciter,
        }
    }

    async fn wait_for_end(
        &self,
        events: &mut broadcast::Receiver<MediaEvent>,
        generation: u64,
        url: &str,
        cancel: &CancellationToken,
    ) -> VerseEnd {
        let mut ticker = interval(HEALTH_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return VerseEnd::Cancelled,

                event = events.recv() => match event {
                    Ok(event) if event.generation == generation => match event.kind {
                        MediaEventKind::Ended => return VerseEnd::Finished,
                        MediaEventKind::Error(e) => return VerseEnd::Failed(e),
                        MediaEventKind::Abort => return VerseEnd::Cancelled,
                        _ => {}
                    },
                    Ok(event) if event.generation > generation => return VerseEnd::Cancelled,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return VerseEnd::Cancelled,
                },

                _ = ticker.tick() => {
                    let monitor = &self.service.monitor;
                    if monitor.is_stream_dead(url) {
                        return VerseEnd::Dead;
                    }
                    if monitor.recommended_action(url) == RecommendedAction::Reconnect {
                        return VerseEnd::Reconnect;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<A: Attempt + 'static> VersePlayer for HandleVersePlayer<A> {
    async fn play_verse(&self, verse: VerseKey, cancel: &CancellationToken) -> Result<(), FallbackError> {
        let mut reconnects = 0;
        let mut attempts = 0;

        loop {
            // Subscribe first so an early end can't be missed
            let mut events = self.handle.subscribe();
            let success = self
                .service
                .resolve_and_play(self.reciter, verse, self.handle.as_ref(), cancel)
                .await?;
            attempts += success.attempts;

            let generation = self.handle.generation();
            let url = success.candidate.url;
            self.service.monitor.monitor(&url, Arc::clone(&self.handle));

            let end = self.wait_for_end(&mut events, generation, &url, cancel).await;
            self.service.monitor.stop_monitoring(&url);

            let reason = match end {
                VerseEnd::Finished => return Ok(()),
                VerseEnd::Cancelled => return Err(FallbackError::Cancelled { attempts }),
                VerseEnd::Dead => {
                    warn!(%verse, %url, "Stream is dead, skipping verse");
                    return Err(FallbackError::Exhausted {
                        attempts,
                        last_error: AttemptFailure::NetworkError("stream stalled".into()),
                    });
                }
                VerseEnd::Reconnect => AttemptFailure::NetworkError("stream degraded".into()),
                VerseEnd::Failed(e) => AttemptFailure::from(e),
            };

            if reconnects >= MAX_RECONNECTS {
                warn!(%verse, %url, error = %reason, "Giving up on verse");
                return Err(FallbackError::Exhausted {
                    attempts,
                    last_error: reason,
                });
            }
            reconnects += 1;
            info!(%verse, %url, error = %reason, "Reconnecting");
        }
    }

    fn halt(&self) {
        self.handle.stop();
    }
}
