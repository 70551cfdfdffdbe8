use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::error::AttemptFailure;

use super::handle::{MediaEvent, MediaEventKind, PlaybackHandle};

/// Timeout for attempts the user is actively waiting on
pub const URGENT_TIMEOUT: Duration = Duration::from_secs(8);

/// Timeout for background pre-buffering
pub const BACKGROUND_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a single attempt: playback started, or why it didn't
pub type AttemptOutcome = Result<(), AttemptFailure>;

/// Load one URL into a handle and start it playing
#[async_trait]
pub trait Attempt: Send + Sync {
    /// Resolves to exactly one of "playback started" or a failure reason
    async fn attempt(
        &self,
        handle: &dyn PlaybackHandle,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AttemptOutcome;
}

/// Attempt engine driving a [`PlaybackHandle`] through load → ready → play
#[derive(Debug, Default, Clone, Copy)]
pub struct AttemptEngine;

impl AttemptEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Attempt for AttemptEngine {
    #[instrument(skip(self, handle, cancel), fields(timeout_ms = timeout.as_millis() as u64))]
    async fn attempt(
        &self,
        handle: &dyn PlaybackHandle,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        // Subscribe before loading so an early ready/error can't be missed
        let mut events = handle.subscribe();
        let generation = handle.set_source(url);
        let deadline = Instant::now() + timeout;

        handle.load();
        debug!(generation, "Loading source");

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AttemptFailure::Cancelled),
            result = timeout_at(deadline, wait_until_ready(&mut events, handle, generation)) => {
                result.unwrap_or(Err(AttemptFailure::Timeout(timeout)))
            }
        };
        ready?;

        if handle.generation() != generation {
            return Err(AttemptFailure::Superseded);
        }

        let played = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AttemptFailure::Cancelled),
            result = timeout_at(deadline, handle.play()) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(AttemptFailure::from(e)),
                Err(_) => Err(AttemptFailure::Timeout(timeout)),
            }
        };
        played?;

        // A newer source took over while play() was pending; don't report its success
        if handle.generation() != generation {
            return Err(AttemptFailure::Superseded);
        }

        debug!(generation, "Playback started");
        Ok(())
    }
}

/// Wait for the ready signal of one source generation
async fn wait_until_ready(
    events: &mut broadcast::Receiver<MediaEvent>,
    handle: &dyn PlaybackHandle,
    generation: u64,
) -> AttemptOutcome {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                trace!(skipped, "Media event receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(AttemptFailure::NetworkError("playback handle closed".into()));
            }
        };

        if event.generation != generation {
            trace!(event_generation = event.generation, generation, "Ignoring event from another source");
            continue;
        }

        match event.kind {
            MediaEventKind::CanPlayThrough => return Ok(()),
            MediaEventKind::Error(e) => return Err(e.into()),
            MediaEventKind::Abort => {
                return if handle.generation() != generation {
                    Err(AttemptFailure::Superseded)
                } else {
                    Err(AttemptFailure::Aborted)
                };
            }
            MediaEventKind::Playing | MediaEventKind::Waiting | MediaEventKind::Ended => {}
        }
    }
}
