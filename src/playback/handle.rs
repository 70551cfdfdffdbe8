use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::AttemptFailure;

/// Category of a media error reported by a playback handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorKind {
    /// Fetching the source failed
    Network,
    /// The bytes arrived but could not be decoded
    Decode,
    /// The format or source is not supported
    SourceNotSupported,
    /// Loading was interrupted
    Aborted,
}

/// Media error with a human-readable detail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<MediaError> for AttemptFailure {
    fn from(err: MediaError) -> Self {
        match err.kind {
            MediaErrorKind::Network => AttemptFailure::NetworkError(err.message),
            MediaErrorKind::Decode | MediaErrorKind::SourceNotSupported => {
                AttemptFailure::MediaError(err.message)
            }
            MediaErrorKind::Aborted => AttemptFailure::Aborted,
        }
    }
}

/// Event kinds emitted by a playback handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEventKind {
    /// Enough data is available to play through
    CanPlayThrough,
    /// Playback started or resumed after a stall
    Playing,
    /// Playback stalled waiting for data
    Waiting,
    Error(MediaError),
    Ended,
    /// Loading of the source was abandoned
    Abort,
}

/// An event tagged with the source generation that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    pub generation: u64,
    pub kind: MediaEventKind,
}

/// Contiguous buffered span of the current source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Duration,
    pub end: Duration,
}

impl TimeRange {
    pub fn new(start: Duration, end: Duration) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, position: Duration) -> bool {
        self.start <= position && position <= self.end
    }
}

/// A single-source playback primitive in the style of a media element.
///
/// Every call to [`set_source`](PlaybackHandle::set_source) starts a new
/// generation; events carry the generation they belong to so late events
/// from an abandoned source can be told apart.
#[async_trait]
pub trait PlaybackHandle: Send + Sync {
    /// Point the handle at a new source, returning the new generation
    fn set_source(&self, url: &str) -> u64;

    /// Current source, if any
    fn source(&self) -> Option<String>;

    /// Current source generation
    fn generation(&self) -> u64;

    /// Begin loading the current source
    fn load(&self);

    /// Start playback of a loaded source
    async fn play(&self) -> Result<(), MediaError>;

    fn pause(&self);

    fn seek(&self, position: Duration);

    /// Forget any error recorded for the current source
    fn clear_error(&self);

    fn current_time(&self) -> Duration;

    fn duration(&self) -> Option<Duration>;

    fn buffered(&self) -> Vec<TimeRange>;

    /// Bytes of the current source received so far, when known
    fn bytes_loaded(&self) -> Option<u64> {
        None
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Abandon the current source entirely and bump the generation
    fn stop(&self);

    /// Pause, rewind and clear errors before a fresh attempt
    fn reset(&self) {
        self.pause();
        self.seek(Duration::ZERO);
        self.clear_error();
    }
}
