use std::time::Duration;

use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum TilawaError {
    #[error("Verse lookup error: {0}")]
    Locator(#[from] LocatorError),

    #[error("Source catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Metadata API error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Could not play verse: {0}")]
    Fallback(#[from] FallbackError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Audio fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Verse locator errors (input errors, never retried)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Invalid verse key: {0}")]
    InvalidVerseKey(String),

    #[error("Invalid global verse index: {0} (expected 1..=6236)")]
    InvalidGlobalIndex(u32),

    #[error("Invalid chapter: {0} (expected 1..=114)")]
    InvalidChapter(u32),

    #[error("Invalid verse range: {0}")]
    InvalidRange(String),
}

/// Source catalog data errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Override table is malformed: {0}")]
    MalformedOverrides(#[from] serde_json::Error),

    #[error("Override for {verse} references unknown provider {provider}")]
    UnknownProvider { verse: String, provider: String },

    #[error("Override for {verse} is not a valid verse key")]
    InvalidOverrideVerse { verse: String },
}

/// Why a single playback attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    #[error("Timed out after {0:?} waiting for the source to become playable")]
    Timeout(Duration),

    #[error("Media error: {0}")]
    MediaError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Source was reset before it became playable")]
    Aborted,

    #[error("Source was replaced by a newer request")]
    Superseded,

    #[error("Attempt cancelled")]
    Cancelled,
}

impl AttemptFailure {
    /// Failures that end the whole run rather than moving to the next retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptFailure::Cancelled | AttemptFailure::Superseded)
    }
}

/// Fallback sequencer outcome when no candidate could be played
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FallbackError {
    #[error("All sources exhausted after {attempts} attempts (last error: {last_error})")]
    Exhausted {
        attempts: u32,
        last_error: AttemptFailure,
    },

    #[error("No audio candidates for this verse")]
    NoCandidates,

    #[error("Playback cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Raw audio byte fetch errors
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Empty response body")]
    EmptyBody,
}

/// Chapter/verse/audio metadata API errors
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Chapter {0} not found")]
    ChapterNotFound(u16),

    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("No audio device available")]
    NoDevice,
}

/// Result type alias for tilawa operations
pub type Result<T> = std::result::Result<T, TilawaError>;

impl TilawaError {
    /// Check if this error is recoverable (worth a "try again")
    pub fn is_recoverable(&self) -> bool {
        match self {
            TilawaError::Metadata(MetadataError::Http(_)) => true,
            TilawaError::Metadata(MetadataError::HttpStatus(status)) => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            TilawaError::Fallback(FallbackError::Exhausted { .. }) => true,
            _ => false,
        }
    }
}
