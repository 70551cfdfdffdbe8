mod attempt;
mod fallback;
mod fetch;
mod handle;
mod health;
mod output;

pub use attempt::{Attempt, AttemptEngine};
pub use fallback::{FallbackPolicy, FallbackSequencer, PlaybackSuccess};
pub use fetch::{CachedFetcher, HttpFetcher};
pub use handle::{MediaError, MediaEvent, MediaEventKind, PlaybackHandle};
pub use health::{
    buffered_ahead, HealthSubscription, RecommendedAction, StreamHealthMonitor,
    StreamQualityMetrics,
};
pub use output::{default_device_name, list_audio_devices, AudioOutput, RodioHandle};

#[cfg(test)]
pub use attempt::AttemptOutcome;
#[cfg(test)]
pub use handle::{MediaErrorKind, TimeRange};
