use std::sync::Arc;
use std::time::Duration;

use crate::cli::PlayArgs;
use crate::quran::VerseKey;

/// Gap between repeats of the same verse
pub const REPEAT_GAP: Duration = Duration::from_millis(500);

/// Snapshot of what the active playback surface shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_time: Duration,
    pub duration: Option<Duration>,
    pub volume: f32,
    pub speed: f32,
    pub buffered_ahead: Duration,
    pub loading: bool,
}

impl PlaybackState {
    /// Progress as a fraction of the duration, when known
    pub fn progress(&self) -> Option<f32> {
        let duration = self.duration?.as_secs_f32();
        if duration <= 0.0 {
            return None;
        }
        Some((self.current_time.as_secs_f32() / duration).clamp(0.0, 1.0))
    }
}

/// How a verse queue is played
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    /// Times each verse is played before advancing (at least 1)
    pub repeat_target: u32,
    /// Silence between consecutive verses
    pub pause_between: Duration,
    /// Start over from the first verse after the last one
    pub loop_enabled: bool,
    /// Silence between repeats of one verse
    pub repeat_gap: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            repeat_target: 1,
            pause_between: Duration::ZERO,
            loop_enabled: false,
            repeat_gap: REPEAT_GAP,
        }
    }
}

impl QueueOptions {
    pub fn from_args(args: &PlayArgs) -> Self {
        Self {
            repeat_target: args.repeat.max(1),
            pause_between: args.pause_between,
            loop_enabled: args.loop_enabled,
            repeat_gap: REPEAT_GAP,
        }
    }
}

/// Where the queue goes after leaving a verse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the next index
    Next(usize),
    /// Wrapped back to the first verse
    Wrapped,
    /// Reached the end of a non-looping queue
    Finished,
}

/// What follows a successful play of the current verse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterSuccess {
    /// Replay the same verse after the repeat gap
    Repeat,
    /// Move on after the inter-verse pause
    Advance(Advance),
}

/// Position and repeat bookkeeping of a verse queue
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackQueueState {
    pub items: Arc<[VerseKey]>,
    /// `None` until started, and again after stop or completion
    pub current_index: Option<usize>,
    pub repeat_target: u32,
    pub current_repeat_count: u32,
    pub pause_between: Duration,
    pub loop_enabled: bool,
}

impl PlaybackQueueState {
    pub fn new(items: Vec<VerseKey>, options: &QueueOptions) -> Self {
        Self {
            items: items.into(),
            current_index: None,
            repeat_target: options.repeat_target.max(1),
            current_repeat_count: 0,
            pause_between: options.pause_between,
            loop_enabled: options.loop_enabled,
        }
    }

    pub fn current(&self) -> Option<(usize, VerseKey)> {
        let index = self.current_index?;
        self.items.get(index).map(|verse| (index, *verse))
    }

    /// Begin (or resume) at the current index, defaulting to the first verse
    pub fn begin(&mut self) {
        if self.current_index.is_none() {
            self.current_index = Some(0);
            self.current_repeat_count = 0;
        }
    }

    /// Bookkeeping after the current verse played successfully
    pub fn record_success(&mut self) -> AfterSuccess {
        if self.current_repeat_count + 1 < self.repeat_target {
            self.current_repeat_count += 1;
            AfterSuccess::Repeat
        } else {
            AfterSuccess::Advance(self.advance())
        }
    }

    /// Move past the current verse, resetting the repeat count
    pub fn advance(&mut self) -> Advance {
        self.current_repeat_count = 0;
        let next = self.current_index.map_or(0, |i| i + 1);

        if next < self.items.len() {
            self.current_index = Some(next);
            Advance::Next(next)
        } else if self.loop_enabled && !self.items.is_empty() {
            self.current_index = Some(0);
            Advance::Wrapped
        } else {
            self.current_index = None;
            Advance::Finished
        }
    }

    /// Step back one verse, staying at the first
    pub fn retreat(&mut self) {
        self.current_repeat_count = 0;
        self.current_index = Some(self.current_index.map_or(0, |i| i.saturating_sub(1)));
    }

    /// Jump to an index (clamped to the queue)
    pub fn jump_to(&mut self, index: usize) {
        self.current_repeat_count = 0;
        self.current_index = Some(index.min(self.items.len().saturating_sub(1)));
    }

    pub fn reset(&mut self) {
        self.current_index = None;
        self.current_repeat_count = 0;
    }
}
