//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::catalog::AudioCandidate;
use crate::error::{AttemptFailure, FallbackError};
use crate::playback::{
    Attempt, AttemptOutcome, MediaError, MediaErrorKind, MediaEvent, MediaEventKind,
    PlaybackHandle, TimeRange,
};
use crate::quran::VerseKey;
use crate::tasks::VersePlayer;

/// How long a scripted source takes to become ready
const READY_DELAY: Duration = Duration::from_millis(50);

/// Behaviour of one load of a scripted URL
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    /// Becomes playable shortly after loading
    Ready,
    /// Reports an error shortly after loading
    Fail(MediaErrorKind),
    /// Never reports anything
    Hang,
    /// Becomes playable but rejects `play()`
    PlayFails(MediaErrorKind),
}

#[derive(Default)]
struct ScriptState {
    scripts: HashMap<String, VecDeque<Script>>,
    source: Option<String>,
    playing: bool,
    loads: Vec<String>,
    buffered: Vec<TimeRange>,
    current_time: Duration,
    duration: Option<Duration>,
    play_length: Option<Duration>,
    play_failure: Option<MediaErrorKind>,
}

struct ScriptedInner {
    state: Mutex<ScriptState>,
    generation: AtomicU64,
    events: broadcast::Sender<MediaEvent>,
}

impl ScriptedInner {
    fn emit_for(&self, generation: u64, kind: MediaEventKind) {
        let _ = self.events.send(MediaEvent { generation, kind });
    }
}

/// In-memory playback handle driven by per-URL scripts.
///
/// Each load of a URL consumes the next script queued for it; the last one
/// repeats. Unscripted URLs load fine.
pub struct ScriptedHandle {
    inner: Arc<ScriptedInner>,
}

impl ScriptedHandle {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ScriptedInner {
                state: Mutex::new(ScriptState::default()),
                generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Once playing, report `Ended` after this long
    pub fn with_play_length(self, length: Duration) -> Self {
        self.inner.state.lock().play_length = Some(length);
        self
    }

    pub fn script(&self, url: &str, scripts: impl IntoIterator<Item = Script>) {
        self.inner
            .state
            .lock()
            .scripts
            .insert(url.to_string(), scripts.into_iter().collect());
    }

    pub fn set_buffered(&self, ranges: Vec<TimeRange>) {
        self.inner.state.lock().buffered = ranges;
    }

    /// Emit an event for the current generation
    pub fn emit(&self, kind: MediaEventKind) {
        self.inner.emit_for(self.generation(), kind);
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().playing
    }

    /// URLs loaded so far, in order
    pub fn loads(&self) -> Vec<String> {
        self.inner.state.lock().loads.clone()
    }

    fn next_script(state: &mut ScriptState, url: &str) -> Script {
        match state.scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Script::Ready),
            Some(queue) => queue.front().cloned().unwrap_or(Script::Ready),
            None => Script::Ready,
        }
    }
}

impl Default for ScriptedHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackHandle for ScriptedHandle {
    fn set_source(&self, url: &str) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.inner.state.lock();
        state.source = Some(url.to_string());
        state.playing = false;
        state.play_failure = None;
        generation
    }

    fn source(&self) -> Option<String> {
        self.inner.state.lock().source.clone()
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn load(&self) {
        let generation = self.generation();
        let script = {
            let mut state = self.inner.state.lock();
            let Some(url) = state.source.clone() else {
                return;
            };
            state.loads.push(url.clone());
            let script = Self::next_script(&mut state, &url);
            if let Script::PlayFails(kind) = script {
                state.play_failure = Some(kind);
            }
            script
        };

        let kind = match script {
            Script::Ready | Script::PlayFails(_) => MediaEventKind::CanPlayThrough,
            Script::Fail(kind) => MediaEventKind::Error(MediaError::new(kind, "scripted failure")),
            Script::Hang => return,
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(READY_DELAY).await;
            if inner.generation.load(Ordering::SeqCst) == generation {
                inner.emit_for(generation, kind);
            }
        });
    }

    async fn play(&self) -> Result<(), MediaError> {
        let generation = self.generation();
        let play_length = {
            let mut state = self.inner.state.lock();
            if let Some(kind) = state.play_failure {
                return Err(MediaError::new(kind, "scripted play rejection"));
            }
            state.playing = true;
            state.play_length
        };
        self.inner.emit_for(generation, MediaEventKind::Playing);

        if let Some(length) = play_length {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(length).await;
                if inner.generation.load(Ordering::SeqCst) == generation {
                    inner.state.lock().playing = false;
                    inner.emit_for(generation, MediaEventKind::Ended);
                }
            });
        }
        Ok(())
    }

    fn pause(&self) {
        self.inner.state.lock().playing = false;
    }

    fn seek(&self, position: Duration) {
        self.inner.state.lock().current_time = position;
    }

    fn clear_error(&self) {}

    fn current_time(&self) -> Duration {
        self.inner.state.lock().current_time
    }

    fn duration(&self) -> Option<Duration> {
        self.inner.state.lock().duration
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.inner.state.lock().buffered.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.inner.events.subscribe()
    }

    fn stop(&self) {
        let old = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.inner.state.lock();
            state.playing = false;
            state.source = None;
        }
        self.inner.emit_for(old, MediaEventKind::Abort);
    }
}

#[derive(Default)]
struct MockAttemptState {
    succeed: HashSet<String>,
    calls: Vec<(String, Duration)>,
}

/// Attempt stub that fails every URL unless told otherwise
#[derive(Clone, Default)]
pub struct MockAttempt {
    state: Arc<Mutex<MockAttemptState>>,
}

impl MockAttempt {
    pub fn always_failing() -> Self {
        Self::default()
    }

    pub fn succeed_on(&self, url: &str) {
        self.state.lock().succeed.insert(url.to_string());
    }

    /// `(url, timeout)` of every attempt made
    pub fn calls(&self) -> Vec<(String, Duration)> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl Attempt for MockAttempt {
    async fn attempt(
        &self,
        _handle: &dyn PlaybackHandle,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        if cancel.is_cancelled() {
            return Err(AttemptFailure::Cancelled);
        }
        let mut state = self.state.lock();
        state.calls.push((url.to_string(), timeout));
        if state.succeed.contains(url) {
            Ok(())
        } else {
            Err(AttemptFailure::NetworkError("unreachable".into()))
        }
    }
}

/// `n` distinct candidates, in priority order
pub fn candidates(n: usize) -> Vec<AudioCandidate> {
    (0..n)
        .map(|i| AudioCandidate {
            url: format!("https://mirror{i}.example/audio/001001.mp3"),
            provider: "test",
            priority: i as u32,
        })
        .collect()
}

/// Verse player that takes a fixed time per verse
pub struct MockVersePlayer {
    play_time: Duration,
    plays: Mutex<Vec<VerseKey>>,
    failing: Mutex<HashSet<VerseKey>>,
    aborted: Mutex<HashSet<VerseKey>>,
    halts: AtomicUsize,
}

impl MockVersePlayer {
    pub fn new(play_time: Duration) -> Self {
        Self {
            play_time,
            plays: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            aborted: Mutex::new(HashSet::new()),
            halts: AtomicUsize::new(0),
        }
    }

    /// Every source for `verse` will fail
    pub fn fail_on(&self, verse: VerseKey) {
        self.failing.lock().insert(verse);
    }

    /// `verse` reports `Cancelled` on its own, as when the handle is taken
    /// over by someone else
    pub fn abort_on(&self, verse: VerseKey) {
        self.aborted.lock().insert(verse);
    }

    pub fn plays(&self) -> Vec<VerseKey> {
        self.plays.lock().clone()
    }

    pub fn halts(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersePlayer for MockVersePlayer {
    async fn play_verse(&self, verse: VerseKey, cancel: &CancellationToken) -> Result<(), FallbackError> {
        self.plays.lock().push(verse);
        if self.failing.lock().contains(&verse) {
            return Err(FallbackError::Exhausted {
                attempts: 2,
                last_error: AttemptFailure::NetworkError("unreachable".into()),
            });
        }
        if self.aborted.lock().contains(&verse) {
            return Err(FallbackError::Cancelled { attempts: 1 });
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(FallbackError::Cancelled { attempts: 1 }),
            _ = tokio::time::sleep(self.play_time) => Ok(()),
        }
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }
}
