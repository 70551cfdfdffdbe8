use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::app::{Advance, AfterSuccess, PlaybackQueueState, QueueOptions};
use crate::error::FallbackError;
use crate::quran::VerseKey;

use super::channels::{Channels, QueueCommand, QueueEvent};

/// Plays a single verse from start to finish
#[async_trait]
pub trait VersePlayer: Send + Sync {
    /// Resolves once the verse has finished playing, or with why it couldn't
    async fn play_verse(&self, verse: VerseKey, cancel: &CancellationToken) -> Result<(), FallbackError>;

    /// Silence whatever is playing right now
    fn halt(&self);
}

/// A verse being played by a spawned task
struct Step {
    index: usize,
    verse: VerseKey,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), FallbackError>>,
}

enum Phase {
    Idle,
    Playing(Step),
    /// Single verse play whose outcome goes back to the caller
    Single(Step, Option<oneshot::Sender<Result<(), FallbackError>>>),
    /// Gap before the next (or repeated) verse
    Waiting(Pin<Box<Sleep>>),
}

enum PhaseDone {
    Played(Result<(), FallbackError>),
    Waited,
}

/// Task that walks a verse queue, one verse at a time
pub struct Sequencer<P> {
    player: Arc<P>,
    state: Arc<Mutex<PlaybackQueueState>>,
    repeat_gap: Duration,
    phase: Phase,
    cmd_rx: mpsc::Receiver<QueueCommand>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl<P: VersePlayer + 'static> Sequencer<P> {
    pub fn new(
        player: Arc<P>,
        state: Arc<Mutex<PlaybackQueueState>>,
        repeat_gap: Duration,
        cmd_rx: mpsc::Receiver<QueueCommand>,
        event_tx: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            player,
            state,
            repeat_gap,
            phase: Phase::Idle,
            cmd_rx,
            event_tx,
        }
    }

    /// Run the sequencer task
    #[instrument(skip(self), name = "sequencer")]
    pub async fn run(mut self) {
        info!(verses = self.state.lock().items.len(), "Sequencer starting");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(QueueCommand::Quit) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },

                done = phase_done(&mut self.phase) => self.on_phase_done(done),
            }
        }

        self.interrupt();
        info!("Sequencer shutting down");
        self.emit(QueueEvent::Shutdown);
    }

    fn handle_command(&mut self, cmd: QueueCommand) {
        debug!(?cmd, "Queue command");
        match cmd {
            QueueCommand::Start => {
                if matches!(self.phase, Phase::Playing(_) | Phase::Waiting(_)) {
                    return;
                }
                self.interrupt();
                self.state.lock().begin();
                self.play_current();
            }
            QueueCommand::Pause => {
                self.interrupt();
                self.emit(QueueEvent::Paused);
            }
            QueueCommand::Stop => {
                self.interrupt();
                self.state.lock().reset();
                self.emit(QueueEvent::Stopped);
            }
            QueueCommand::Next => {
                let was_active = self.interrupt();
                let advance = self.state.lock().advance();
                self.moved(advance, was_active);
            }
            QueueCommand::Prev => {
                let was_active = self.interrupt();
                self.state.lock().retreat();
                if was_active {
                    self.play_current();
                }
            }
            QueueCommand::PlaySingle { verse, index, reply } => {
                self.interrupt();
                self.state.lock().jump_to(index);
                let step = self.spawn_step(index, verse, 0);
                self.phase = Phase::Single(step, Some(reply));
            }
            QueueCommand::Quit => {}
        }
    }

    fn on_phase_done(&mut self, done: PhaseDone) {
        match (std::mem::replace(&mut self.phase, Phase::Idle), done) {
            (Phase::Waiting(_), PhaseDone::Waited) => self.play_current(),

            (Phase::Single(step, reply), PhaseDone::Played(result)) => {
                match &result {
                    Ok(()) => self.emit(QueueEvent::VerseFinished {
                        index: step.index,
                        verse: step.verse,
                    }),
                    Err(FallbackError::Cancelled { .. }) if step.cancel.is_cancelled() => {}
                    Err(e) => self.emit(QueueEvent::VerseFailed {
                        index: step.index,
                        verse: step.verse,
                        error: e.clone(),
                    }),
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }

            (Phase::Playing(step), PhaseDone::Played(Ok(()))) => {
                self.emit(QueueEvent::VerseFinished {
                    index: step.index,
                    verse: step.verse,
                });
                let after = self.state.lock().record_success();
                match after {
                    AfterSuccess::Repeat => self.wait(self.repeat_gap),
                    AfterSuccess::Advance(advance) => self.moved_after_gap(advance),
                }
            }

            // Only a cancellation we asked for is quiet; anything else skips like a failure
            (Phase::Playing(step), PhaseDone::Played(Err(FallbackError::Cancelled { .. })))
                if step.cancel.is_cancelled() => {}

            (Phase::Playing(step), PhaseDone::Played(Err(error))) => {
                warn!(verse = %step.verse, %error, "Skipping verse");
                self.emit(QueueEvent::VerseFailed {
                    index: step.index,
                    verse: step.verse,
                    error,
                });
                let advance = self.state.lock().advance();
                self.moved(advance, true);
            }

            (phase, _) => self.phase = phase,
        }
    }

    /// React to a position change, playing straight away when `play` is set
    fn moved(&mut self, advance: Advance, play: bool) {
        match advance {
            Advance::Finished => self.complete(),
            Advance::Wrapped => {
                self.emit(QueueEvent::Looped);
                if play {
                    self.play_current();
                }
            }
            Advance::Next(_) => {
                if play {
                    self.play_current();
                }
            }
        }
    }

    fn moved_after_gap(&mut self, advance: Advance) {
        let pause = self.state.lock().pause_between;
        match advance {
            Advance::Finished => self.complete(),
            Advance::Wrapped => {
                self.emit(QueueEvent::Looped);
                self.wait(pause);
            }
            Advance::Next(_) => self.wait(pause),
        }
    }

    fn complete(&mut self) {
        info!("Queue complete");
        self.phase = Phase::Idle;
        self.emit(QueueEvent::QueueComplete);
    }

    fn wait(&mut self, gap: Duration) {
        self.phase = Phase::Waiting(Box::pin(tokio::time::sleep(gap)));
    }

    fn play_current(&mut self) {
        let current = {
            let state = self.state.lock();
            state.current().map(|(index, verse)| (index, verse, state.current_repeat_count))
        };

        match current {
            Some((index, verse, repeat)) => {
                let step = self.spawn_step(index, verse, repeat);
                self.phase = Phase::Playing(step);
            }
            None => {
                self.state.lock().reset();
                self.complete();
            }
        }
    }

    fn spawn_step(&self, index: usize, verse: VerseKey, repeat: u32) -> Step {
        info!(index, %verse, repeat, "Playing verse");
        self.emit(QueueEvent::VerseStarted { index, verse, repeat });

        let cancel = CancellationToken::new();
        let player = Arc::clone(&self.player);
        let token = cancel.clone();
        let task = tokio::spawn(async move { player.play_verse(verse, &token).await });

        Step {
            index,
            verse,
            cancel,
            task,
        }
    }

    /// Abandon the current phase, returning whether anything was in progress
    fn interrupt(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => false,
            Phase::Waiting(_) => true,
            Phase::Playing(step) => {
                step.cancel.cancel();
                self.player.halt();
                true
            }
            Phase::Single(step, reply) => {
                step.cancel.cancel();
                self.player.halt();
                if let Some(reply) = reply {
                    let _ = reply.send(Err(FallbackError::Cancelled { attempts: 0 }));
                }
                false
            }
        }
    }

    fn emit(&self, event: QueueEvent) {
        // No listeners is fine
        let _ = self.event_tx.send(event);
    }
}

async fn phase_done(phase: &mut Phase) -> PhaseDone {
    match phase {
        Phase::Idle => std::future::pending().await,
        Phase::Playing(step) | Phase::Single(step, _) => {
            let result = (&mut step.task)
                .await
                .unwrap_or(Err(FallbackError::Cancelled { attempts: 0 }));
            PhaseDone::Played(result)
        }
        Phase::Waiting(sleep) => {
            sleep.as_mut().await;
            PhaseDone::Waited
        }
    }
}

/// Handle to a running [`Sequencer`]
pub struct QueueController {
    cmd_tx: mpsc::Sender<QueueCommand>,
    event_tx: broadcast::Sender<QueueEvent>,
    state: Arc<Mutex<PlaybackQueueState>>,
    task: JoinHandle<()>,
}

impl QueueController {
    /// Spawn a sequencer over `items`
    pub fn spawn<P: VersePlayer + 'static>(
        player: Arc<P>,
        items: Vec<VerseKey>,
        options: &QueueOptions,
    ) -> Self {
        let channels = Channels::new();
        let state = Arc::new(Mutex::new(PlaybackQueueState::new(items, options)));

        let sequencer = Sequencer::new(
            player,
            Arc::clone(&state),
            options.repeat_gap,
            channels.cmd_rx,
            channels.event_tx.clone(),
        );
        let task = tokio::spawn(sequencer.run());

        Self {
            cmd_tx: channels.cmd_tx,
            event_tx: channels.event_tx,
            state,
            task,
        }
    }

    pub async fn start(&self) {
        self.send(QueueCommand::Start).await;
    }

    pub async fn pause(&self) {
        self.send(QueueCommand::Pause).await;
    }

    pub async fn stop(&self) {
        self.send(QueueCommand::Stop).await;
    }

    pub async fn next(&self) {
        self.send(QueueCommand::Next).await;
    }

    pub async fn prev(&self) {
        self.send(QueueCommand::Prev).await;
    }

    /// Play one verse on its own and report how it went
    pub async fn play_single(&self, verse: VerseKey, index: usize) -> Result<(), FallbackError> {
        let (reply, rx) = oneshot::channel();
        self.send(QueueCommand::PlaySingle { verse, index, reply }).await;
        rx.await.unwrap_or(Err(FallbackError::Cancelled { attempts: 0 }))
    }

    /// Snapshot of the queue position
    pub fn state(&self) -> PlaybackQueueState {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the sequencer and wait for it to exit
    pub async fn shutdown(self) {
        self.send(QueueCommand::Quit).await;
        let _ = self.task.await;
    }

    async fn send(&self, cmd: QueueCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            debug!("Sequencer already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockVersePlayer;

    fn verses(n: u16) -> Vec<VerseKey> {
        (1..=n).map(|v| VerseKey::new(2, v).unwrap()).collect()
    }

    fn options(repeat: u32, looping: bool) -> QueueOptions {
        QueueOptions {
            repeat_target: repeat,
            pause_between: Duration::from_secs(1),
            loop_enabled: looping,
            ..QueueOptions::default()
        }
    }

    async fn wait_for<F>(rx: &mut broadcast::Receiver<QueueEvent>, mut pred: F) -> QueueEvent
    where
        F: FnMut(&QueueEvent) -> bool,
    {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    async fn collect_until_complete(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv().await.unwrap();
            let done = event == QueueEvent::QueueComplete;
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_verse_is_skipped() {
        let items = verses(3);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(2)));
        player.fail_on(items[1]);
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(1, false));
        let mut rx = queue.subscribe();

        queue.start().await;
        let events = collect_until_complete(&mut rx).await;

        assert_eq!(player.plays(), items);
        assert!(events.iter().any(|e| matches!(
            e,
            QueueEvent::VerseFailed { index: 1, error: FallbackError::Exhausted { .. }, .. }
        )));
        assert!(events.contains(&QueueEvent::VerseFinished { index: 2, verse: items[2] }));
        assert_eq!(queue.state().current_index, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrequested_cancel_skips_verse() {
        let items = verses(3);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(2)));
        player.abort_on(items[1]);
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(1, false));
        let mut rx = queue.subscribe();

        queue.start().await;
        let events = collect_until_complete(&mut rx).await;

        assert_eq!(player.plays(), items);
        assert!(events.iter().any(|e| matches!(
            e,
            QueueEvent::VerseFailed { index: 1, error: FallbackError::Cancelled { .. }, .. }
        )));
        assert!(events.contains(&QueueEvent::VerseFinished { index: 2, verse: items[2] }));
        assert_eq!(queue.state().current_index, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_verse_repeats_before_advancing() {
        let items = verses(2);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(1)));
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(3, false));
        let mut rx = queue.subscribe();

        queue.start().await;
        let events = collect_until_complete(&mut rx).await;

        assert_eq!(
            player.plays(),
            vec![items[0], items[0], items[0], items[1], items[1], items[1]]
        );
        let repeats: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::VerseStarted { repeat, .. } => Some(*repeat),
                _ => None,
            })
            .collect();
        assert_eq!(repeats, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_wraps_to_first_verse() {
        let items = verses(2);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(1)));
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(1, true));
        let mut rx = queue.subscribe();

        queue.start().await;
        wait_for(&mut rx, |e| *e == QueueEvent::Looped).await;
        assert_eq!(queue.state().current_index, Some(0));

        let event = wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { .. })).await;
        assert_eq!(event, QueueEvent::VerseStarted { index: 0, verse: items[0], repeat: 0 });

        queue.shutdown().await;
        assert_eq!(&player.plays()[..2], &[items[0], items[1]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_keeps_position_and_resume_continues() {
        let items = verses(3);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(10)));
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(1, false));
        let mut rx = queue.subscribe();

        queue.start().await;
        wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { index: 1, .. })).await;

        queue.pause().await;
        wait_for(&mut rx, |e| *e == QueueEvent::Paused).await;
        assert_eq!(queue.state().current_index, Some(1));
        assert!(player.halts() >= 1);

        // Nothing plays while paused
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(player.plays(), vec![items[0], items[1]]);

        queue.start().await;
        let event = wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { .. })).await;
        assert_eq!(event, QueueEvent::VerseStarted { index: 1, verse: items[1], repeat: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_position() {
        let items = verses(3);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(10)));
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(2, false));
        let mut rx = queue.subscribe();

        queue.start().await;
        wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { repeat: 1, .. })).await;

        queue.stop().await;
        wait_for(&mut rx, |e| *e == QueueEvent::Stopped).await;
        let state = queue.state();
        assert_eq!(state.current_index, None);
        assert_eq!(state.current_repeat_count, 0);

        queue.start().await;
        let event = wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { .. })).await;
        assert_eq!(event, QueueEvent::VerseStarted { index: 0, verse: items[0], repeat: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_and_prev() {
        let items = verses(3);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(10)));
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(1, false));
        let mut rx = queue.subscribe();

        queue.start().await;
        wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { index: 0, .. })).await;

        queue.next().await;
        wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { index: 1, .. })).await;

        queue.prev().await;
        wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { index: 0, .. })).await;

        assert_eq!(player.plays(), vec![items[0], items[1], items[0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_single_does_not_chain() {
        let items = verses(3);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(5)));
        let queue = QueueController::spawn(player.clone(), items.clone(), &options(1, false));
        let mut rx = queue.subscribe();

        queue.start().await;
        wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { index: 0, .. })).await;

        assert_eq!(queue.play_single(items[2], 2).await, Ok(()));
        assert_eq!(queue.state().current_index, Some(2));

        let more = tokio::time::timeout(
            Duration::from_secs(60),
            wait_for(&mut rx, |e| matches!(e, QueueEvent::VerseStarted { index: 0 | 1, .. })),
        )
        .await;
        assert!(more.is_err());
        assert_eq!(player.plays(), vec![items[0], items[2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_single_surfaces_failure() {
        let items = verses(2);
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(1)));
        player.fail_on(items[0]);
        let queue = QueueController::spawn(player, items.clone(), &QueueOptions::default());

        let result = queue.play_single(items[0], 0).await;
        assert!(matches!(result, Err(FallbackError::Exhausted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_completes() {
        let player = Arc::new(MockVersePlayer::new(Duration::from_secs(1)));
        let queue = QueueController::spawn(player.clone(), Vec::new(), &options(1, true));
        let mut rx = queue.subscribe();

        queue.start().await;
        wait_for(&mut rx, |e| *e == QueueEvent::QueueComplete).await;
        assert!(player.plays().is_empty());
    }
}
