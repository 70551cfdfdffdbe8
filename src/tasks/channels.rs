use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::FallbackError;
use crate::quran::VerseKey;

/// Commands from the controller to the sequencer task
#[derive(Debug)]
pub enum QueueCommand {
    /// Begin, or resume from the current index
    Start,
    /// Stop audio but keep the position
    Pause,
    /// Stop audio and forget the position
    Stop,
    Next,
    Prev,
    /// Play one verse without chaining into the queue
    PlaySingle {
        verse: VerseKey,
        index: usize,
        reply: oneshot::Sender<Result<(), FallbackError>>,
    },
    /// Shut the sequencer down
    Quit,
}

/// Progress notifications from the sequencer task
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    VerseStarted {
        index: usize,
        verse: VerseKey,
        /// 0 for the first play of the verse
        repeat: u32,
    },
    VerseFinished {
        index: usize,
        verse: VerseKey,
    },
    /// Every source for the verse failed; the queue skipped ahead
    VerseFailed {
        index: usize,
        verse: VerseKey,
        error: FallbackError,
    },
    /// The queue wrapped back to its first verse
    Looped,
    /// A non-looping queue played its last verse
    QueueComplete,
    Paused,
    Stopped,
    /// Sequencer is shutting down
    Shutdown,
}

/// Channel bundle for communication
pub struct Channels {
    /// Commands to the sequencer
    pub cmd_tx: mpsc::Sender<QueueCommand>,
    pub cmd_rx: mpsc::Receiver<QueueCommand>,

    /// Events from the sequencer, fanned out to every listener
    pub event_tx: broadcast::Sender<QueueEvent>,
}

impl Channels {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(64);

        Self {
            cmd_tx,
            cmd_rx,
            event_tx,
        }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}
