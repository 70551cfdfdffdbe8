mod channels;
mod sequencer;

pub use channels::QueueEvent;
pub use sequencer::{QueueController, VersePlayer};
