use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::catalog::ReciterId;
use crate::metadata::{DEFAULT_API_BASE, DEFAULT_AUDIO_BASE};

#[derive(Parser, Debug, Clone)]
#[command(name = "tilawa")]
#[command(about = "Verse-by-verse Quran recitation player with resilient audio sources")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    // Fallback
    /// Timeout of the first attempt on each source (ms)
    #[arg(long, global = true, default_value = "8000")]
    pub attempt_timeout_ms: u64,

    /// Attempts per source URL before moving to the next one
    #[arg(long, global = true, default_value = "2", value_parser = clap::value_parser!(u32).range(1..=5))]
    pub max_retries: u32,

    /// Base delay between retries of the same URL (ms)
    #[arg(long, global = true, default_value = "250")]
    pub retry_delay_ms: u64,

    // Metadata
    /// Base URL of the chapter/verse metadata API
    #[arg(long, global = true, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Base URL that relative audio paths are joined onto
    #[arg(long, global = true, default_value = DEFAULT_AUDIO_BASE)]
    pub audio_base: String,

    /// Rate limit between API requests (ms)
    #[arg(long, global = true, default_value = "100")]
    pub rate_limit_ms: u64,

    // Debug
    /// Custom cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Play a verse, a verse range, or a whole chapter
    Play(PlayArgs),

    /// Print the ranked audio sources for a verse
    Resolve {
        /// Verse key, e.g. 2:255
        verse: String,

        /// Reciter id
        #[arg(short, long, default_value = "7")]
        reciter: ReciterId,

        /// Also look the verse up in the recitation API
        #[arg(long)]
        api: bool,
    },

    /// Convert between verse keys and global verse numbers
    Locate {
        /// Verse key (2:255) or global number (262)
        target: String,
    },

    /// List chapters from the metadata API, or the verses of one chapter
    Chapters {
        /// Chapter number to show in full
        #[arg(value_parser = clap::value_parser!(u16).range(1..=114))]
        chapter: Option<u16>,

        /// Translation resource id to print under each verse
        #[arg(long, value_name = "ID")]
        translation: Option<u32>,

        /// Drop cached metadata before fetching
        #[arg(long)]
        refresh: bool,
    },

    /// List built-in reciters and the providers that carry them
    Reciters,

    /// List audio output devices
    Devices,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlayArgs {
    /// First verse (2:1), range (2:1-2:10 or 2:1-10) or chapter (36)
    pub from: String,

    /// Last verse of the range
    pub to: Option<String>,

    /// Reciter id
    #[arg(short, long, default_value = "7")]
    pub reciter: ReciterId,

    /// Times each verse is played
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=100))]
    pub repeat: u32,

    /// Silence between verses (seconds, up to 60)
    #[arg(long, default_value = "0", value_parser = parse_pause)]
    pub pause_between: Duration,

    /// Start over after the last verse
    #[arg(long = "loop")]
    pub loop_enabled: bool,

    /// Playback volume (0.0 to 1.0)
    #[arg(long, default_value = "1.0")]
    pub volume: f32,

    /// Playback speed (0.5 to 2.0)
    #[arg(long, default_value = "1.0")]
    pub speed: f32,

    /// Audio output device index (see `devices`)
    #[arg(long)]
    pub device: Option<usize>,
}

impl PlayArgs {
    /// The selection as one string for the verse range parser
    pub fn selection(&self) -> String {
        match &self.to {
            Some(to) => format!("{}-{}", self.from, to),
            None => self.from.clone(),
        }
    }
}

/// Longest accepted `--pause-between`
const MAX_PAUSE_SECS: f32 = 60.0;

fn parse_pause(s: &str) -> Result<Duration, String> {
    let secs: f32 = s.parse().map_err(|_| format!("`{}` is not a number of seconds", s))?;
    // NaN and infinities fail the range check too
    if !(0.0..=MAX_PAUSE_SECS).contains(&secs) {
        return Err(format!("pause must be between 0 and {} seconds", MAX_PAUSE_SECS));
    }
    Ok(Duration::from_secs_f32(secs))
}
