mod app;
mod cache;
mod catalog;
mod cli;
mod error;
mod metadata;
mod playback;
mod quran;
mod resolver;
mod service;
mod tasks;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::app::{PlaybackState, QueueOptions};
use crate::cache::AudioCache;
use crate::catalog::{find_reciter, ReciterId, SourceCatalog, RECITERS};
use crate::cli::{Args, Command, PlayArgs};
use crate::error::{Result, TilawaError};
use crate::metadata::{MetadataService, MetadataSettings};
use crate::playback::{
    buffered_ahead, default_device_name, list_audio_devices, AudioOutput, CachedFetcher,
    FallbackPolicy, HealthSubscription, HttpFetcher, PlaybackHandle, RodioHandle,
};
use crate::quran::{
    global_index_to_verse_key, parse_selection, verse_key_to_global_index, VerseKey, TOTAL_VERSES,
};
use crate::service::RecitationService;
use crate::tasks::{QueueController, QueueEvent};

/// How often playback progress is logged
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    debug!("tilawa v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!("{}", e);
        if e.is_recoverable() {
            info!("This may be temporary; try again in a moment");
        }
        return Err(e);
    }

    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

async fn run(args: Args) -> Result<()> {
    match &args.command {
        Command::Play(play) => play_command(&args, play).await,
        Command::Resolve { verse, reciter, api } => {
            resolve_command(&args, verse, *reciter, *api).await
        }
        Command::Locate { target } => locate_command(target),
        Command::Chapters {
            chapter,
            translation,
            refresh,
        } => chapters_command(&args, *chapter, *translation, *refresh).await,
        Command::Reciters => {
            reciters_command();
            Ok(())
        }
        Command::Devices => {
            devices_command();
            Ok(())
        }
    }
}

/// Play a selection of verses until done or Ctrl-C
async fn play_command(args: &Args, play: &PlayArgs) -> Result<()> {
    let verses = parse_selection(&play.selection())?;
    let catalog = Arc::new(SourceCatalog::builtin()?);
    if !catalog.supports(play.reciter) {
        warn!(reciter = %play.reciter, "Reciter not carried by any mirror, only the fallback recitation will be tried");
    }
    let options = QueueOptions::from_args(play);

    info!(
        verses = verses.len(),
        reciter = %play.reciter,
        repeat = options.repeat_target,
        looping = options.loop_enabled,
        "Starting session"
    );

    // Initialize audio output and the handle playing through it
    let output = AudioOutput::open(play.device)?;
    let cache = Arc::new(AudioCache::new());
    let fetcher = Arc::new(CachedFetcher::new(HttpFetcher::new()?, Arc::clone(&cache)));
    let handle = Arc::new(RodioHandle::new(&output, fetcher)?);
    handle.set_volume(play.volume);
    handle.set_speed(play.speed);

    let service = Arc::new(RecitationService::new(
        catalog,
        cache,
        FallbackPolicy::from_args(args),
    ));

    let single = verses.len() == 1 && options.repeat_target == 1 && !options.loop_enabled;
    let first = verses.first().copied();
    let queue = service.build_queue(play.reciter, verses, &options, handle.clone());
    let mut events = queue.subscribe();

    // A lone verse surfaces its failure instead of being skipped
    if let Some(verse) = first.filter(|_| single) {
        let result = tokio::select! {
            result = queue.play_single(verse, 0) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping");
                Ok(())
            }
        };
        queue.shutdown().await;
        return result.map_err(TilawaError::from);
    }

    queue.start().await;
    info!("Enter pauses or resumes, n next, p previous, s status, q quit");

    let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
    let mut health: Option<(String, HealthSubscription)> = None;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    let mut paused = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(QueueEvent::VerseStarted { index, verse, repeat }) => {
                    info!(index, %verse, repeat = repeat + 1, "Reciting");
                }
                Ok(QueueEvent::VerseFailed { verse, error, .. }) => {
                    warn!(%verse, %error, "Could not play verse");
                }
                Ok(QueueEvent::Looped) => info!("Starting over"),
                Ok(QueueEvent::QueueComplete) | Ok(QueueEvent::Shutdown) => break,
                Ok(_) => {}
                Err(RecvError::Closed) => break,
                Err(e) => debug!(error = %e, "Queue event stream"),
            },

            line = input.next_line(), if input_open => match line {
                Ok(Some(line)) => {
                    if !handle_input(&queue, line.trim(), &mut paused).await {
                        queue.stop().await;
                        break;
                    }
                }
                Ok(None) => input_open = false,
                Err(e) => {
                    debug!(error = %e, "Reading controls");
                    input_open = false;
                }
            },

            _ = progress.tick() => {
                watch_stream_health(&service, handle.source(), &mut health);
                let state = playback_state(&handle);
                debug!(
                    playing = state.is_playing,
                    position_secs = state.current_time.as_secs(),
                    progress = ?state.progress(),
                    buffered_secs = state.buffered_ahead.as_secs(),
                    loading = state.loading,
                    "Progress"
                );
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping");
                queue.stop().await;
                break;
            }
        }
    }

    queue.shutdown().await;
    info!("Session finished");
    Ok(())
}

/// Apply one typed control; returns false to quit
async fn handle_input(queue: &QueueController, input: &str, paused: &mut bool) -> bool {
    match input {
        "" if *paused => {
            queue.start().await;
            *paused = false;
        }
        "" => {
            queue.pause().await;
            *paused = true;
        }
        "n" => queue.next().await,
        "p" => queue.prev().await,
        "s" => {
            let state = queue.state();
            match state.current() {
                Some((index, verse)) => println!(
                    "{} ({}/{}), repeat {}/{}{}",
                    verse,
                    index + 1,
                    state.items.len(),
                    state.current_repeat_count + 1,
                    state.repeat_target,
                    if *paused { ", paused" } else { "" }
                ),
                None => println!("Nothing playing"),
            }
        }
        "q" => return false,
        other => warn!(input = other, "Unknown control"),
    }
    true
}

/// Keep a health subscription on whichever stream is currently monitored
fn watch_stream_health(
    service: &RecitationService,
    source: Option<String>,
    health: &mut Option<(String, HealthSubscription)>,
) {
    let current = source.filter(|url| service.monitor().is_monitoring(url));
    if health.as_ref().map(|(url, _)| url) == current.as_ref() {
        return;
    }

    if let Some((_, subscription)) = health.take() {
        subscription.unsubscribe();
    }
    if let Some(url) = current {
        let subscription = service.subscribe_stream_health(&url, |url, metrics| {
            debug!(
                url,
                buffer_health = metrics.buffer_health_percent.round(),
                dropouts = metrics.dropout_count,
                stable = metrics.is_stable,
                "Stream health"
            );
        });
        *health = Some((url, subscription));
    }
}

fn playback_state(handle: &RodioHandle) -> PlaybackState {
    let current_time = handle.current_time();
    PlaybackState {
        is_playing: handle.is_playing(),
        current_time,
        duration: handle.duration(),
        volume: handle.volume(),
        speed: handle.speed(),
        buffered_ahead: buffered_ahead(&handle.buffered(), current_time),
        loading: handle.is_loading(),
    }
}

/// Print the ranked candidates for a verse
async fn resolve_command(args: &Args, verse: &str, reciter: ReciterId, api: bool) -> Result<()> {
    let verse: VerseKey = verse.parse()?;
    let catalog = SourceCatalog::builtin()?;

    match find_reciter(reciter) {
        Some(r) => println!("{} {} ({})", verse, r.display_name(), reciter),
        None => println!("{} unknown reciter {}", verse, reciter),
    }
    for candidate in catalog.candidates(reciter, verse) {
        println!("  {:>2}  {:<16} {}", candidate.priority, candidate.provider, candidate.url);
    }

    if api {
        let metadata = MetadataService::new(MetadataSettings::from_args(args))?;
        match metadata.verse_audio(reciter, verse).await? {
            Some(url) => println!("  api {}", url),
            None => println!("  api has no audio for this verse"),
        }
    }
    Ok(())
}

fn locate_command(target: &str) -> Result<()> {
    let target = target.trim();
    if target.contains(':') {
        println!("{} = {} of {}", target, verse_key_to_global_index(target)?, TOTAL_VERSES);
    } else {
        let index: u32 = target
            .parse()
            .map_err(|_| TilawaError::Config(format!("not a verse key or number: {}", target)))?;
        println!("{} = {}", index, global_index_to_verse_key(index)?);
    }
    Ok(())
}

async fn chapters_command(
    args: &Args,
    chapter: Option<u16>,
    translation: Option<u32>,
    refresh: bool,
) -> Result<()> {
    let metadata = MetadataService::new(MetadataSettings::from_args(args))?;
    if refresh {
        metadata.cache().clear();
    }

    if let Some(id) = chapter {
        let chapter = metadata.chapter(id).await?;
        println!(
            "{} {} ({}), {} verses",
            chapter.id, chapter.name_simple, chapter.name_arabic, chapter.verses_count
        );
        for verse in metadata.verses(id, translation).await?.iter() {
            println!("{:>7}  {}", verse.verse_key, verse.text_uthmani.as_deref().unwrap_or(""));
            for translation in &verse.translations {
                println!("         {}", translation.text);
            }
        }
        return Ok(());
    }

    for chapter in metadata.chapters().await?.iter() {
        println!(
            "{:>3}  {:<20} {:<24} {:>3} verses  {}",
            chapter.id,
            chapter.name_simple,
            chapter.meaning().unwrap_or(""),
            chapter.verses_count,
            chapter.revelation_place
        );
    }
    Ok(())
}

fn reciters_command() {
    for reciter in RECITERS {
        let providers: Vec<_> = reciter.providers().collect();
        println!("{:>3}  {:<40} {}", reciter.id, reciter.display_name(), providers.join(", "));
    }
}

fn devices_command() {
    let default = default_device_name();
    let devices = list_audio_devices();
    if devices.is_empty() {
        println!("No audio output devices found");
    }
    for device in devices {
        let marker = if Some(&device.name) == default.as_ref() { "*" } else { " " };
        println!("{} {:>2}  {}", marker, device.index, device.name);
    }
}
