use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::PlaybackError;

use super::fetch::ByteFetcher;
use super::handle::{
    MediaError, MediaErrorKind, MediaEvent, MediaEventKind, PlaybackHandle, TimeRange,
};

/// How often a playing sink is checked for having drained
const END_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fade applied to the start of each clip to avoid clicks
const FADE_IN: Duration = Duration::from_millis(15);

type VerseSource = Decoder<Cursor<Bytes>>;

#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub index: usize,
}

/// Output devices in host order; `index` is what `--device` takes
pub fn list_audio_devices() -> Vec<AudioDevice> {
    match rodio::cpal::default_host().output_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| AudioDevice {
                name: device.name().unwrap_or_else(|_| format!("Output {}", index)),
                index,
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Could not enumerate output devices");
            Vec::new()
        }
    }
}

/// Name of the default output device, if any
pub fn default_device_name() -> Option<String> {
    rodio::cpal::default_host()
        .default_output_device()
        .and_then(|device| device.name().ok())
}

fn open_default() -> Result<(OutputStream, OutputStreamHandle), PlaybackError> {
    OutputStream::try_default()
        .map_err(|e| PlaybackError::Device(format!("Failed to open audio device: {}", e)))
}

fn open_stream(device_index: Option<usize>) -> Result<(OutputStream, OutputStreamHandle), PlaybackError> {
    let Some(index) = device_index else {
        return open_default();
    };

    let host = rodio::cpal::default_host();
    let device = host.output_devices().ok().and_then(|mut devices| devices.nth(index));

    match device {
        Some(device) => {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            info!(device = %name, index, "Using selected audio device");
            OutputStream::try_from_device(&device).or_else(|e| {
                warn!(error = %e, "Failed to open selected device, using default");
                open_default()
            })
        }
        None => {
            warn!(index, "Device index out of range, using default");
            open_default()
        }
    }
}

/// Open audio output, owned by a dedicated thread.
///
/// The underlying stream cannot move between threads, so it lives on its own
/// thread for as long as this value is alive.
pub struct AudioOutput {
    stream_handle: OutputStreamHandle,
    /// Dropping this releases the output thread
    _keepalive: std_mpsc::Sender<()>,
}

impl AudioOutput {
    #[instrument]
    pub fn open(device_index: Option<usize>) -> Result<Self, PlaybackError> {
        info!("Initializing audio output");

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (keepalive, released) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || match open_stream(device_index) {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Blocks until the sender is dropped
                    let _ = released.recv();
                    drop(stream);
                    debug!("Audio output closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| PlaybackError::Device(format!("Failed to spawn audio thread: {}", e)))?;

        let stream_handle = ready_rx.recv().map_err(|_| PlaybackError::NoDevice)??;
        debug!("Audio output initialized");

        Ok(Self {
            stream_handle,
            _keepalive: keepalive,
        })
    }

    fn sink(&self) -> Result<Sink, PlaybackError> {
        Sink::try_new(&self.stream_handle)
            .map_err(|e| PlaybackError::Device(format!("Failed to create audio sink: {}", e)))
    }
}

/// Per-source state, replaced on every `set_source`
#[derive(Default)]
struct SourceState {
    url: Option<String>,
    decoded: Option<VerseSource>,
    duration: Option<Duration>,
    bytes_loaded: Option<u64>,
    error: Option<MediaError>,
    load_task: Option<JoinHandle<()>>,
    end_task: Option<JoinHandle<()>>,
}

impl SourceState {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        if let Some(task) = self.end_task.take() {
            task.abort();
        }
    }
}

struct RodioInner {
    sink: Sink,
    fetcher: Arc<dyn ByteFetcher>,
    generation: AtomicU64,
    state: Mutex<SourceState>,
    events: broadcast::Sender<MediaEvent>,
}

impl RodioInner {
    fn emit(&self, generation: u64, kind: MediaEventKind) {
        let _ = self.events.send(MediaEvent { generation, kind });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Fetch and decode the source of one generation
    async fn load(self: Arc<Self>, url: String, generation: u64) {
        let bytes = match self.fetcher.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(generation, MediaError::new(MediaErrorKind::Network, e.to_string()));
                return;
            }
        };
        let len = bytes.len() as u64;

        let decoded = match Decoder::new(Cursor::new(bytes)) {
            Ok(decoded) => decoded,
            Err(rodio::decoder::DecoderError::UnrecognizedFormat) => {
                self.fail(
                    generation,
                    MediaError::new(MediaErrorKind::SourceNotSupported, "unrecognized audio format"),
                );
                return;
            }
            Err(e) => {
                self.fail(generation, MediaError::new(MediaErrorKind::Decode, e.to_string()));
                return;
            }
        };

        {
            let mut state = self.state.lock();
            if !self.is_current(generation) {
                return;
            }
            state.duration = decoded.total_duration();
            state.bytes_loaded = Some(len);
            state.decoded = Some(decoded);
        }

        debug!(%url, bytes = len, generation, "Source ready");
        self.emit(generation, MediaEventKind::CanPlayThrough);
    }

    fn fail(&self, generation: u64, error: MediaError) {
        {
            let mut state = self.state.lock();
            if !self.is_current(generation) {
                return;
            }
            state.error = Some(error.clone());
        }
        debug!(%error, generation, "Source failed to load");
        self.emit(generation, MediaEventKind::Error(error));
    }

    /// Report `Ended` once the sink drains
    async fn watch_end(self: Arc<Self>, generation: u64) {
        let mut ticker = tokio::time::interval(END_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if !self.is_current(generation) {
                return;
            }
            if self.sink.empty() {
                debug!(generation, "Source ended");
                self.emit(generation, MediaEventKind::Ended);
                return;
            }
        }
    }
}

/// [`PlaybackHandle`] that fetches a whole clip, decodes it and plays it
/// through a rodio sink.
pub struct RodioHandle {
    inner: Arc<RodioInner>,
}

impl RodioHandle {
    pub fn new(output: &AudioOutput, fetcher: Arc<dyn ByteFetcher>) -> Result<Self, PlaybackError> {
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(RodioInner {
                sink: output.sink()?,
                fetcher,
                generation: AtomicU64::new(0),
                state: Mutex::new(SourceState::default()),
                events,
            }),
        })
    }

    /// Set playback volume (0.0 to 1.0)
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        debug!(volume, "Setting volume");
        self.inner.sink.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.inner.sink.volume()
    }

    /// Set playback speed (0.5 to 2.0)
    pub fn set_speed(&self, speed: f32) {
        let speed = speed.clamp(0.5, 2.0);
        debug!(speed, "Setting speed");
        self.inner.sink.set_speed(speed);
    }

    pub fn speed(&self) -> f32 {
        self.inner.sink.speed()
    }

    pub fn is_playing(&self) -> bool {
        !self.inner.sink.empty() && !self.inner.sink.is_paused()
    }

    /// Whether a source is set but not yet playable
    pub fn is_loading(&self) -> bool {
        let state = self.inner.state.lock();
        state.load_task.as_ref().is_some_and(|t| !t.is_finished()) && state.error.is_none()
    }
}

#[async_trait]
impl PlaybackHandle for RodioHandle {
    fn set_source(&self, url: &str) -> u64 {
        let mut state = self.inner.state.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        state.abort_tasks();
        self.inner.sink.clear();
        *state = SourceState {
            url: Some(url.to_string()),
            ..SourceState::default()
        };
        generation
    }

    fn source(&self) -> Option<String> {
        self.inner.state.lock().url.clone()
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn load(&self) {
        let mut state = self.inner.state.lock();
        let Some(url) = state.url.clone() else {
            return;
        };
        let generation = self.generation();
        if let Some(task) = state.load_task.take() {
            task.abort();
        }
        state.decoded = None;
        state.error = None;
        state.load_task = Some(tokio::spawn(Arc::clone(&self.inner).load(url, generation)));
    }

    async fn play(&self) -> Result<(), MediaError> {
        let generation = self.generation();
        let mut state = self.inner.state.lock();

        if let Some(error) = &state.error {
            return Err(error.clone());
        }

        match state.decoded.take() {
            Some(source) => {
                self.inner.sink.clear();
                self.inner.sink.append(source.fade_in(FADE_IN));
            }
            // Resuming a paused source
            None if !self.inner.sink.empty() => {}
            None => {
                return Err(MediaError::new(
                    MediaErrorKind::SourceNotSupported,
                    "no playable source loaded",
                ));
            }
        }
        self.inner.sink.play();

        if let Some(task) = state.end_task.take() {
            task.abort();
        }
        state.end_task = Some(tokio::spawn(Arc::clone(&self.inner).watch_end(generation)));
        drop(state);

        self.inner.emit(generation, MediaEventKind::Playing);
        Ok(())
    }

    fn pause(&self) {
        self.inner.sink.pause();
    }

    fn seek(&self, position: Duration) {
        if self.inner.sink.empty() {
            return;
        }
        if let Err(e) = self.inner.sink.try_seek(position) {
            debug!(error = %e, "Seek not supported by source");
        }
    }

    fn clear_error(&self) {
        self.inner.state.lock().error = None;
    }

    fn current_time(&self) -> Duration {
        self.inner.sink.get_pos()
    }

    fn duration(&self) -> Option<Duration> {
        self.inner.state.lock().duration
    }

    /// The whole clip is fetched before it is playable
    fn buffered(&self) -> Vec<TimeRange> {
        let state = self.inner.state.lock();
        match (state.bytes_loaded, state.duration) {
            (Some(_), Some(duration)) => vec![TimeRange::new(Duration::ZERO, duration)],
            _ => Vec::new(),
        }
    }

    fn bytes_loaded(&self) -> Option<u64> {
        self.inner.state.lock().bytes_loaded
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.inner.events.subscribe()
    }

    fn stop(&self) {
        let old = {
            let mut state = self.inner.state.lock();
            let old = self.inner.generation.fetch_add(1, Ordering::SeqCst);
            state.abort_tasks();
            *state = SourceState::default();
            old
        };
        self.inner.sink.clear();
        debug!(generation = old, "Playback stopped");
        self.inner.emit(old, MediaEventKind::Abort);
    }
}

impl Drop for RodioHandle {
    fn drop(&mut self) {
        debug!("Dropping playback handle");
        self.inner.state.lock().abort_tasks();
        self.inner.sink.clear();
    }
}
