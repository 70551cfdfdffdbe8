//! Passive stream health classification.
//!
//! The monitor listens to a handle's stall/resume/error events and samples
//! its buffered ranges once a second. It only classifies and recommends;
//! acting on a recommendation is up to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use super::handle::{MediaEvent, MediaEventKind, PlaybackHandle, TimeRange};

/// Buffered-ahead duration that counts as 100% healthy
pub const HEALTHY_BUFFER: Duration = Duration::from_secs(30);

/// Default sampling period
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Dropouts past which an unstable stream should be reconnected
const RECONNECT_DROPOUTS: u32 = 3;

/// Dropouts past which an unstable, empty stream is considered dead
const DEAD_DROPOUTS: u32 = 5;

/// What the caller should do about a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    Continue,
    Reconnect,
    Skip,
}

/// Derived health of one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamQualityMetrics {
    /// Estimated bitrate in kbps, when byte counts are known
    pub bitrate_estimate: Option<u32>,
    pub dropout_count: u32,
    pub buffer_health_percent: f64,
    pub buffered_ahead: Duration,
    pub is_stable: bool,
}

impl Default for StreamQualityMetrics {
    fn default() -> Self {
        Self {
            bitrate_estimate: None,
            dropout_count: 0,
            buffer_health_percent: 0.0,
            buffered_ahead: Duration::ZERO,
            is_stable: true,
        }
    }
}

impl StreamQualityMetrics {
    /// Fold a media event into the metrics
    pub fn apply(&mut self, kind: &MediaEventKind) {
        match kind {
            MediaEventKind::Waiting => {
                self.dropout_count += 1;
                self.is_stable = false;
            }
            MediaEventKind::Playing => {
                self.is_stable = true;
            }
            MediaEventKind::Error(_) => {
                self.buffer_health_percent = 0.0;
                self.is_stable = false;
            }
            _ => {}
        }
    }

    /// Recompute buffer figures from the handle's current state
    pub fn sample(
        &mut self,
        buffered: &[TimeRange],
        current_time: Duration,
        bytes_loaded: Option<u64>,
        duration: Option<Duration>,
    ) {
        self.buffered_ahead = buffered_ahead(buffered, current_time);
        self.buffer_health_percent =
            (self.buffered_ahead.as_secs_f64() / HEALTHY_BUFFER.as_secs_f64() * 100.0).min(100.0);

        // Bitrate over the buffered span of the source
        let buffered_secs = buffered
            .iter()
            .map(|r| r.end.saturating_sub(r.start).as_secs_f64())
            .sum::<f64>();
        let span = duration.map(|d| d.as_secs_f64()).unwrap_or(buffered_secs).min(buffered_secs);
        if let (Some(bytes), true) = (bytes_loaded, span > 0.0) {
            self.bitrate_estimate = Some((bytes as f64 * 8.0 / span / 1000.0).round() as u32);
        }
    }

    pub fn is_dead(&self) -> bool {
        !self.is_stable && self.buffer_health_percent == 0.0 && self.dropout_count > DEAD_DROPOUTS
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        if self.is_dead() {
            RecommendedAction::Skip
        } else if !self.is_stable && self.dropout_count > RECONNECT_DROPOUTS {
            RecommendedAction::Reconnect
        } else {
            RecommendedAction::Continue
        }
    }
}

/// Seconds buffered past the playback position, within the range holding it
pub fn buffered_ahead(buffered: &[TimeRange], current_time: Duration) -> Duration {
    buffered
        .iter()
        .find(|range| range.contains(current_time))
        .map(|range| range.end.saturating_sub(current_time))
        .unwrap_or(Duration::ZERO)
}

type MetricsCallback = Arc<dyn Fn(&str, &StreamQualityMetrics) + Send + Sync>;

struct StreamEntry {
    /// Present while a monitor task is attached
    metrics: Option<StreamQualityMetrics>,
    subscribers: Vec<(u64, MetricsCallback)>,
    /// Identifies the attached task so a replaced one can't touch this entry
    monitor_id: u64,
    task: Option<JoinHandle<()>>,
}

impl StreamEntry {
    fn new() -> Self {
        Self {
            metrics: None,
            subscribers: Vec::new(),
            monitor_id: 0,
            task: None,
        }
    }
}

type Streams = Mutex<HashMap<String, StreamEntry>>;

/// Watches playback handles and keeps per-URL health metrics
pub struct StreamHealthMonitor {
    streams: Arc<Streams>,
    sample_interval: Duration,
    next_id: AtomicU64,
}

impl StreamHealthMonitor {
    pub fn new() -> Self {
        Self::with_interval(SAMPLE_INTERVAL)
    }

    pub fn with_interval(sample_interval: Duration) -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            sample_interval,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start watching `handle` for the stream at `url`.
    ///
    /// Monitoring ends, and the URL's metrics are dropped, when the handle
    /// reports `Ended` or moves on to another source. Subscribers stay
    /// registered for the next time the URL is monitored.
    pub fn monitor(&self, url: &str, handle: Arc<dyn PlaybackHandle>) {
        let events = handle.subscribe();
        let generation = handle.generation();
        let monitor_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = url.to_string();

        let mut streams = self.streams.lock();
        let entry = streams.entry(url.clone()).or_insert_with(StreamEntry::new);
        if let Some(previous) = entry.task.take() {
            previous.abort();
        }
        entry.metrics = Some(StreamQualityMetrics::default());
        entry.monitor_id = monitor_id;

        debug!(%url, generation, "Monitoring stream health");
        let task = tokio::spawn(watch_stream(
            Arc::downgrade(&self.streams),
            url,
            handle,
            events,
            StreamWatch {
                generation,
                monitor_id,
                sample_interval: self.sample_interval,
            },
        ));
        entry.task = Some(task);
    }

    /// Register for metric updates on a URL; dropping the guard unsubscribes
    pub fn subscribe<F>(&self, url: &str, callback: F) -> HealthSubscription
    where
        F: Fn(&str, &StreamQualityMetrics) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams
            .lock()
            .entry(url.to_string())
            .or_insert_with(StreamEntry::new)
            .subscribers
            .push((id, Arc::new(callback)));

        HealthSubscription {
            id,
            url: url.to_string(),
            streams: Arc::downgrade(&self.streams),
        }
    }

    /// Current metrics, while the URL is being monitored
    pub fn metrics(&self, url: &str) -> Option<StreamQualityMetrics> {
        self.streams.lock().get(url).and_then(|entry| entry.metrics.clone())
    }

    pub fn is_stream_dead(&self, url: &str) -> bool {
        self.metrics(url).is_some_and(|m| m.is_dead())
    }

    pub fn recommended_action(&self, url: &str) -> RecommendedAction {
        self.metrics(url)
            .map(|m| m.recommended_action())
            .unwrap_or(RecommendedAction::Continue)
    }

    /// Stop watching a URL, keeping its subscribers for next time
    pub fn stop_monitoring(&self, url: &str) {
        let mut streams = self.streams.lock();
        let Some(entry) = streams.get_mut(url) else {
            return;
        };
        if let Some(task) = entry.task.take() {
            task.abort();
        }
        entry.metrics = None;
        if entry.subscribers.is_empty() {
            streams.remove(url);
        }
    }

    pub fn is_monitoring(&self, url: &str) -> bool {
        self.streams
            .lock()
            .get(url)
            .is_some_and(|entry| entry.task.as_ref().is_some_and(|t| !t.is_finished()))
    }
}

impl Default for StreamHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamHealthMonitor {
    fn drop(&mut self) {
        for entry in self.streams.lock().values_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
    }
}

/// Guard for a metrics subscription
pub struct HealthSubscription {
    id: u64,
    url: String,
    streams: Weak<Streams>,
}

impl HealthSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for HealthSubscription {
    fn drop(&mut self) {
        let Some(streams) = self.streams.upgrade() else {
            return;
        };
        let mut streams = streams.lock();
        if let Some(entry) = streams.get_mut(&self.url) {
            entry.subscribers.retain(|(id, _)| *id != self.id);
            if entry.subscribers.is_empty() && entry.metrics.is_none() {
                streams.remove(&self.url);
            }
        }
    }
}

struct StreamWatch {
    generation: u64,
    monitor_id: u64,
    sample_interval: Duration,
}

async fn watch_stream(
    streams: Weak<Streams>,
    url: String,
    handle: Arc<dyn PlaybackHandle>,
    mut events: broadcast::Receiver<MediaEvent>,
    watch: StreamWatch,
) {
    let mut ticker = interval(watch.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let update: Option<MediaEventKind> = tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.generation < watch.generation => continue,
                Ok(event) if event.generation > watch.generation => break,
                Ok(event) if event.kind == MediaEventKind::Ended => break,
                Ok(event) => Some(event.kind),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick() => None,
        };

        let Some(streams) = streams.upgrade() else {
            return;
        };

        let (metrics, subscribers) = {
            let mut guard = streams.lock();
            let Some(entry) = guard.get_mut(&url).filter(|e| e.monitor_id == watch.monitor_id)
            else {
                return;
            };
            let Some(metrics) = entry.metrics.as_mut() else {
                return;
            };
            match &update {
                Some(kind) => metrics.apply(kind),
                None => metrics.sample(
                    &handle.buffered(),
                    handle.current_time(),
                    handle.bytes_loaded(),
                    handle.duration(),
                ),
            }
            let callbacks: Vec<MetricsCallback> =
                entry.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (metrics.clone(), callbacks)
        };

        trace!(
            %url,
            health = metrics.buffer_health_percent,
            dropouts = metrics.dropout_count,
            stable = metrics.is_stable,
            "Stream health"
        );
        for callback in subscribers {
            callback(&url, &metrics);
        }
    }

    // Ended or replaced: drop this stream's metrics exactly once
    debug!(%url, "Stream monitoring finished");
    if let Some(streams) = streams.upgrade() {
        let mut guard = streams.lock();
        let finished = match guard.get_mut(&url) {
            Some(entry) if entry.monitor_id == watch.monitor_id => {
                entry.metrics = None;
                entry.task = None;
                entry.subscribers.is_empty()
            }
            _ => false,
        };
        if finished {
            guard.remove(&url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{MediaError, MediaErrorKind};
    use crate::testing::ScriptedHandle;
    use std::sync::atomic::AtomicUsize;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_buffer_health_from_ranges() {
        let mut m = StreamQualityMetrics::default();
        m.sample(&[TimeRange::new(secs(0), secs(20))], secs(5), None, None);
        assert_eq!(m.buffered_ahead, secs(15));
        assert!((m.buffer_health_percent - 50.0).abs() < 1e-9);

        m.sample(&[TimeRange::new(secs(0), secs(100))], secs(5), None, None);
        assert_eq!(m.buffer_health_percent, 100.0);

        m.sample(&[TimeRange::new(secs(10), secs(20))], secs(5), None, None);
        assert_eq!(m.buffer_health_percent, 0.0);
    }

    #[test]
    fn test_bitrate_estimate() {
        let mut m = StreamQualityMetrics::default();
        // 160 KB over 10 s ≈ 128 kbps
        m.sample(&[TimeRange::new(secs(0), secs(10))], secs(0), Some(160_000), Some(secs(10)));
        assert_eq!(m.bitrate_estimate, Some(128));
    }

    #[test]
    fn test_classification() {
        let mut m = StreamQualityMetrics::default();
        assert_eq!(m.recommended_action(), RecommendedAction::Continue);

        for _ in 0..4 {
            m.apply(&MediaEventKind::Waiting);
        }
        m.buffer_health_percent = 40.0;
        assert_eq!(m.recommended_action(), RecommendedAction::Reconnect);

        m.apply(&MediaEventKind::Playing);
        assert_eq!(m.recommended_action(), RecommendedAction::Continue);

        for _ in 0..2 {
            m.apply(&MediaEventKind::Waiting);
        }
        m.apply(&MediaEventKind::Error(MediaError::new(MediaErrorKind::Network, "reset")));
        assert_eq!(m.dropout_count, 6);
        assert!(m.is_dead());
        assert_eq!(m.recommended_action(), RecommendedAction::Skip);
    }

    #[test]
    fn test_not_dead_with_buffer_left() {
        let mut m = StreamQualityMetrics::default();
        for _ in 0..10 {
            m.apply(&MediaEventKind::Waiting);
        }
        m.buffer_health_percent = 10.0;
        assert!(!m.is_dead());
        assert_eq!(m.recommended_action(), RecommendedAction::Reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_tracks_events_and_samples() {
        let handle = Arc::new(ScriptedHandle::new());
        handle.set_source("https://cdn.example/a.mp3");
        handle.set_buffered(vec![TimeRange::new(secs(0), secs(15))]);

        let monitor = StreamHealthMonitor::new();
        monitor.monitor("https://cdn.example/a.mp3", handle.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let m = monitor.metrics("https://cdn.example/a.mp3").unwrap();
        assert!((m.buffer_health_percent - 50.0).abs() < 1e-9);

        handle.emit(MediaEventKind::Waiting);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let m = monitor.metrics("https://cdn.example/a.mp3").unwrap();
        assert_eq!(m.dropout_count, 1);
        assert!(!m.is_stable);

        handle.emit(MediaEventKind::Playing);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.metrics("https://cdn.example/a.mp3").unwrap().is_stable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_are_independent() {
        let url = "https://cdn.example/b.mp3";
        let handle = Arc::new(ScriptedHandle::new());
        handle.set_source(url);

        let monitor = StreamHealthMonitor::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        let sub_a = monitor.subscribe(url, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        let _sub_b = monitor.subscribe(url, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.monitor(url, handle.clone());
        handle.emit(MediaEventKind::Waiting);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(first.load(Ordering::SeqCst) >= 1);
        let second_before = second.load(Ordering::SeqCst);
        assert!(second_before >= 1);

        sub_a.unsubscribe();
        let first_after = first.load(Ordering::SeqCst);
        handle.emit(MediaEventKind::Waiting);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(first.load(Ordering::SeqCst), first_after);
        assert!(second.load(Ordering::SeqCst) > second_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_on_ended() {
        let url = "https://cdn.example/c.mp3";
        let handle = Arc::new(ScriptedHandle::new());
        handle.set_source(url);

        let monitor = StreamHealthMonitor::new();
        monitor.monitor(url, handle.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.is_monitoring(url));

        handle.emit(MediaEventKind::Ended);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.metrics(url).is_none());
        assert!(!monitor.is_monitoring(url));
        assert_eq!(monitor.recommended_action(url), RecommendedAction::Continue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_source_ends_monitoring() {
        let url = "https://cdn.example/d.mp3";
        let handle = Arc::new(ScriptedHandle::new());
        handle.set_source(url);

        let monitor = StreamHealthMonitor::new();
        monitor.monitor(url, handle.clone());

        handle.set_source("https://cdn.example/e.mp3");
        handle.emit(MediaEventKind::Playing);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.metrics(url).is_none());
    }
}
