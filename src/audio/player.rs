//! Gapless streaming playback of chunked PCM16 audio.
//!
//! [`StreamingPlayer`] is the control side (enqueue, interrupt, complete,
//! unlock) and is owned by a single task. [`PlaybackMonitor`] is a cheap
//! clone of the shared state used by the device callback to pull samples and
//! by the frame loop to read elapsed time and amplitude.

use crate::audio::output::{AudioSink, NullSink};
use crate::audio::pcm::sample_to_f32;
use crate::audio::stream::{PlaybackStream, StreamState};
use crate::audio::unlock::AudioUnlock;
use crate::config::AudioConfig;
use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Notifications from the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// A stream began producing audio.
    Started { stream_id: String },
    /// Smoothed output amplitude in [0, 1].
    Level { amplitude: f32 },
    /// A stream drained after completion was signalled.
    Finished { stream_id: String, elapsed_secs: f64 },
    /// A stream was silenced before it finished.
    Interrupted { stream_id: String },
}

/// What happened to an enqueued chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued; the stream is still below its start threshold.
    Buffered,
    /// Queued behind audio that is already playing.
    Appended,
    /// Queued and playback started.
    Started,
    /// Queued; start is waiting for the audio unlock.
    Deferred,
}

/// What a completion signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// The id does not name the active stream.
    Ignored,
    /// Queued audio is still playing out.
    Draining,
    /// Nothing was left to play; the stream is `Completed`.
    Finished,
}

/// Single-pole smoothed RMS meter.
#[derive(Debug)]
struct LevelMeter {
    window: usize,
    smoothing: f32,
    sum_sq: f32,
    count: usize,
    value: f32,
}

impl LevelMeter {
    fn new(window: usize, smoothing: f32) -> Self {
        Self {
            window: window.max(1),
            smoothing: smoothing.clamp(0.0, 1.0),
            sum_sq: 0.0,
            count: 0,
            value: 0.0,
        }
    }

    /// Feed one output sample; returns the new level at the end of each window.
    fn push(&mut self, sample: f32) -> Option<f32> {
        self.sum_sq += sample * sample;
        self.count += 1;
        if self.count < self.window {
            return None;
        }
        let rms = (self.sum_sq / self.count as f32).sqrt();
        self.value = (self.value * self.smoothing + rms * (1.0 - self.smoothing)).clamp(0.0, 1.0);
        self.sum_sq = 0.0;
        self.count = 0;
        Some(self.value)
    }
}

#[derive(Debug)]
struct PlayerShared {
    stream: Option<PlaybackStream>,
    sample_rate: u32,
    volume: f32,
    level: LevelMeter,
    start_requested: bool,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl PlayerShared {
    fn emit(&self, event: PlaybackEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn active_mut(&mut self) -> Option<&mut PlaybackStream> {
        self.stream.as_mut().filter(|s| !s.state().is_finished())
    }

    fn finish_if_drained(&mut self) -> bool {
        let sample_rate = self.sample_rate;
        let finished = self.stream.as_mut().and_then(|s| {
            s.finish_if_drained()
                .then(|| (s.id().to_owned(), s.elapsed_secs(sample_rate)))
        });
        match finished {
            Some((stream_id, elapsed_secs)) => {
                info!(stream_id = %stream_id, elapsed_secs, "stream completed");
                self.emit(PlaybackEvent::Finished {
                    stream_id,
                    elapsed_secs,
                });
                true
            }
            None => false,
        }
    }
}

fn lock(shared: &Mutex<PlayerShared>) -> MutexGuard<'_, PlayerShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start `stream_id` if it is still the active stream and waiting to play.
fn begin_stream(shared: &Mutex<PlayerShared>, stream_id: &str) {
    let mut guard = lock(shared);
    let started = guard
        .stream
        .as_mut()
        .filter(|s| s.id() == stream_id)
        .is_some_and(PlaybackStream::begin_playing);
    if started {
        debug!(stream_id, "playback started");
        guard.emit(PlaybackEvent::Started {
            stream_id: stream_id.to_owned(),
        });
        guard.finish_if_drained();
    }
}

/// Read/render handle onto the player's shared state.
#[derive(Debug, Clone)]
pub struct PlaybackMonitor {
    shared: Arc<Mutex<PlayerShared>>,
}

impl PlaybackMonitor {
    /// Fill `out` with the next mono samples of the active stream.
    ///
    /// This is the device callback; it never blocks on anything but the
    /// state mutex and outputs silence when nothing is playing.
    pub fn render(&self, out: &mut [f32]) {
        let mut guard = match self.shared.lock() {
            Ok(g) => g,
            Err(_) => {
                out.fill(0.0);
                return;
            }
        };
        let shared = &mut *guard;
        let volume = shared.volume;
        let playing = shared
            .stream
            .as_ref()
            .is_some_and(|s| s.state() == StreamState::Playing);

        for slot in out.iter_mut() {
            let sample = shared
                .stream
                .as_mut()
                .and_then(PlaybackStream::next_sample)
                .map_or(0.0, sample_to_f32);
            *slot = sample * volume;
            if let Some(amplitude) = shared.level.push(*slot)
                && (playing || amplitude > 1e-3)
            {
                shared.emit(PlaybackEvent::Level { amplitude });
            }
        }

        if playing {
            shared.finish_if_drained();
        }
    }

    /// Seconds of the active stream that have been played. 0 before a stream starts.
    pub fn elapsed_secs(&self) -> f64 {
        let guard = lock(&self.shared);
        guard
            .stream
            .as_ref()
            .map_or(0.0, |s| s.elapsed_secs(guard.sample_rate))
    }

    /// Smoothed amplitude of the most recently rendered audio, in [0, 1].
    pub fn amplitude(&self) -> f32 {
        lock(&self.shared).level.value
    }

    /// Id of the current (or most recent) stream.
    pub fn stream_id(&self) -> Option<String> {
        lock(&self.shared).stream.as_ref().map(|s| s.id().to_owned())
    }

    /// State of the current (or most recent) stream.
    pub fn state(&self) -> Option<StreamState> {
        lock(&self.shared).stream.as_ref().map(PlaybackStream::state)
    }

    /// Id of the stream currently producing audio, if any.
    pub fn playing_stream_id(&self) -> Option<String> {
        lock(&self.shared)
            .stream
            .as_ref()
            .filter(|s| s.state() == StreamState::Playing)
            .map(|s| s.id().to_owned())
    }

    pub fn sample_rate(&self) -> u32 {
        lock(&self.shared).sample_rate
    }
}

/// Streaming PCM16 player with gapless queueing and hard interruption.
pub struct StreamingPlayer {
    shared: Arc<Mutex<PlayerShared>>,
    gate: Arc<AudioUnlock>,
    sink: Box<dyn AudioSink>,
    min_start_samples: usize,
}

impl std::fmt::Debug for StreamingPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPlayer")
            .field("sink", &self.sink.name())
            .field("gate", &self.gate)
            .field("min_start_samples", &self.min_start_samples)
            .finish_non_exhaustive()
    }
}

impl StreamingPlayer {
    /// Create a player with a manual [`NullSink`]; see [`with_sink`](Self::with_sink).
    pub fn new(
        config: &AudioConfig,
        gate: Arc<AudioUnlock>,
        events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
    ) -> Self {
        let shared = PlayerShared {
            stream: None,
            sample_rate: config.sample_rate,
            volume: config.volume,
            level: LevelMeter::new(config.level_window_samples(), config.level_smoothing),
            start_requested: false,
            events,
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
            gate,
            sink: Box::new(NullSink::manual()),
            min_start_samples: config.min_start_samples(),
        }
    }

    /// Replace the output sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn monitor(&self) -> PlaybackMonitor {
        PlaybackMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<AudioUnlock> {
        &self.gate
    }

    /// Append decoded samples to `stream_id`.
    ///
    /// A finished or differently-named active stream is replaced by a fresh
    /// one (the old one is interrupted first). Playback starts once the start
    /// threshold is queued and audio is unlocked.
    pub fn enqueue(&mut self, stream_id: &str, samples: &[i16]) -> EnqueueOutcome {
        let needs_start = {
            let mut guard = lock(&self.shared);
            let shared = &mut *guard;

            let replace = match shared.stream.as_ref() {
                None => true,
                Some(s) => s.state().is_finished() || s.id() != stream_id,
            };
            if replace {
                if let Some(old) = shared.active_mut()
                    && old.interrupt()
                {
                    let old_id = old.id().to_owned();
                    info!(stream_id = %old_id, next = stream_id, "stream superseded");
                    shared.emit(PlaybackEvent::Interrupted { stream_id: old_id });
                }
                debug!(stream_id, "new playback stream");
                shared.stream = Some(PlaybackStream::new(stream_id));
                shared.start_requested = false;
            }

            let min_start = self.min_start_samples;
            let Some(stream) = shared.stream.as_mut() else {
                return EnqueueOutcome::Buffered;
            };
            stream.push(samples);
            match stream.state() {
                StreamState::Playing => return EnqueueOutcome::Appended,
                StreamState::Buffering
                    if stream.queued_samples() >= min_start || stream.completion_requested() =>
                {
                    if shared.start_requested {
                        return EnqueueOutcome::Deferred;
                    }
                    shared.start_requested = true;
                    true
                }
                _ => false,
            }
        };

        if needs_start {
            self.start(stream_id)
        } else {
            EnqueueOutcome::Buffered
        }
    }

    fn start(&self, stream_id: &str) -> EnqueueOutcome {
        let shared = Arc::clone(&self.shared);
        let id = stream_id.to_owned();
        if self
            .gate
            .run_or_defer(Box::new(move || begin_stream(&shared, &id)))
        {
            EnqueueOutcome::Deferred
        } else {
            EnqueueOutcome::Started
        }
    }

    /// Silence and discard the active stream. Returns its id, or `None` when idle.
    pub fn interrupt(&mut self) -> Option<String> {
        let mut guard = lock(&self.shared);
        let stream = guard.active_mut()?;
        if !stream.interrupt() {
            return None;
        }
        let stream_id = stream.id().to_owned();
        info!(stream_id = %stream_id, "stream interrupted");
        guard.emit(PlaybackEvent::Interrupted {
            stream_id: stream_id.clone(),
        });
        Some(stream_id)
    }

    /// Mark `stream_id` as fully received.
    pub fn complete(&mut self, stream_id: &str) -> CompleteOutcome {
        let needs_start = {
            let mut guard = lock(&self.shared);
            let Some(stream) = guard.active_mut().filter(|s| s.id() == stream_id) else {
                debug!(stream_id, "completion for inactive stream ignored");
                return CompleteOutcome::Ignored;
            };
            stream.request_completion();
            match stream.state() {
                StreamState::Playing => {
                    return if guard.finish_if_drained() {
                        CompleteOutcome::Finished
                    } else {
                        CompleteOutcome::Draining
                    };
                }
                _ if guard.start_requested => false,
                _ => {
                    guard.start_requested = true;
                    true
                }
            }
        };

        if needs_start {
            self.start(stream_id);
        }
        match self.monitor().state() {
            Some(StreamState::Completed) => CompleteOutcome::Finished,
            _ => CompleteOutcome::Draining,
        }
    }

    /// Unlock audio output with a silent prime of the sink.
    ///
    /// Returns `Ok(true)` if this call performed the unlock; any deferred
    /// start is flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if priming fails; audio stays locked.
    pub fn unlock(&mut self) -> Result<bool> {
        let sink = &mut self.sink;
        self.gate.unlock_with(|| sink.prime())
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.monitor().elapsed_secs()
    }

    pub fn current_amplitude(&self) -> f32 {
        self.monitor().amplitude()
    }

    pub fn state(&self) -> Option<StreamState> {
        self.monitor().state()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn config(sample_rate: u32) -> AudioConfig {
        AudioConfig {
            sample_rate,
            min_start_ms: 50,
            level_interval_ms: 16,
            ..AudioConfig::default()
        }
    }

    fn player(
        sample_rate: u32,
        gate: AudioUnlock,
    ) -> (StreamingPlayer, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            StreamingPlayer::new(&config(sample_rate), Arc::new(gate), Some(tx)),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn render_all(monitor: &PlaybackMonitor, samples: usize) -> Vec<f32> {
        let mut out = vec![0.0; samples];
        for block in out.chunks_mut(256) {
            monitor.render(block);
        }
        out
    }

    #[test]
    fn three_chunks_complete_after_drain() {
        let (mut player, mut rx) = player(44_100, AudioUnlock::unlocked());
        let monitor = player.monitor();
        let chunk = vec![1000_i16; 4410];

        assert_eq!(player.enqueue("u1", &chunk), EnqueueOutcome::Started);
        assert_eq!(player.enqueue("u1", &chunk), EnqueueOutcome::Appended);
        assert_eq!(player.enqueue("u1", &chunk), EnqueueOutcome::Appended);
        assert_eq!(player.complete("u1"), CompleteOutcome::Draining);

        render_all(&monitor, 4410 * 3 - 1);
        assert_eq!(player.state(), Some(StreamState::Playing));

        render_all(&monitor, 1);
        assert_eq!(player.state(), Some(StreamState::Completed));
        assert!((player.elapsed_secs() - 0.3).abs() < 1e-9);

        let events = drain(&mut rx);
        assert!(events.contains(&PlaybackEvent::Started {
            stream_id: "u1".into()
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            PlaybackEvent::Finished { stream_id, elapsed_secs }
                if stream_id == "u1" && (*elapsed_secs - 0.3).abs() < 1e-9
        )));
    }

    #[test]
    fn chunks_play_in_arrival_order() {
        let (mut player, _rx) = player(8_000, AudioUnlock::unlocked());
        let monitor = player.monitor();
        for value in [1_i16, 2, 3] {
            player.enqueue("s", &vec![value * 1000; 400]);
        }
        let out = render_all(&monitor, 1200);
        let order: Vec<f32> = out.chunks(400).map(|c| c[0]).collect();
        assert_eq!(
            order,
            vec![sample_to_f32(1000), sample_to_f32(2000), sample_to_f32(3000)]
        );
    }

    #[test]
    fn new_stream_silences_previous_one() {
        let (mut player, mut rx) = player(8_000, AudioUnlock::unlocked());
        let monitor = player.monitor();
        player.enqueue("a", &vec![111; 800]);
        render_all(&monitor, 100);
        player.enqueue("b", &vec![222; 800]);

        let out = render_all(&monitor, 800);
        assert!(out.iter().all(|s| (*s - sample_to_f32(222)).abs() < f32::EPSILON));
        assert_eq!(monitor.stream_id().as_deref(), Some("b"));
        assert!(drain(&mut rx).contains(&PlaybackEvent::Interrupted {
            stream_id: "a".into()
        }));
    }

    #[test]
    fn elapsed_resets_for_new_stream() {
        let (mut player, _rx) = player(8_000, AudioUnlock::unlocked());
        let monitor = player.monitor();
        player.enqueue("a", &vec![1; 800]);
        render_all(&monitor, 400);
        assert!((player.elapsed_secs() - 0.05).abs() < 1e-9);
        player.interrupt();
        player.enqueue("b", &vec![1; 800]);
        assert_eq!(player.elapsed_secs(), 0.0);
    }

    #[test]
    fn interrupt_when_idle_is_noop() {
        let (mut player, mut rx) = player(8_000, AudioUnlock::unlocked());
        assert_eq!(player.interrupt(), None);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn interrupt_discards_queued_audio() {
        let (mut player, _rx) = player(8_000, AudioUnlock::unlocked());
        let monitor = player.monitor();
        player.enqueue("a", &vec![500; 800]);
        assert_eq!(player.interrupt().as_deref(), Some("a"));
        assert_eq!(player.state(), Some(StreamState::Interrupted));
        assert!(render_all(&monitor, 800).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn stale_completion_is_ignored() {
        let (mut player, _rx) = player(8_000, AudioUnlock::unlocked());
        player.enqueue("new", &vec![1; 800]);
        assert_eq!(player.complete("old"), CompleteOutcome::Ignored);
        assert_eq!(player.state(), Some(StreamState::Playing));
    }

    #[test]
    fn short_stream_starts_on_completion() {
        let (mut player, _rx) = player(8_000, AudioUnlock::unlocked());
        let monitor = player.monitor();
        // 50ms at 8kHz is 400 samples; 100 stays below the threshold.
        assert_eq!(player.enqueue("s", &[7; 100]), EnqueueOutcome::Buffered);
        assert_eq!(player.state(), Some(StreamState::Buffering));
        assert_eq!(player.complete("s"), CompleteOutcome::Draining);
        assert_eq!(player.state(), Some(StreamState::Playing));
        render_all(&monitor, 100);
        assert_eq!(player.state(), Some(StreamState::Completed));
    }

    #[test]
    fn playback_waits_for_unlock() {
        let (mut player, mut rx) = player(8_000, AudioUnlock::new());
        let monitor = player.monitor();

        assert_eq!(player.enqueue("s", &vec![900; 800]), EnqueueOutcome::Deferred);
        assert_eq!(player.enqueue("s", &vec![900; 800]), EnqueueOutcome::Deferred);
        assert!(render_all(&monitor, 400).iter().all(|s| *s == 0.0));
        assert_eq!(player.elapsed_secs(), 0.0);

        assert!(player.unlock().unwrap());
        assert_eq!(player.state(), Some(StreamState::Playing));
        assert!(!player.unlock().unwrap());
        assert_eq!(player.gate().prime_count(), 1);

        let out = render_all(&monitor, 1600);
        assert!(out.iter().all(|s| (*s - sample_to_f32(900)).abs() < f32::EPSILON));
        let started: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, PlaybackEvent::Started { .. }))
            .collect();
        assert_eq!(started.len(), 1);
    }

    #[test]
    fn deferred_start_for_superseded_stream_is_dropped() {
        let (mut player, _rx) = player(8_000, AudioUnlock::new());
        player.enqueue("a", &vec![1; 800]);
        player.enqueue("b", &vec![2; 800]);
        player.unlock().unwrap();
        assert_eq!(player.monitor().playing_stream_id().as_deref(), Some("b"));
    }

    #[test]
    fn amplitude_rises_and_decays() {
        let (mut player, _rx) = player(8_000, AudioUnlock::unlocked());
        let monitor = player.monitor();
        player.enqueue("s", &vec![i16::MAX / 2; 1600]);
        player.complete("s");

        render_all(&monitor, 1600);
        let loud = player.current_amplitude();
        assert!(loud > 0.4 && loud <= 1.0, "amplitude {loud}");

        render_all(&monitor, 1600);
        assert!(player.current_amplitude() < 0.01);
    }

    #[test]
    fn level_meter_halves_toward_each_window() {
        let mut meter = LevelMeter::new(2, 0.5);
        assert_eq!(meter.push(1.0), None);
        assert_eq!(meter.push(1.0), Some(0.5));
        meter.push(1.0);
        assert_eq!(meter.push(1.0), Some(0.75));
    }

    #[test]
    fn same_id_after_completion_starts_fresh_stream() {
        let (mut player, _rx) = player(8_000, AudioUnlock::unlocked());
        let monitor = player.monitor();
        player.enqueue("s", &vec![1; 400]);
        player.complete("s");
        render_all(&monitor, 400);
        assert_eq!(player.state(), Some(StreamState::Completed));

        assert_eq!(player.enqueue("s", &vec![1; 400]), EnqueueOutcome::Started);
        assert_eq!(player.elapsed_secs(), 0.0);
    }
}
