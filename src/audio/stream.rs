//! One utterance's worth of queued PCM16 audio and its lifecycle.

use std::collections::VecDeque;
use std::time::Instant;

/// Lifecycle of a [`PlaybackStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created but nothing queued yet.
    Idle,
    /// Audio is queued but below the start threshold, or waiting for unlock.
    Buffering,
    /// The render path is consuming samples.
    Playing,
    /// Superseded or stopped; queued audio was discarded.
    Interrupted,
    /// Completion was signalled and every queued sample was played.
    Completed,
}

impl StreamState {
    /// Whether the stream can no longer produce audio.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Interrupted | Self::Completed)
    }
}

/// Queued audio for a single stream id.
#[derive(Debug)]
pub struct PlaybackStream {
    id: String,
    queued: VecDeque<i16>,
    state: StreamState,
    started_at: Option<Instant>,
    played_samples: u64,
    completion_requested: bool,
}

impl PlaybackStream {
    /// Create an empty stream in [`StreamState::Idle`].
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queued: VecDeque::new(),
            state: StreamState::Idle,
            started_at: None,
            played_samples: 0,
            completion_requested: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Wall-clock instant the stream began playing.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn queued_samples(&self) -> usize {
        self.queued.len()
    }

    pub fn played_samples(&self) -> u64 {
        self.played_samples
    }

    pub fn completion_requested(&self) -> bool {
        self.completion_requested
    }

    /// Seconds of audio consumed by the render path.
    #[must_use]
    pub fn elapsed_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.played_samples as f64 / f64::from(sample_rate)
    }

    /// Append samples in arrival order. Ignored once the stream is finished.
    pub fn push(&mut self, samples: &[i16]) -> bool {
        if self.state.is_finished() {
            return false;
        }
        self.queued.extend(samples.iter().copied());
        if self.state == StreamState::Idle {
            self.state = StreamState::Buffering;
        }
        true
    }

    /// Enter [`StreamState::Playing`]. Only valid from `Idle`/`Buffering`.
    pub fn begin_playing(&mut self) -> bool {
        match self.state {
            StreamState::Idle | StreamState::Buffering => {
                self.state = StreamState::Playing;
                self.started_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Take the next sample for output, counting it as played.
    pub fn next_sample(&mut self) -> Option<i16> {
        if self.state != StreamState::Playing {
            return None;
        }
        let sample = self.queued.pop_front()?;
        self.played_samples += 1;
        Some(sample)
    }

    /// Record that no more audio will arrive for this stream.
    pub fn request_completion(&mut self) {
        self.completion_requested = true;
    }

    /// Transition to `Completed` if completion was requested and the queue drained.
    pub fn finish_if_drained(&mut self) -> bool {
        if self.state == StreamState::Playing && self.completion_requested && self.queued.is_empty()
        {
            self.state = StreamState::Completed;
            return true;
        }
        false
    }

    /// Discard queued audio and mark the stream interrupted.
    pub fn interrupt(&mut self) -> bool {
        if self.state.is_finished() {
            return false;
        }
        self.queued.clear();
        self.state = StreamState::Interrupted;
        true
    }
}
