//! Stream arbitration: which utterance is allowed to be audible.
//!
//! Only the newest stream id is ever rendered. A chunk with a different id
//! than the active one preempts it; it is never queued behind it.

use tracing::{debug, info};

/// Decision for an incoming audio chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkDecision {
    /// No stream was active; this chunk opens one.
    Start,
    /// Same stream as the active one.
    Continue,
    /// A different stream was active and must be interrupted first.
    Preempt { previous: String },
}

/// Decision for a completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDecision {
    /// Completion for the active stream; release it once the audio drains.
    Drain,
    /// Completion for a stream that is no longer active.
    Stale,
}

/// Tracks the active stream id.
#[derive(Debug, Default)]
pub struct StreamArbiter {
    active: Option<String>,
    draining: bool,
}

impl StreamArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Whether the active stream has been completed and is playing out.
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Decide what to do with a chunk for `stream_id` and adopt it as active.
    pub fn on_chunk(&mut self, stream_id: &str) -> ChunkDecision {
        match self.active.as_deref() {
            None => {
                self.active = Some(stream_id.to_owned());
                self.draining = false;
                ChunkDecision::Start
            }
            Some(active) if active == stream_id => {
                // More audio under a drained id is a new utterance; wait for its completion.
                self.draining = false;
                ChunkDecision::Continue
            }
            Some(_) => {
                let previous = self.active.replace(stream_id.to_owned()).unwrap_or_default();
                self.draining = false;
                info!(previous = %previous, stream_id, "stream preempted");
                ChunkDecision::Preempt { previous }
            }
        }
    }

    /// Handle a completion signal for `stream_id`.
    pub fn on_complete(&mut self, stream_id: &str) -> CompletionDecision {
        if self.active.as_deref() == Some(stream_id) {
            self.draining = true;
            CompletionDecision::Drain
        } else {
            debug!(stream_id, "stale completion ignored");
            CompletionDecision::Stale
        }
    }

    /// Release `stream_id` after its audio has drained. Returns `true` if it was active.
    pub fn release(&mut self, stream_id: &str) -> bool {
        if self.active.as_deref() == Some(stream_id) {
            self.active = None;
            self.draining = false;
            true
        } else {
            false
        }
    }

    /// Forget the active stream (after an explicit stop).
    pub fn clear(&mut self) -> Option<String> {
        self.draining = false;
        self.active.take()
    }
}
