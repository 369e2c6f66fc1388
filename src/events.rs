//! Inbound agent events and the durable event log.
//!
//! Everything the remote agent tells the avatar arrives as an [`AgentEvent`].
//! Control events (not audio payload) are appended to an [`EventLog`] with
//! monotonic ids so any consumer can resume from the last id it saw.

use crate::viseme::VisemeCue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Events pushed by the remote agent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// Base64 PCM16 little-endian audio for an utterance.
    AudioChunk {
        stream_id: String,
        chunk_base64: String,
    },
    /// No more chunks will arrive for `stream_id`.
    AudioComplete { stream_id: String },
    /// The agent failed to produce audio.
    AudioError { message: String },
    /// Text the assistant said.
    Said {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        text: String,
    },
    /// Mouth cues for an utterance, or ARPABET phonemes to estimate them from.
    Lipsync {
        stream_id: String,
        #[serde(default)]
        mouth_cues: Vec<VisemeCue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phonemes: Option<String>,
    },
    /// Number of users connected to the chat.
    Presence { count: u32 },
}

impl AgentEvent {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioChunk { .. } => "audio-chunk",
            Self::AudioComplete { .. } => "audio-complete",
            Self::AudioError { .. } => "audio-error",
            Self::Said { .. } => "said",
            Self::Lipsync { .. } => "lipsync",
            Self::Presence { .. } => "presence",
        }
    }

    /// Audio payload is transient and stays out of the log.
    #[must_use]
    pub fn is_logged(&self) -> bool {
        !matches!(self, Self::AudioChunk { .. })
    }
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEvent {
    pub id: u64,
    pub received_at: DateTime<Utc>,
    pub event: AgentEvent,
}

/// Bounded append-only log with monotonic ids.
///
/// Ids start at 1 and never repeat. Entries are evicted only when the log is
/// over capacity, oldest first; there is no time-based expiry.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<LoggedEvent>,
    capacity: usize,
    next_id: u64,
    said: HashSet<String>,
    said_order: VecDeque<String>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 1,
            said: HashSet::new(),
            said_order: VecDeque::new(),
        }
    }

    /// Append an event and return its id.
    pub fn append(&mut self, event: AgentEvent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(LoggedEvent {
            id,
            received_at: Utc::now(),
            event,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        id
    }

    /// Entries with an id greater than `after`, oldest first.
    pub fn since(&self, after: u64) -> impl Iterator<Item = &LoggedEvent> {
        let start = self.entries.partition_point(|e| e.id <= after);
        self.entries.range(start..)
    }

    pub fn get(&self, id: u64) -> Option<&LoggedEvent> {
        let pos = self.entries.binary_search_by_key(&id, |e| e.id).ok()?;
        self.entries.get(pos)
    }

    /// Id of the newest entry.
    pub fn latest_id(&self) -> Option<u64> {
        self.entries.back().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that the message `id` was said; `false` if it already was.
    pub fn first_said(&mut self, id: &str) -> bool {
        if !self.said.insert(id.to_owned()) {
            return false;
        }
        self.said_order.push_back(id.to_owned());
        while self.said_order.len() > self.capacity {
            if let Some(old) = self.said_order.pop_front() {
                self.said.remove(&old);
            }
        }
        true
    }
}
