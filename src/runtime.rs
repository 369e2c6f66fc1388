//! Runtime events emitted by the pipeline for UI and observability.
//!
//! These are lightweight so the pipeline can broadcast them without holding
//! up the audio path.

use crate::session::UserSaid;
use serde::Serialize;

/// One morph influence written by the animator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorphInfluence {
    pub mesh: String,
    pub target: String,
    pub value: f32,
}

/// Events that describe what the avatar is doing "right now".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RuntimeEvent {
    /// A stream became audible.
    StreamStarted { stream_id: String },
    /// A newer stream replaced one that was still in flight.
    StreamPreempted { previous: String, stream_id: String },
    /// A stream played out after completion.
    StreamCompleted { stream_id: String, elapsed_secs: f64 },
    /// A stream was silenced before it finished.
    StreamInterrupted { stream_id: String },
    /// Smoothed playback amplitude.
    AudioLevel { amplitude: f32 },
    /// Text the assistant said, with its log id.
    AssistantSaid { log_id: u64, text: String },
    /// The agent reported an error; shown to the user.
    AgentError { message: String },
    /// Playback is ready but waits for a user gesture.
    PlaybackDeferred { stream_id: String },
    /// Audio output has been unlocked.
    AudioUnlocked,
    /// A message was sent to the agent.
    Dispatched { message: UserSaid },
    /// Non-zero morph influences after a frame.
    Frame { influences: Vec<MorphInfluence> },
}
