//! Message types passed into and out of the avatar pipeline.

pub use crate::audio::unlock::Gesture;
use crate::viseme::VisemeTrack;
use std::sync::Arc;

/// UI input for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineCommand {
    /// A user interaction; the first one unlocks audio.
    Gesture(Gesture),
    /// Text the user typed, to be sent to the agent.
    UserSaid(String),
    /// Silence the avatar immediately.
    Stop,
}

/// Cue track bound to the stream it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrack {
    pub stream_id: String,
    pub track: Arc<VisemeTrack>,
}
