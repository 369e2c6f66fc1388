//! Streaming TTS playback: PCM16 decoding, per-utterance queues, device
//! output via cpal, and the gesture-gated unlock.

pub mod output;
pub mod pcm;
pub mod player;
pub mod stream;
pub mod unlock;

pub use output::{AudioSink, CpalOutput, NullSink, open_sink};
pub use player::{CompleteOutcome, EnqueueOutcome, PlaybackEvent, PlaybackMonitor, StreamingPlayer};
pub use stream::{PlaybackStream, StreamState};
pub use unlock::{AudioUnlock, Gesture};
