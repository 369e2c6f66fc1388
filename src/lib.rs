//! Visage: streaming speech playback with lip-synced facial animation.
//!
//! A remote agent streams synthesized speech as base64 PCM chunks, followed
//! by a mouth-cue track. This crate plays the audio gaplessly, drives the
//! avatar's morph targets from the cues (or from the audio level when no
//! cues arrived), blinks, cycles idle gestures, and sends typed user
//! messages back to the agent.
//!
//! # Architecture
//!
//! - **Audio**: PCM decode, gapless stream player and unlock gate; output via `cpal`
//! - **Arbiter**: one active speech stream; a new stream preempts the old one
//! - **Viseme**: mouth shapes, cue tracks and shape-to-morph-target tables
//! - **Animator**: per-frame morph target smoothing and the blink cycle
//! - **Sequencer**: idle clip rotation with crossfades
//! - **Pipeline**: event-driven coordinator tying the stages together
//! - **Host**: NDJSON contract and the stdio bridge binary

pub mod animator;
pub mod arbiter;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod pipeline;
pub mod runtime;
pub mod scene;
pub mod sequencer;
pub mod session;
pub mod viseme;

pub use config::AvatarConfig;
pub use error::{AvatarError, Result};
pub use events::AgentEvent;
pub use pipeline::coordinator::{AvatarPipeline, FrameLoop};
pub use runtime::RuntimeEvent;
