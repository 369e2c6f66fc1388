//! Event-driven avatar pipeline: agent events in, audio and morph targets out.

pub mod coordinator;
pub mod messages;
