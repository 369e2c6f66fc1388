//! Newline-delimited JSON contract for the host bridge.
//!
//! Inbound lines carry a `kind`: either an agent event (`audio-chunk`,
//! `audio-complete`, `audio-error`, `said`, `lipsync`, `presence`) or a UI
//! command (`gesture`, `user-said`, `stop`). Outbound lines are versioned
//! [`EventEnvelope`]s.

use crate::audio::unlock::Gesture;
use crate::events::AgentEvent;
use crate::pipeline::messages::PipelineCommand;
use crate::runtime::RuntimeEvent;
use crate::session::UserSaid;
use serde::{Deserialize, Serialize};

/// Contract version for outbound envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Event name for messages meant for the remote agent.
pub const DISPATCH_EVENT: &str = "dispatch.user_said";

/// Event name for inbound lines that could not be understood.
pub const ERROR_EVENT: &str = "host.error";

const AGENT_KINDS: [&str; 6] = [
    "audio-chunk",
    "audio-complete",
    "audio-error",
    "said",
    "lipsync",
    "presence",
];

/// UI commands accepted on stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum HostCommand {
    /// Any user interaction; unlocks audio on first use.
    Gesture {
        #[serde(default = "default_gesture")]
        gesture: Gesture,
    },
    /// Text the user typed.
    UserSaid { text: String },
    /// Silence the avatar.
    Stop,
}

fn default_gesture() -> Gesture {
    Gesture::Pointer
}

impl From<HostCommand> for PipelineCommand {
    fn from(command: HostCommand) -> Self {
        match command {
            HostCommand::Gesture { gesture } => Self::Gesture(gesture),
            HostCommand::UserSaid { text } => Self::UserSaid(text),
            HostCommand::Stop => Self::Stop,
        }
    }
}

/// One parsed inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Agent(AgentEvent),
    Command(PipelineCommand),
}

/// Parse one inbound line.
///
/// # Errors
///
/// Returns a [`ContractError`] if the line is not JSON, has no `kind`, names
/// an unknown kind, or has the wrong fields for its kind.
pub fn parse_inbound(line: &str) -> Result<Inbound, ContractError> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| ContractError::new(ContractErrorKind::InvalidJson, e.to_string()))?;
    let kind = value
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            ContractError::new(ContractErrorKind::InvalidEnvelope, "missing `kind`".to_owned())
        })?
        .to_owned();

    if AGENT_KINDS.contains(&kind.as_str()) {
        serde_json::from_value::<AgentEvent>(value)
            .map(Inbound::Agent)
            .map_err(|e| ContractError::new(ContractErrorKind::InvalidPayload, format!("{kind}: {e}")))
    } else if matches!(kind.as_str(), "gesture" | "user-said" | "stop") {
        serde_json::from_value::<HostCommand>(value)
            .map(|c| Inbound::Command(c.into()))
            .map_err(|e| ContractError::new(ContractErrorKind::InvalidPayload, format!("{kind}: {e}")))
    } else {
        Err(ContractError::new(
            ContractErrorKind::UnknownKind,
            format!("unknown kind `{kind}`"),
        ))
    }
}

/// A versioned event envelope from the host to its parent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }

    /// Wrap a runtime event; its tag becomes the event name.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn from_runtime(
        event_id: impl Into<String>,
        event: &RuntimeEvent,
    ) -> serde_json::Result<Self> {
        let mut payload = serde_json::to_value(event)?;
        let name = payload
            .as_object_mut()
            .and_then(|map| map.remove("event"))
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "runtime".to_owned());
        Ok(Self::new(event_id, name, payload))
    }

    /// Wrap an outbound message for the agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn dispatch(event_id: impl Into<String>, message: &UserSaid) -> serde_json::Result<Self> {
        Ok(Self::new(
            event_id,
            DISPATCH_EVENT,
            serde_json::to_value(message)?,
        ))
    }

    /// Report an inbound line that was rejected.
    #[must_use]
    pub fn error(event_id: impl Into<String>, error: &ContractError) -> Self {
        Self::new(
            event_id,
            ERROR_EVENT,
            serde_json::json!({
                "kind": format!("{:?}", error.kind),
                "message": error.message,
            }),
        )
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    InvalidJson,
    InvalidEnvelope,
    UnknownKind,
    InvalidPayload,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn parses_agent_events_and_commands() {
        assert_eq!(
            parse_inbound(r#"{"kind":"audio-complete","streamId":"u1"}"#).unwrap(),
            Inbound::Agent(AgentEvent::AudioComplete {
                stream_id: "u1".into()
            })
        );
        assert_eq!(
            parse_inbound(r#"{"kind":"gesture"}"#).unwrap(),
            Inbound::Command(PipelineCommand::Gesture(Gesture::Pointer))
        );
        assert_eq!(
            parse_inbound(r#"{"kind":"gesture","gesture":"key"}"#).unwrap(),
            Inbound::Command(PipelineCommand::Gesture(Gesture::Key))
        );
        assert_eq!(
            parse_inbound(r#"{"kind":"user-said","text":"hi"}"#).unwrap(),
            Inbound::Command(PipelineCommand::UserSaid("hi".into()))
        );
        assert_eq!(
            parse_inbound(r#"{"kind":"stop"}"#).unwrap(),
            Inbound::Command(PipelineCommand::Stop)
        );
    }

    #[test]
    fn rejects_bad_lines_with_a_category() {
        let kind = |line: &str| parse_inbound(line).unwrap_err().kind;
        assert_eq!(kind("{nope"), ContractErrorKind::InvalidJson);
        assert_eq!(kind(r#"{"streamId":"u1"}"#), ContractErrorKind::InvalidEnvelope);
        assert_eq!(kind(r#"{"kind":"moonwalk"}"#), ContractErrorKind::UnknownKind);
        assert_eq!(kind(r#"{"kind":"audio-chunk"}"#), ContractErrorKind::InvalidPayload);
    }

    #[test]
    fn runtime_event_tag_becomes_event_name() {
        let env = EventEnvelope::from_runtime(
            "e1",
            &RuntimeEvent::StreamStarted {
                stream_id: "u1".into(),
            },
        )
        .unwrap();
        assert_eq!(env.v, EVENT_VERSION);
        assert_eq!(env.event, "stream_started");
        assert_eq!(env.payload, serde_json::json!({"streamId": "u1"}));

        let unit = EventEnvelope::from_runtime("e2", &RuntimeEvent::AudioUnlocked).unwrap();
        assert_eq!(unit.event, "audio_unlocked");
        assert_eq!(unit.payload, serde_json::json!({}));
    }

    #[test]
    fn error_envelope_names_the_category() {
        let err = ContractError::new(ContractErrorKind::UnknownKind, "unknown kind `x`".into());
        let env = EventEnvelope::error("e3", &err);
        assert_eq!(env.event, ERROR_EVENT);
        assert_eq!(env.payload["kind"], "UnknownKind");
    }
}
