//! Session identity and the outbound "user said" dispatch.

use crate::config::SessionConfig;
use crate::error::{AvatarError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Who is talking to the avatar, and in which chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub chat_id: String,
    pub speaker_name: String,
}

impl SessionIdentity {
    /// Identity from config; missing ids are generated for this process.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            user_id: config
                .user_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            chat_id: config
                .chat_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            speaker_name: config.speaker_name.clone(),
        }
    }
}

/// Metadata attached to every outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMetadata {
    pub user_id: String,
    pub chat_id: String,
    pub connected_users: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// "User said `<text>`" sent to the remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSaid {
    pub name: String,
    pub content: String,
    pub metadata: DispatchMetadata,
}

impl UserSaid {
    /// Build a dispatch for `text`. Blank text yields `None`.
    pub fn new(identity: &SessionIdentity, text: &str, connected_users: u32) -> Option<Self> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        Some(Self {
            name: identity.speaker_name.clone(),
            content: content.to_owned(),
            metadata: DispatchMetadata {
                user_id: identity.user_id.clone(),
                chat_id: identity.chat_id.clone(),
                connected_users,
                timestamp: Utc::now().timestamp_millis(),
            },
        })
    }
}

/// Transport for outbound messages to the remote agent.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    /// Deliver one message.
    async fn user_said(&self, message: UserSaid) -> Result<()>;
}

/// Dispatcher that forwards messages onto a channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<UserSaid>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UserSaid>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AgentDispatcher for ChannelDispatcher {
    async fn user_said(&self, message: UserSaid) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| AvatarError::Dispatch("dispatch channel closed".into()))
    }
}
