use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageStatus};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Full set of online users, sent to every connection on each presence change
    OnlineSet { user_ids: Vec<Uuid> },

    /// A message was stored. Sent to the author, and to the recipient if online.
    NewMessage(Message),

    /// A message moved to a later delivery status
    StatusUpdate {
        message_id: Uuid,
        status: MessageStatus,
    },

    /// The peer started or stopped typing
    TypingUpdate { from: Uuid, typing: bool },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Bind this connection to a user
    Join { user_id: Uuid },

    /// Send a direct message. Missing ids are tolerated here and rejected
    /// by the dispatcher, so the drop gets logged with context.
    Send {
        #[serde(default, deserialize_with = "blank_as_none")]
        from: Option<Uuid>,
        #[serde(default, deserialize_with = "blank_as_none")]
        to: Option<Uuid>,
        #[serde(default, deserialize_with = "null_as_empty")]
        text: String,
    },

    /// Acknowledge every message in a conversation addressed to the reader
    Read {
        conversation_id: Uuid,
        reader_id: Uuid,
    },

    TypingStart { from: Uuid, to: Uuid },

    TypingStop { from: Uuid, to: Uuid },
}

impl GatewayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Send { .. } => "send",
            Self::Read { .. } => "read",
            Self::TypingStart { .. } => "typing-start",
            Self::TypingStop { .. } => "typing-stop",
        }
    }
}

/// Accepts a UUID, `null`, or an empty string (treated as absent).
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Accepts a string or `null` (treated as empty).
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
