use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

/// Why a relay event was abandoned.
///
/// None of these reach the client: the transport is fire-and-forget, so the
/// connection loop logs them and moves on to the next command.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("send event is missing its {0} id")]
    MissingParticipant(&'static str),

    #[error("user {0} cannot start a conversation with themselves")]
    SelfConversation(Uuid),

    #[error("conversation {conversation} is not between {from} and {to}")]
    ParticipantMismatch {
        conversation: Uuid,
        from: Uuid,
        to: Uuid,
    },

    #[error("no such conversation: {0}")]
    UnknownConversation(Uuid),

    #[error("user {user} is not a participant of conversation {conversation}")]
    NotParticipant { conversation: Uuid, user: Uuid },

    #[error("{op} failed: {reason:#}")]
    Persistence {
        op: &'static str,
        reason: anyhow::Error,
    },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("{op} worker did not complete")]
    Worker {
        op: &'static str,
        #[source]
        source: JoinError,
    },
}

impl RelayError {
    /// Bad input from the client, as opposed to a storage failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingParticipant(_)
                | Self::SelfConversation(_)
                | Self::ParticipantMismatch { .. }
                | Self::UnknownConversation(_)
                | Self::NotParticipant { .. }
        )
    }
}
