use chrono::Utc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use chirp_db::models::NewMessage;
use chirp_types::events::{GatewayCommand, GatewayEvent};
use chirp_types::models::{Conversation, Message, MessageStatus};

use crate::delivery::{self, Transition};
use crate::error::RelayError;
use crate::presence::{ConnHandle, Presence};
use crate::resolver;
use crate::store::Store;

/// Binds inbound connection commands to presence, persistence and the
/// delivery state machine, and fans the resulting events out.
#[derive(Clone)]
pub struct Dispatcher {
    presence: Presence,
    store: Store,
}

impl Dispatcher {
    pub fn new(presence: Presence, store: Store) -> Self {
        Self { presence, store }
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Handle one command and log the outcome. Failures never propagate:
    /// the client gets no error reply and the connection carries on.
    pub async fn dispatch(&self, conn: &ConnHandle, cmd: GatewayCommand) {
        let name = cmd.name();
        match self.handle(conn, cmd).await {
            Ok(()) => {}
            Err(e) if e.is_validation() => {
                warn!("Dropped {} from connection {}: {}", name, conn.id(), e);
            }
            Err(e) => {
                error!("Failed {} from connection {}: {}", name, conn.id(), e);
            }
        }
    }

    pub async fn handle(&self, conn: &ConnHandle, cmd: GatewayCommand) -> Result<(), RelayError> {
        match cmd {
            GatewayCommand::Join { user_id } => {
                self.join(conn, user_id).await;
                Ok(())
            }
            GatewayCommand::Send { from, to, text } => self.send(conn, from, to, text).await.map(drop),
            GatewayCommand::Read {
                conversation_id,
                reader_id,
            } => self.read(conversation_id, reader_id).await.map(drop),
            GatewayCommand::TypingStart { from, to } => {
                self.typing(from, to, true).await;
                Ok(())
            }
            GatewayCommand::TypingStop { from, to } => {
                self.typing(from, to, false).await;
                Ok(())
            }
        }
    }

    pub async fn join(&self, conn: &ConnHandle, user_id: Uuid) {
        self.presence.register(user_id, conn).await;
    }

    /// Store a message and relay it.
    ///
    /// `conn` is the connection the send arrived on; it always gets the
    /// stored message back. The recipient, if online, gets it too and the
    /// message is marked delivered before either side is told.
    pub async fn send(
        &self,
        conn: &ConnHandle,
        from: Option<Uuid>,
        to: Option<Uuid>,
        text: String,
    ) -> Result<Message, RelayError> {
        let from = from.ok_or(RelayError::MissingParticipant("sender"))?;
        let to = to.ok_or(RelayError::MissingParticipant("recipient"))?;

        let conversation = resolver::resolve(&self.store, from, to).await?;
        if !conversation.is_between(from, to) {
            return Err(RelayError::ParticipantMismatch {
                conversation: conversation.id,
                from,
                to,
            });
        }

        let now = Utc::now();
        let new_message = NewMessage {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            from,
            to,
            text,
            status: MessageStatus::Sent,
            created_at: now,
        };
        let mut message: Message = self
            .store
            .call("create message", move |db| db.insert_message(&new_message)?.try_into())
            .await?;

        if let Some(recipient) = self.presence.lookup(to).await {
            let delivered = delivery::mark_delivered(&self.store, &message).await?;
            if let Some(t) = &delivered {
                message.status = t.status;
            }

            recipient.send(GatewayEvent::NewMessage(message.clone()));
            if let Some(t) = delivered {
                recipient.send(t.event());
                conn.send(t.event());
            }
            debug!("Relayed message {} from {} to {}", message.id, from, to);
        } else {
            debug!("Recipient {} offline, message {} stays {}", to, message.id, message.status);
        }

        conn.send(GatewayEvent::NewMessage(message.clone()));

        let conversation_id = conversation.id;
        self.store
            .call("touch conversation", move |db| db.touch_conversation(conversation_id, now))
            .await?;

        Ok(message)
    }

    /// `reader` acknowledges a conversation. Each newly read message
    /// produces one status update for its author, if they're online.
    pub async fn read(&self, conversation_id: Uuid, reader: Uuid) -> Result<Vec<Transition>, RelayError> {
        let conversation = self
            .store
            .call("load conversation", move |db| {
                db.get_conversation(conversation_id)?
                    .map(Conversation::try_from)
                    .transpose()
            })
            .await?
            .ok_or(RelayError::UnknownConversation(conversation_id))?;

        if !conversation.has_participant(reader) {
            return Err(RelayError::NotParticipant {
                conversation: conversation_id,
                user: reader,
            });
        }

        let transitions = delivery::mark_conversation_read(&self.store, conversation_id, reader).await?;

        for t in &transitions {
            if !self.presence.send_to_user(t.author, t.event()).await {
                trace!("Author {} of {} offline, read receipt not relayed", t.author, t.message_id);
            }
        }

        if !transitions.is_empty() {
            info!(
                "{} read {} message(s) in conversation {}",
                reader,
                transitions.len(),
                conversation_id
            );
        }
        Ok(transitions)
    }

    /// Relay a typing indicator. Nothing is stored; returns whether the
    /// peer was online to receive it.
    pub async fn typing(&self, from: Uuid, to: Uuid, typing: bool) -> bool {
        let relayed = self
            .presence
            .send_to_user(to, GatewayEvent::TypingUpdate { from, typing })
            .await;
        trace!("Typing {} from {} to {} (relayed: {})", typing, from, to, relayed);
        relayed
    }

    pub async fn disconnect(&self, conn_id: Uuid) -> Vec<Uuid> {
        self.presence.unregister(conn_id).await
    }
}
