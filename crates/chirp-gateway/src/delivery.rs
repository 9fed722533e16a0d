//! Delivery status transitions.
//!
//! A message starts `sent`, becomes `delivered` only if its recipient is
//! online when it is sent, and becomes `read` when the recipient
//! acknowledges the conversation. Every write is conditional on the stored
//! status being earlier, so status never regresses. Callers notify peers
//! only after these functions return, i.e. after the write is durable.

use tracing::debug;
use uuid::Uuid;

use chirp_types::events::GatewayEvent;
use chirp_types::models::{Message, MessageStatus};

use crate::error::RelayError;
use crate::store::Store;

/// A persisted status change, and who should hear about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub message_id: Uuid,
    /// The message's author; status updates go back to them.
    pub author: Uuid,
    pub status: MessageStatus,
}

impl Transition {
    pub fn event(&self) -> GatewayEvent {
        GatewayEvent::StatusUpdate {
            message_id: self.message_id,
            status: self.status,
        }
    }
}

/// `sent -> delivered`. Returns the transition if the write happened, or
/// `None` if the message was already at or past `delivered`.
pub async fn mark_delivered(store: &Store, message: &Message) -> Result<Option<Transition>, RelayError> {
    if !message.status.can_advance_to(MessageStatus::Delivered) {
        return Ok(None);
    }

    let id = message.id;
    let advanced = store
        .call("mark delivered", move |db| {
            db.advance_message_status(id, MessageStatus::Delivered)
        })
        .await?;

    if !advanced {
        debug!("Message {} already past delivered", id);
        return Ok(None);
    }

    Ok(Some(Transition {
        message_id: id,
        author: message.from,
        status: MessageStatus::Delivered,
    }))
}

/// Batch `-> read` for every message in the conversation addressed to
/// `reader` that isn't read yet. The whole batch is persisted before this
/// returns; the result lists exactly what changed, so a repeat call
/// returns nothing.
pub async fn mark_conversation_read(
    store: &Store,
    conversation_id: Uuid,
    reader: Uuid,
) -> Result<Vec<Transition>, RelayError> {
    let rows = store
        .call("mark conversation read", move |db| {
            db.mark_conversation_read(conversation_id, reader)
        })
        .await?;

    rows.into_iter()
        .map(|row| {
            let message: Message = row.try_into().map_err(|reason| RelayError::Persistence {
                op: "mark conversation read",
                reason,
            })?;
            Ok(Transition {
                message_id: message.id,
                author: message.from,
                status: message.status,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::resolver;
    use crate::store::DEFAULT_PERSIST_TIMEOUT;
    use chirp_db::Database;
    use chirp_db::models::NewMessage;

    struct Fixture {
        db: Arc<Database>,
        store: Store,
        alice: Uuid,
        bob: Uuid,
        conversation_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        db.create_user(alice, "Alice", "alice@test.com", "x").unwrap();
        db.create_user(bob, "Bob", "bob@test.com", "x").unwrap();
        let store = Store::new(db.clone(), DEFAULT_PERSIST_TIMEOUT);
        let conversation_id = resolver::resolve(&store, alice, bob).await.unwrap().id;
        Fixture { db, store, alice, bob, conversation_id }
    }

    fn insert(f: &Fixture, from: Uuid, to: Uuid, status: MessageStatus) -> Message {
        let row = f
            .db
            .insert_message(&NewMessage {
                id: Uuid::new_v4(),
                conversation_id: f.conversation_id,
                from,
                to,
                text: "hello".into(),
                status,
                created_at: Utc::now(),
            })
            .unwrap();
        row.try_into().unwrap()
    }

    fn stored_status(f: &Fixture, id: Uuid) -> MessageStatus {
        f.db.get_message(id).unwrap().unwrap().status.parse().unwrap()
    }

    #[tokio::test]
    async fn delivered_once() {
        let f = fixture().await;
        let msg = insert(&f, f.alice, f.bob, MessageStatus::Sent);

        let t = mark_delivered(&f.store, &msg).await.unwrap().unwrap();
        assert_eq!(t.status, MessageStatus::Delivered);
        assert_eq!(t.author, f.alice);
        assert_eq!(stored_status(&f, msg.id), MessageStatus::Delivered);

        // Stale in-memory copy still says "sent"; the conditional write refuses.
        assert!(mark_delivered(&f.store, &msg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_message_is_never_marked_delivered() {
        let f = fixture().await;
        let msg = insert(&f, f.alice, f.bob, MessageStatus::Read);

        assert!(mark_delivered(&f.store, &msg).await.unwrap().is_none());
        assert_eq!(stored_status(&f, msg.id), MessageStatus::Read);
    }

    #[tokio::test]
    async fn read_batch_covers_sent_and_delivered() {
        let f = fixture().await;
        let sent = insert(&f, f.alice, f.bob, MessageStatus::Sent);
        let delivered = insert(&f, f.alice, f.bob, MessageStatus::Delivered);
        let already = insert(&f, f.alice, f.bob, MessageStatus::Read);
        let mine = insert(&f, f.bob, f.alice, MessageStatus::Delivered);

        let batch = mark_conversation_read(&f.store, f.conversation_id, f.bob).await.unwrap();
        let ids: Vec<Uuid> = batch.iter().map(|t| t.message_id).collect();
        assert_eq!(ids, vec![sent.id, delivered.id]);
        assert!(batch.iter().all(|t| t.status == MessageStatus::Read && t.author == f.alice));

        assert_eq!(stored_status(&f, already.id), MessageStatus::Read);
        assert_eq!(stored_status(&f, mine.id), MessageStatus::Delivered);

        assert!(mark_conversation_read(&f.store, f.conversation_id, f.bob).await.unwrap().is_empty());
    }
}
