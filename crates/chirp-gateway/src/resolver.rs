use anyhow::anyhow;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use chirp_db::{Database, is_unique_violation};
use chirp_types::models::Conversation;

use crate::error::RelayError;
use crate::store::Store;

/// Find or create the conversation between `a` and `b`.
///
/// Argument order doesn't matter: `resolve(a, b)` and `resolve(b, a)` land
/// on the same row.
pub async fn resolve(store: &Store, a: Uuid, b: Uuid) -> Result<Conversation, RelayError> {
    if a == b {
        return Err(RelayError::SelfConversation(a));
    }
    store
        .call("resolve conversation", move |db| find_or_create(db, a, b))
        .await
}

pub fn find_or_create(db: &Database, a: Uuid, b: Uuid) -> anyhow::Result<Conversation> {
    match db.find_conversation(a, b)? {
        Some(row) => row.try_into(),
        None => create_or_refetch(db, a, b),
    }
}

/// Insert a conversation for the pair. If someone else inserted it first,
/// the UNIQUE(user_lo, user_hi) constraint fires and we use their row.
fn create_or_refetch(db: &Database, a: Uuid, b: Uuid) -> anyhow::Result<Conversation> {
    match db.create_conversation(Uuid::new_v4(), a, b, Utc::now()) {
        Ok(row) => {
            debug!("Created conversation {} between {} and {}", row.id, a, b);
            row.try_into()
        }
        Err(e) if is_unique_violation(&e) => {
            debug!("Conversation between {} and {} already exists, re-fetching", a, b);
            db.find_conversation(a, b)?
                .ok_or_else(|| anyhow!("conversation between {} and {} vanished after conflict", a, b))?
                .try_into()
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::DEFAULT_PERSIST_TIMEOUT;

    fn setup() -> (Arc<Database>, Store, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        db.create_user(a, "Alice", "alice@test.com", "x").unwrap();
        db.create_user(b, "Bob", "bob@test.com", "x").unwrap();
        let store = Store::new(db.clone(), DEFAULT_PERSIST_TIMEOUT);
        (db, store, a, b)
    }

    #[tokio::test]
    async fn resolve_is_order_independent() {
        let (_db, store, a, b) = setup();

        let first = resolve(&store, a, b).await.unwrap();
        let second = resolve(&store, b, a).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.is_between(a, b));
    }

    #[tokio::test]
    async fn concurrent_resolves_from_both_sides_agree() {
        let (db, store, a, b) = setup();

        let (x, y) = tokio::join!(resolve(&store, a, b), resolve(&store, b, a));
        assert_eq!(x.unwrap().id, y.unwrap().id);
        assert_eq!(db.conversations_for_user(a).unwrap().len(), 1);
    }

    #[test]
    fn creation_conflict_reuses_existing_row() {
        let (db, _store, a, b) = setup();
        let existing = find_or_create(&db, a, b).unwrap();

        // Simulates losing the race: the find already happened, then the insert collides.
        let reused = create_or_refetch(&db, b, a).unwrap();
        assert_eq!(reused.id, existing.id);
    }

    #[tokio::test]
    async fn self_conversation_is_a_validation_error() {
        let (_db, store, a, _b) = setup();
        let err = resolve(&store, a, a).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn unknown_users_surface_as_persistence_errors() {
        let (_db, store, a, _b) = setup();
        let err = resolve(&store, a, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RelayError::Persistence { .. }));
    }
}
