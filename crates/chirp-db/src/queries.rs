use crate::Database;
use crate::models::{ConversationRow, MessageRow, NewMessage, UserRow, format_timestamp};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use chirp_types::models::MessageStatus;
use rusqlite::{Connection, Row};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, name, email, password, created_at";
const CONVERSATION_COLUMNS: &str = "id, user_lo, user_hi, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, from_user, to_user, text, status, created_at";

/// Order a participant pair the way the `conversations` table stores it.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (String, String) {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b { (a, b) } else { (b, a) }
}

/// True when `err` is SQLite rejecting a row for a UNIQUE/PRIMARY KEY clash.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(e, _)) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, name: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), name, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY name, id"
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove every message, conversation and user. Seed tool only.
    pub fn wipe(&self) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages", [])?;
            tx.execute("DELETE FROM conversations", [])?;
            tx.execute("DELETE FROM users", [])?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Conversations --

    /// Find the conversation for an unordered pair.
    pub fn find_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<ConversationRow>> {
        let (lo, hi) = canonical_pair(a, b);
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_lo = ?1 AND user_hi = ?2"
                ),
                (&lo, &hi),
                map_conversation,
            )
            .optional()
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_id(conn, &id.to_string()))
    }

    /// Insert a conversation for the pair. Fails with a unique violation
    /// (see [`is_unique_violation`]) when the pair already has one.
    pub fn create_conversation(
        &self,
        id: Uuid,
        a: Uuid,
        b: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ConversationRow> {
        if a == b {
            return Err(anyhow!("conversation needs two distinct participants, got {} twice", a));
        }

        let (lo, hi) = canonical_pair(a, b);
        let now = format_timestamp(at);
        let row = ConversationRow {
            id: id.to_string(),
            user_lo: lo,
            user_hi: hi,
            created_at: now.clone(),
            updated_at: now,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_lo, user_hi, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (&row.id, &row.user_lo, &row.user_hi, &row.created_at, &row.updated_at),
            )?;
            Ok(())
        })?;

        Ok(row)
    }

    /// Bump `updated_at` to `at` unless it is already later. Overlapping
    /// sends can finish out of order; the timestamp never moves backward.
    /// Returns false if the conversation doesn't exist.
    pub fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
                (id.to_string(), format_timestamp(at)),
            )?;
            Ok(changed == 1)
        })
    }

    /// All conversations the user takes part in, most recently updated first.
    pub fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| query_conversations_for_user(conn, &user_id.to_string()))
    }

    /// Conversation list for a user: each conversation that has at least
    /// one message, paired with the other participant and the latest
    /// message. Newest conversation first. Runs under a single lock.
    pub fn conversation_summaries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(ConversationRow, UserRow, MessageRow)>> {
        let uid = user_id.to_string();
        self.with_conn(|conn| {
            let mut out = Vec::new();
            for convo in query_conversations_for_user(conn, &uid)? {
                let Some(last) = query_latest_message(conn, &convo.id)? else {
                    continue;
                };
                let peer_id = if convo.user_lo == uid { &convo.user_hi } else { &convo.user_lo };
                let peer = query_user_by_id(conn, peer_id)?
                    .ok_or_else(|| anyhow!("conversation {} references missing user {}", convo.id, peer_id))?;
                out.push((convo, peer, last));
            }
            Ok(out)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage) -> Result<MessageRow> {
        let row = MessageRow {
            id: msg.id.to_string(),
            conversation_id: msg.conversation_id.to_string(),
            from_user: msg.from.to_string(),
            to_user: msg.to.to_string(),
            text: msg.text.clone(),
            status: msg.status.as_str().to_string(),
            created_at: format_timestamp(msg.created_at),
        };

        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                rusqlite::params![
                    row.id,
                    row.conversation_id,
                    row.from_user,
                    row.to_user,
                    row.text,
                    row.status,
                    row.created_at
                ],
            )?;
            Ok(())
        })?;

        Ok(row)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                map_message,
            )
            .optional()
        })
    }

    /// Messages of a conversation in insertion order.
    pub fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([conversation_id.to_string()], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn latest_message(&self, conversation_id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_latest_message(conn, &conversation_id.to_string()))
    }

    /// Move a message to `status` if its current status is earlier.
    /// Returns false when the message is missing or already at/after `status`.
    pub fn advance_message_status(&self, id: Uuid, status: MessageStatus) -> Result<bool> {
        let earlier: Vec<&'static str> = status.predecessors().map(MessageStatus::as_str).collect();
        if earlier.is_empty() {
            return Ok(false);
        }

        let placeholders: Vec<String> = (3..3 + earlier.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "UPDATE messages SET status = ?2 WHERE id = ?1 AND status IN ({})",
            placeholders.join(", ")
        );

        self.with_conn(|conn| {
            let id = id.to_string();
            let next = status.as_str();
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&id, &next];
            params.extend(earlier.iter().map(|s| s as &dyn rusqlite::types::ToSql));
            let changed = conn.execute(&sql, params.as_slice())?;
            Ok(changed == 1)
        })
    }

    /// Mark every message in the conversation addressed to `reader` as read.
    ///
    /// Returns exactly the rows that changed, with their new status, in
    /// insertion order. A second call returns nothing.
    pub fn mark_conversation_read(&self, conversation_id: Uuid, reader: Uuid) -> Result<Vec<MessageRow>> {
        let cid = conversation_id.to_string();
        let rid = reader.to_string();
        let read = MessageStatus::Read.as_str();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut rows = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND to_user = ?2 AND status != ?3
                     ORDER BY created_at ASC, rowid ASC"
                ))?;
                let rows = stmt
                    .query_map((&cid, &rid, read), map_message)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            };

            tx.execute(
                "UPDATE messages SET status = ?3
                 WHERE conversation_id = ?1 AND to_user = ?2 AND status != ?3",
                (&cid, &rid, read),
            )?;
            tx.commit()?;

            for row in &mut rows {
                row.status = read.to_string();
            }
            Ok(rows)
        })
    }
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_lo: row.get(1)?,
        user_hi: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        from_user: row.get(2)?,
        to_user: row.get(3)?,
        text: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        map_user,
    )
    .optional()
}

fn query_conversation_by_id(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        [id],
        map_conversation,
    )
    .optional()
}

fn query_conversations_for_user(conn: &Connection, user_id: &str) -> Result<Vec<ConversationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE user_lo = ?1 OR user_hi = ?1
         ORDER BY updated_at DESC, rowid DESC"
    ))?;
    let rows = stmt
        .query_map([user_id], map_conversation)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_latest_message(conn: &Connection, conversation_id: &str) -> Result<Option<MessageRow>> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1"
        ),
        [conversation_id],
        map_message,
    )
    .optional()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db_with_users(n: usize) -> (Database, Vec<Uuid>) {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            db.create_user(*id, &format!("user{i}"), &format!("user{i}@test.com"), "hash")
                .unwrap();
        }
        (db, ids)
    }

    fn new_message(conversation_id: Uuid, from: Uuid, to: Uuid, text: &str, at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            from,
            to,
            text: text.to_string(),
            status: MessageStatus::Sent,
            created_at: at,
        }
    }

    #[test]
    fn conversation_pair_is_unordered_and_unique() {
        let (db, ids) = db_with_users(2);
        let (a, b) = (ids[0], ids[1]);

        let created = db.create_conversation(Uuid::new_v4(), b, a, Utc::now()).unwrap();
        let found = db.find_conversation(a, b).unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(found.user_lo < found.user_hi);

        let err = db.create_conversation(Uuid::new_v4(), a, b, Utc::now()).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn self_conversation_is_rejected() {
        let (db, ids) = db_with_users(1);
        let err = db.create_conversation(Uuid::new_v4(), ids[0], ids[0], Utc::now()).unwrap_err();
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn status_never_moves_backward() {
        let (db, ids) = db_with_users(2);
        let convo = db.create_conversation(Uuid::new_v4(), ids[0], ids[1], Utc::now()).unwrap();
        let cid: Uuid = convo.id.parse().unwrap();
        let msg = new_message(cid, ids[0], ids[1], "hi", Utc::now());
        db.insert_message(&msg).unwrap();

        assert!(!db.advance_message_status(msg.id, MessageStatus::Sent).unwrap());
        assert!(db.advance_message_status(msg.id, MessageStatus::Delivered).unwrap());
        assert!(!db.advance_message_status(msg.id, MessageStatus::Delivered).unwrap());
        assert!(db.advance_message_status(msg.id, MessageStatus::Read).unwrap());
        assert!(!db.advance_message_status(msg.id, MessageStatus::Delivered).unwrap());

        let row = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(row.status, "read");
        assert!(!db.advance_message_status(Uuid::new_v4(), MessageStatus::Read).unwrap());
    }

    #[test]
    fn mark_read_only_touches_readers_unread_messages() {
        let (db, ids) = db_with_users(2);
        let (alice, bob) = (ids[0], ids[1]);
        let convo = db.create_conversation(Uuid::new_v4(), alice, bob, Utc::now()).unwrap();
        let cid: Uuid = convo.id.parse().unwrap();
        let t0 = Utc::now();

        let to_bob_1 = new_message(cid, alice, bob, "one", t0);
        let to_bob_2 = new_message(cid, alice, bob, "two", t0 + Duration::milliseconds(1));
        let to_alice = new_message(cid, bob, alice, "reply", t0 + Duration::milliseconds(2));
        for m in [&to_bob_1, &to_bob_2, &to_alice] {
            db.insert_message(m).unwrap();
        }
        db.advance_message_status(to_bob_2.id, MessageStatus::Delivered).unwrap();

        let changed = db.mark_conversation_read(cid, bob).unwrap();
        let changed_ids: Vec<String> = changed.iter().map(|r| r.id.clone()).collect();
        assert_eq!(changed_ids, vec![to_bob_1.id.to_string(), to_bob_2.id.to_string()]);
        assert!(changed.iter().all(|r| r.status == "read"));

        assert_eq!(db.get_message(to_alice.id).unwrap().unwrap().status, "sent");
        assert!(db.mark_conversation_read(cid, bob).unwrap().is_empty());
    }

    #[test]
    fn messages_come_back_in_insertion_order() {
        let (db, ids) = db_with_users(2);
        let convo = db.create_conversation(Uuid::new_v4(), ids[0], ids[1], Utc::now()).unwrap();
        let cid: Uuid = convo.id.parse().unwrap();
        let at = Utc::now();

        // Same timestamp: rowid breaks the tie.
        let first = new_message(cid, ids[0], ids[1], "first", at);
        let second = new_message(cid, ids[1], ids[0], "second", at);
        db.insert_message(&first).unwrap();
        db.insert_message(&second).unwrap();

        let texts: Vec<String> = db.get_messages(cid).unwrap().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(db.latest_message(cid).unwrap().unwrap().text, "second");
    }

    #[test]
    fn touch_never_moves_updated_at_backward() {
        let (db, ids) = db_with_users(2);
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(1);
        let convo = db.create_conversation(Uuid::new_v4(), ids[0], ids[1], t1).unwrap();
        let cid: Uuid = convo.id.parse().unwrap();

        assert!(db.touch_conversation(cid, t2).unwrap());
        assert!(db.touch_conversation(cid, t1).unwrap());
        assert_eq!(db.get_conversation(cid).unwrap().unwrap().updated_at, format_timestamp(t2));

        assert!(!db.touch_conversation(Uuid::new_v4(), t2).unwrap());
    }

    #[test]
    fn summaries_skip_empty_conversations_and_sort_newest_first() {
        let (db, ids) = db_with_users(3);
        let (me, bob, carol) = (ids[0], ids[1], ids[2]);
        let t0 = Utc::now();

        let with_bob = db.create_conversation(Uuid::new_v4(), me, bob, t0).unwrap();
        let with_carol = db.create_conversation(Uuid::new_v4(), carol, me, t0).unwrap();
        db.create_conversation(Uuid::new_v4(), bob, carol, t0).unwrap();
        let empty = db.find_conversation(bob, carol).unwrap().unwrap();

        let bob_cid: Uuid = with_bob.id.parse().unwrap();
        let carol_cid: Uuid = with_carol.id.parse().unwrap();
        db.insert_message(&new_message(bob_cid, me, bob, "old", t0)).unwrap();
        db.touch_conversation(bob_cid, t0).unwrap();
        db.insert_message(&new_message(carol_cid, carol, me, "new", t0 + Duration::seconds(1)))
            .unwrap();
        db.touch_conversation(carol_cid, t0 + Duration::seconds(1)).unwrap();

        let summaries = db.conversation_summaries(me).unwrap();
        let got: Vec<(String, String, String)> = summaries
            .into_iter()
            .map(|(c, peer, last)| (c.id, peer.name, last.text))
            .collect();
        assert_eq!(
            got,
            vec![
                (with_carol.id, "user2".to_string(), "new".to_string()),
                (with_bob.id, "user1".to_string(), "old".to_string()),
            ]
        );
        assert!(db.latest_message(empty.id.parse().unwrap()).unwrap().is_none());
    }
}
