//! Database row types. These map directly to SQLite rows and stay distinct
//! from the chirp-types models; the `TryFrom` impls below do the parsing.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use chirp_types::models::{Conversation, Message, MessageStatus, User};

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ConversationRow {
    pub id: String,
    pub user_lo: String,
    pub user_hi: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub from_user: String,
    pub to_user: String,
    pub text: String,
    pub status: String,
    pub created_at: String,
}

/// Insert payload for `Database::insert_message`.
#[derive(Debug)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub text: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// Timestamps are stored as RFC 3339 with millisecond precision and a `Z`
/// suffix, so lexical order in SQLite is chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') default: "YYYY-MM-DD HH:MM:SS", naive UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}

fn parse_id(raw: &str, field: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("corrupt {} '{}'", field, raw))
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id, "user id")?,
            name: row.name,
            email: row.email,
        })
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: parse_id(&row.id, "conversation id")?,
            participants: [
                parse_id(&row.user_lo, "participant")?,
                parse_id(&row.user_hi, "participant")?,
            ],
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_id(&row.id, "message id")?,
            conversation_id: parse_id(&row.conversation_id, "conversation_id")?,
            from: parse_id(&row.from_user, "from")?,
            to: parse_id(&row.to_user, "to")?,
            status: row.status.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
            text: row.text,
        })
    }
}
