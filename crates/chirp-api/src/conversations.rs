use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use chirp_gateway::resolver;
use chirp_types::api::{ConversationResponse, ConversationSummary, Participant};
use chirp_types::models::{Message, User};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub user1: Option<String>,
    pub user2: Option<String>,
}

fn required_id(raw: Option<&str>) -> Result<Uuid, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("user1 and user2 required"))?;
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid user id '{}'", raw)))
}

/// `GET /conversations?user1=&user2=`: find-or-create, same path the relay
/// uses on send.
pub async fn find_or_create(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let a = required_id(query.user1.as_deref())?;
    let b = required_id(query.user2.as_deref())?;

    let conversation = resolver::resolve(&state.store, a, b).await?;
    Ok(Json(ConversationResponse { conversation }))
}

/// `GET /conversations/{id}/messages`, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .store
        .call("list messages", move |db| {
            db.get_messages(conversation_id)?
                .into_iter()
                .map(Message::try_from)
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await?;

    Ok(Json(messages))
}

/// `GET /conversations/user/{user_id}`: the user's conversations, newest
/// first, each with the peer and a preview of the latest message.
pub async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let summaries = state
        .store
        .call("list conversations", move |db| {
            db.conversation_summaries(user_id)?
                .into_iter()
                .map(|(convo, peer, last)| -> anyhow::Result<ConversationSummary> {
                    let peer = User::try_from(peer)?;
                    let last = Message::try_from(last)?;
                    Ok(ConversationSummary {
                        id: convo.id.parse()?,
                        user: Participant {
                            id: peer.id,
                            name: peer.name,
                        },
                        last_message: last.text,
                        last_time: last.created_at,
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await?;

    Ok(Json(summaries))
}
