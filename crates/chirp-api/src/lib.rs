//! Read-side HTTP routes: users, conversations and message history.
//! Clients use these to load state and reconcile anything the live
//! gateway missed.

pub mod conversations;
pub mod error;
pub mod users;

use std::sync::Arc;

use axum::{Router, routing::get};

use chirp_gateway::Store;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Store,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", get(users::list_users))
        .route("/conversations", get(conversations::find_or_create))
        .route("/conversations/{id}/messages", get(conversations::get_messages))
        .route("/conversations/user/{user_id}", get(conversations::list_for_user))
        .with_state(state)
}
