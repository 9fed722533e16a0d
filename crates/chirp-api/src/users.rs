use axum::{Json, extract::State};

use chirp_types::models::User;

use crate::AppState;
use crate::error::ApiError;

/// Every registered user. Credential hashes never leave the db layer.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = state
        .store
        .call("list users", |db| {
            db.list_users()?
                .into_iter()
                .map(User::try_from)
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await?;

    Ok(Json(users))
}
