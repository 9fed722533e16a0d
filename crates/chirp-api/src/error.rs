use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use tracing::{error, warn};

use chirp_gateway::RelayError;
use chirp_types::api::ErrorBody;

/// Error response: status plus `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        if e.is_validation() {
            warn!("Rejected query: {}", e);
            Self::bad_request(e.to_string())
        } else {
            error!("Query failed: {}", e);
            Self::internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}
