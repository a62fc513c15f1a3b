//! Application error type and its HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::assistant::AssistantError;
use crate::auth::AuthError;
use crate::chat::ChatError;

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request requires a signed-in session.
    #[error("not signed in")]
    Unauthorized,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::InvalidState) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::Provider(_) | AuthError::Http(_)) => StatusCode::BAD_GATEWAY,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Chat(ChatError::EmptyMessage) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Chat(ChatError::AssistantBusy) => StatusCode::CONFLICT,
            Self::Assistant(AssistantError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Assistant(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(AuthError::InvalidState).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(ChatError::AssistantBusy).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(AssistantError::NotConfigured).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
