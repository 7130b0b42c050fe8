//! API error handling
//!
//! Author: hephaex@gmail.com

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use utoipa::ToSchema;

use crate::auth::jwt::TokenError;
use crate::auth::password::PasswordError;

/// Whether internal error causes are rendered in response bodies
static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

/// Enable or disable `details` in error responses (off in production)
pub fn set_expose_error_details(expose: bool) {
    EXPOSE_DETAILS.store(expose, Ordering::Relaxed);
}

fn expose_details() -> bool {
    EXPOSE_DETAILS.load(Ordering::Relaxed)
}

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Always `false`
    pub success: bool,
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Internal cause, outside production only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        if expose_details() {
            self.details = Some(details.into());
        }
        self
    }
}

/// Application error type
///
/// `Unauthorized` covers valid credentials refused by account state or
/// policy. `Forbidden` covers missing, invalid or expired credential material
/// and role checks.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
    Database(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg) => f.write_str(msg),
            AppError::Internal(_) => f.write_str("Internal server error"),
            AppError::Database(_) => f.write_str("Database operation failed"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::NotFound(msg) => ApiError::new("NOT_FOUND", msg),
            AppError::BadRequest(msg) => ApiError::new("BAD_REQUEST", msg),
            AppError::Unauthorized(msg) => ApiError::new("UNAUTHORIZED", msg),
            AppError::Forbidden(msg) => ApiError::new("FORBIDDEN", msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                ApiError::new("INTERNAL_ERROR", "Internal server error").with_details(msg)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "database error");
                ApiError::new("DATABASE_ERROR", "Database operation failed").with_details(msg)
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<broiler_core::BroilerError> for AppError {
    fn from(err: broiler_core::BroilerError) -> Self {
        use broiler_core::BroilerError;

        match err {
            BroilerError::NotFound(msg) => AppError::NotFound(format!("{msg} not found")),
            BroilerError::AlreadyExists(what) => {
                AppError::BadRequest(format!("{what} already exists"))
            }
            BroilerError::ValidationError(msg) => AppError::BadRequest(msg),
            BroilerError::DatabaseError(msg) => AppError::Database(msg),
            BroilerError::CacheError(msg) => AppError::Internal(format!("Cache error: {msg}")),
            BroilerError::NotificationError(msg) => {
                AppError::Internal(format!("Notification error: {msg}"))
            }
            BroilerError::ConfigError(msg) => {
                AppError::Internal(format!("Configuration error: {msg}"))
            }
            BroilerError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid => AppError::Forbidden(err.to_string()),
            TokenError::Malformed => AppError::BadRequest(err.to_string()),
            TokenError::Encoding(_) | TokenError::SystemTime(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(format!("Credential service failure: {err}"))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let reason = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{field} {reason}")
            })
            .collect();
        fields.sort();

        AppError::BadRequest(format!("Validation failed: {}", fields.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (status, body) = body_json(AppError::Forbidden("Refresh token is invalid".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "FORBIDDEN");
        assert_eq!(body["message"], "Refresh token is invalid");

        let (status, _) = body_json(AppError::Unauthorized("nope".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = body_json(AppError::NotFound("User not found".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_internal_hides_cause_by_default() {
        let (status, body) = body_json(AppError::Internal("pool exhausted".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_token_error_mapping() {
        assert!(matches!(
            AppError::from(TokenError::Expired),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            AppError::from(TokenError::Invalid),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            AppError::from(TokenError::Malformed),
            AppError::BadRequest(_)
        ));
    }

    #[test]
    fn test_core_error_mapping() {
        use broiler_core::BroilerError;

        let err = AppError::from(BroilerError::AlreadyExists("User".into()));
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "User already exists"));

        let err = AppError::from(BroilerError::DatabaseError("boom".into()));
        assert!(matches!(err, AppError::Database(_)));
    }
}
