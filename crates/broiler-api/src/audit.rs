//! Security audit logging for authentication events
//!
//! Every account lifecycle outcome (registration, verification, login,
//! refresh, logout, password changes) and every rejected credential is
//! recorded at INFO level with the "audit" target, so the stream can be
//! filtered and routed separately from application logs.
//!
//! Events carry identifiers, emails and client metadata only. Tokens,
//! passwords and hashes are never part of an event.
//!
//! # Example
//!
//! ```ignore
//! use broiler_api::audit::{audit_log, AuditEvent, ClientInfo};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     email: user.email.clone(),
//!     client: ClientInfo::from_headers(&headers),
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Client metadata attached to every event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    RegistrationFailure {
        email: String,
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Email ownership confirmed, account is now active
    AccountVerified {
        user_id: Uuid,
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    LoginSuccess {
        user_id: Uuid,
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    LoginFailure {
        email: String,
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Correct credentials on an account that is not yet verified
    UnverifiedLogin {
        user_id: Uuid,
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    TokenRefresh {
        user_id: Uuid,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Refresh token without a matching session record; the session was dropped
    RefreshTokenReuse {
        #[serde(flatten)]
        client: ClientInfo,
    },

    Logout {
        user_id: Uuid,
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    PasswordChange {
        user_id: Uuid,
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    PasswordResetRequested {
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    PasswordResetCompleted {
        email: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Authenticated principal lacks the required role
    AccessDenied {
        user_id: Option<Uuid>,
        email: Option<String>,
        resource: String,
        required_roles: Option<String>,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Missing, invalid or expired access token
    InvalidToken {
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },
}

impl AuditEvent {
    /// Log line summary for the event
    pub fn description(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::AccountVerified { .. } => "Account verified",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::UnverifiedLogin { .. } => "Login on unverified account",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshTokenReuse { .. } => "Refresh token rejected, session invalidated",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::PasswordChange { .. } => "Password changed",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::PasswordResetCompleted { .. } => "Password reset completed",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid token",
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::AccountVerified { user_id, .. }
            | AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::UnverifiedLogin { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::PasswordChange { user_id, .. } => Some(*user_id),
            AuditEvent::AccessDenied { user_id, .. } => *user_id,
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            AuditEvent::RegistrationSuccess { email, .. }
            | AuditEvent::RegistrationFailure { email, .. }
            | AuditEvent::AccountVerified { email, .. }
            | AuditEvent::LoginSuccess { email, .. }
            | AuditEvent::LoginFailure { email, .. }
            | AuditEvent::UnverifiedLogin { email, .. }
            | AuditEvent::Logout { email, .. }
            | AuditEvent::PasswordChange { email, .. }
            | AuditEvent::PasswordResetRequested { email, .. }
            | AuditEvent::PasswordResetCompleted { email, .. } => Some(email),
            AuditEvent::AccessDenied { email, .. } => email.as_deref(),
            _ => None,
        }
    }

    pub fn client(&self) -> &ClientInfo {
        match self {
            AuditEvent::RegistrationSuccess { client, .. }
            | AuditEvent::RegistrationFailure { client, .. }
            | AuditEvent::AccountVerified { client, .. }
            | AuditEvent::LoginSuccess { client, .. }
            | AuditEvent::LoginFailure { client, .. }
            | AuditEvent::UnverifiedLogin { client, .. }
            | AuditEvent::TokenRefresh { client, .. }
            | AuditEvent::RefreshTokenReuse { client }
            | AuditEvent::Logout { client, .. }
            | AuditEvent::PasswordChange { client, .. }
            | AuditEvent::PasswordResetRequested { client, .. }
            | AuditEvent::PasswordResetCompleted { client, .. }
            | AuditEvent::AccessDenied { client, .. }
            | AuditEvent::InvalidToken { client, .. } => client,
        }
    }
}

/// Log a security audit event with structured fields
///
/// The full event is also serialized to JSON for log aggregators:
///
/// ```json
/// {
///   "event_type": "login_success",
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "email": "user@example.com",
///   "ip_address": "192.168.1.1",
///   "user_agent": "Mozilla/5.0..."
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let client = event.client();

    info!(
        target: "audit",
        timestamp = %timestamp,
        event = %event_json,
        user_id = ?event.user_id(),
        email = ?event.email(),
        ip_address = ?client.ip_address,
        "{}",
        event.description()
    );
}

/// Extract the client IP address from proxy headers
///
/// Checks X-Forwarded-For (first hop) then X-Real-IP.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.trim().to_string())
}

/// Extract the user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            client: ClientInfo {
                ip_address: Some("192.168.1.1".to_string()),
                user_agent: Some("Mozilla/5.0".to_string()),
            },
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "login_success");
        assert_eq!(json["email"], "test@example.com");
        assert_eq!(json["ip_address"], "192.168.1.1");
    }

    #[test]
    fn test_event_accessors() {
        let id = Uuid::new_v4();
        let event = AuditEvent::TokenRefresh {
            user_id: id,
            client: ClientInfo::default(),
        };
        assert_eq!(event.user_id(), Some(id));
        assert!(event.email().is_none());

        let event = AuditEvent::RefreshTokenReuse {
            client: ClientInfo::default(),
        };
        assert!(event.user_id().is_none());
        assert_eq!(
            event.description(),
            "Refresh token rejected, session invalidated"
        );
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::LoginFailure {
            email: "test@example.com".to_string(),
            reason: "Invalid email or password".to_string(),
            client: ClientInfo::default(),
        });
        audit_log(&AuditEvent::AccessDenied {
            user_id: None,
            email: None,
            resource: "/api/v1/user".to_string(),
            required_roles: Some("ADMIN".to_string()),
            client: ClientInfo::default(),
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.5"));
        assert_eq!(extract_ip_address(&headers), Some("203.0.113.5".to_string()));
    }

    #[test]
    fn test_client_info_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("curl/8.0"),
        );
        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.user_agent.as_deref(), Some("curl/8.0"));
        assert!(client.ip_address.is_none());

        let empty = ClientInfo::from_headers(&HeaderMap::new());
        assert_eq!(empty, ClientInfo::default());
    }
}
