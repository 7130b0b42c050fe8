//! Request and response models for the auth and user endpoints
//!
//! Request bodies are validated with `validator` before they reach the
//! account service. All JSON is camelCase.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use broiler_core::{User, UserPublic, UserRole};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::session::SessionTokens;

// ============================================================================
// Cache keys
// ============================================================================

/// Cache store namespaces owned by the auth flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    /// `<encodedEmail>` -> reset secret
    PasswordResetToken,
    /// `<token>` -> email
    AccountVerificationToken,
    /// `<parentId>` -> refresh token digest
    RefreshToken,
}

impl CacheKey {
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheKey::PasswordResetToken => "USER:RESET_PASSWORD_TOKEN:",
            CacheKey::AccountVerificationToken => "USER:ACCOUNT_VERIFICATION_TOKEN:",
            CacheKey::RefreshToken => "USER:REFRESH_TOKEN:",
        }
    }

    pub fn key(&self, id: &str) -> String {
        format!("{}{id}", self.prefix())
    }

    pub fn refresh_token(parent_id: &str) -> String {
        CacheKey::RefreshToken.key(parent_id)
    }

    pub fn account_verification(token: &str) -> String {
        CacheKey::AccountVerificationToken.key(token)
    }

    pub fn password_reset(encoded_email: &str) -> String {
        CacheKey::PasswordResetToken.key(encoded_email)
    }
}

// ============================================================================
// One-time tokens
// ============================================================================

/// Separator between the secret and the encoded email
pub const TOKEN_DELIMITER: char = '|';

/// Base64 form of an email address as used in one-time tokens and cache keys
pub fn encode_email(email: &str) -> String {
    BASE64.encode(email.as_bytes())
}

/// Inverse of [`encode_email`]; `None` for anything that is not base64 UTF-8
pub fn decode_email(encoded: &str) -> Option<String> {
    let bytes = BASE64.decode(encoded).ok()?;
    String::from_utf8(bytes).ok().filter(|email| !email.is_empty())
}

/// A `secret|base64(email)` one-time token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeToken {
    pub secret: String,
    pub encoded_email: String,
}

impl OneTimeToken {
    pub fn new(secret: impl Into<String>, email: &str) -> Self {
        Self {
            secret: secret.into(),
            encoded_email: encode_email(email),
        }
    }

    /// Split a presented token; both halves must be non-empty
    pub fn parse(token: &str) -> Option<Self> {
        let (secret, encoded_email) = token.split_once(TOKEN_DELIMITER)?;
        if secret.is_empty() || encoded_email.is_empty() {
            return None;
        }
        Some(Self {
            secret: secret.to_string(),
            encoded_email: encoded_email.to_string(),
        })
    }

    pub fn email(&self) -> Option<String> {
        decode_email(&self.encoded_email)
    }
}

impl std::fmt::Display for OneTimeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{TOKEN_DELIMITER}{}", self.secret, self.encoded_email)
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 5, message = "Password must be at least 5 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    pub middle_name: Option<String>,
    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone: Option<String>,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Body carrying a one-time token (verification or password reset)
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TokenRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct EmailRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 5, message = "Password must be at least 5 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[validate(length(min = 5, message = "Password must be at least 5 characters"))]
    pub password: String,
}

/// Refresh request; falls back to the `refreshToken` cookie when absent
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: Option<String>,
}

/// Query string of `GET /api/v1/user`
///
/// Values stay raw strings so that bad input falls back to defaults
/// (paging) or produces a JSON 400 (status).
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    /// Prefix of first or last name
    pub search: Option<String>,
    /// One of UNVERIFIED, ACTIVE, SUSPENDED, DEACTIVATED (default ACTIVE)
    pub status: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// Success envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data,
        }
    }

    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }
}

/// Login outcome
///
/// An unverified account yields only `{ "isVerified": false }`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub is_verified: bool,
}

impl LoginResponse {
    pub fn unverified() -> Self {
        Self {
            id: None,
            first_name: None,
            last_name: None,
            email: None,
            role: None,
            access_token: None,
            refresh_token: None,
            is_verified: false,
        }
    }

    /// Profile and tokens of an authenticated account
    pub fn verified(user: User, tokens: SessionTokens) -> Self {
        Self {
            id: Some(user.id),
            first_name: Some(user.first_name),
            last_name: Some(user.last_name),
            email: Some(user.email),
            role: Some(user.role),
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            is_verified: user.email_verified_at.is_some(),
        }
    }

    /// Token pair when the login issued one
    pub fn tokens(&self) -> Option<SessionTokens> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(SessionTokens {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
            }),
            _ => None,
        }
    }
}

/// A freshly registered account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisteredUser {
    #[serde(flatten)]
    pub user: UserPublic,
    /// Verification token, outside production only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Outcome of an operation that emailed a one-time token
///
/// `token` is only populated outside production; in production the token
/// travels exclusively by email.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TokenIssued {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenValidity {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PasswordResetCompleted {
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cache_key_namespaces() {
        assert_eq!(CacheKey::refresh_token("abc"), "USER:REFRESH_TOKEN:abc");
        assert_eq!(
            CacheKey::account_verification("t|x"),
            "USER:ACCOUNT_VERIFICATION_TOKEN:t|x"
        );
        assert_eq!(
            CacheKey::password_reset("YUB4LmNvbQ=="),
            "USER:RESET_PASSWORD_TOKEN:YUB4LmNvbQ=="
        );
    }

    #[test]
    fn test_one_time_token_format() {
        let token = OneTimeToken::new("s3cret", "a@x.com");
        assert_eq!(token.to_string(), "s3cret|YUB4LmNvbQ==");

        let parsed = OneTimeToken::parse("s3cret|YUB4LmNvbQ==").unwrap();
        assert_eq!(parsed, token);
        assert_eq!(parsed.email().as_deref(), Some("a@x.com"));
    }

    #[test]
    fn test_one_time_token_rejects_malformed() {
        assert!(OneTimeToken::parse("").is_none());
        assert!(OneTimeToken::parse("no-delimiter").is_none());
        assert!(OneTimeToken::parse("|YUB4LmNvbQ==").is_none());
        assert!(OneTimeToken::parse("secret|").is_none());

        let bad_email = OneTimeToken::parse("secret|***").unwrap();
        assert!(bad_email.email().is_none());
    }

    #[test]
    fn test_register_request_validation() {
        let request: RegisterRequest = serde_json::from_value(serde_json::json!({
            "email": "not-an-email",
            "password": "pw",
            "firstName": "",
            "lastName": "Lovelace",
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("first_name"));
        assert!(!fields.contains_key("last_name"));
    }

    #[test]
    fn test_unverified_login_response_shape() {
        let json = serde_json::to_value(LoginResponse::unverified()).unwrap();
        assert_eq!(json, serde_json::json!({ "isVerified": false }));
        assert!(LoginResponse::unverified().tokens().is_none());
    }

    #[test]
    fn test_envelope() {
        let json = serde_json::to_value(ApiResponse::new(
            "Password reset token is valid",
            TokenValidity { valid: true },
        ))
        .unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["valid"], true);

        let json = serde_json::to_value(ApiResponse::data(1)).unwrap();
        assert!(json.get("message").is_none());
    }

    proptest! {
        #[test]
        fn prop_one_time_token_roundtrips_email(
            secret in "[0-9A-Za-z]{1,40}",
            email in "[a-z0-9._]{1,20}@[a-z0-9]{1,10}\\.[a-z]{2,5}",
        ) {
            let token = OneTimeToken::new(secret.clone(), &email).to_string();
            let parsed = OneTimeToken::parse(&token).unwrap();
            prop_assert_eq!(&parsed.secret, &secret);
            prop_assert_eq!(parsed.email(), Some(email));
        }
    }
}
