//! JWT token generation and validation
//!
//! Access and refresh tokens are HMAC-SHA256 JWTs signed with separate
//! secrets. Refresh tokens additionally carry the `parentId` that binds them
//! to a session record in the cache store (see [`super::session`]).

use broiler_core::{AuthConfig, UserRole};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Length of a generated session `parentId`
pub const PARENT_ID_LEN: usize = 20;

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID. Absent subjects decode as empty and are rejected by callers.
    #[serde(default)]
    pub sub: String,
    /// JWT ID - unique per token
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// User's role at issue time
    pub role: UserRole,
    /// Session correlation id (refresh tokens only)
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Claims {
    /// Parsed subject id, if present and well formed
    pub fn subject_id(&self) -> Option<Uuid> {
        Uuid::parse_str(self.sub.trim()).ok()
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token has expired, please login again")]
    Expired,

    #[error("Invalid token")]
    Invalid,

    #[error("Token is malformed")]
    Malformed,

    #[error("Failed to encode JWT: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),

    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidToken
            | ErrorKind::InvalidIssuer
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenError::Invalid,
            _ => TokenError::Malformed,
        }
    }
}

/// Which secret a token is signed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signs and verifies access and refresh tokens
///
/// Stateless: the session record bookkeeping lives in
/// [`super::session::SessionManager`].
pub struct TokenService {
    access: Keys,
    refresh: Keys,
    issuer: String,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access: Keys::new(&config.access_token_secret),
            refresh: Keys::new(&config.refresh_token_secret),
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_token_expiry_secs,
            refresh_ttl_secs: config.refresh_token_expiry_secs,
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    /// Sign a short-lived access token for `user_id`
    pub fn issue_access_token(&self, user_id: Uuid, role: UserRole) -> Result<String, TokenError> {
        self.sign(TokenKind::Access, user_id, role, None)
    }

    /// Sign a refresh token bound to the session `parent_id`
    pub fn issue_refresh_token(
        &self,
        user_id: Uuid,
        role: UserRole,
        parent_id: &str,
    ) -> Result<String, TokenError> {
        self.sign(TokenKind::Refresh, user_id, role, Some(parent_id.to_string()))
    }

    /// Validate signature, issuer and expiry of an access token
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(TokenKind::Access, token)
    }

    /// Validate signature, issuer and expiry of a refresh token
    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(TokenKind::Refresh, token)
    }

    fn keys(&self, kind: TokenKind) -> &Keys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn sign(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        role: UserRole,
        parent_id: Option<String>,
    ) -> Result<String, TokenError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };

        let claims = Claims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl,
            role,
            parent_id,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys(kind).encoding,
        )
        .map_err(TokenError::Encoding)
    }

    fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation)?;
        Ok(data.claims)
    }
}

/// Random alphanumeric string of `len` characters ending in a lowercase letter
///
/// Used for session ids and the secret half of one-time tokens.
pub fn generate_alphanumeric(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut id: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len.saturating_sub(1))
        .map(char::from)
        .collect();
    id.push(rng.gen_range(b'a'..=b'z') as char);
    id
}

/// Random session correlation id
pub fn generate_parent_id() -> String {
    generate_alphanumeric(PARENT_ID_LEN)
}

/// SHA-256 hex digest of a token, used as the stored session value
pub fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
