//! Authentication and account lifecycle
//!
//! This module provides JWT-based session handling with the following components:
//! - Token signing and verification (access and refresh tokens)
//! - Session records for refresh tokens in the cache store
//! - Password hashing with Argon2id
//! - Account lifecycle: registration, verification, login, password reset
//! - Middleware for request authentication and role checks

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod policy;
pub mod service;
pub mod session;

pub use jwt::{Claims, TokenError, TokenService};
pub use middleware::{
    extract_access_token, require_roles, session_middleware, Principal, ACCESS_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE,
};
pub use models::{
    AccessTokenResponse, ApiResponse, CacheKey, ChangePasswordRequest, EmailRequest,
    LoginRequest, LoginResponse, OneTimeToken, PasswordResetCompleted, RefreshTokenRequest,
    RegisterRequest, RegisteredUser, SetPasswordRequest, TokenIssued, TokenRequest, TokenValidity,
    UserListQuery,
};
pub use password::{CredentialService, PasswordConfig, PasswordError};
pub use policy::{authorize_roles, validate_user_status};
pub use service::{AccountService, AccountSettings, LoginOutcome};
pub use session::{RefreshedSession, SessionManager, SessionTokens};
