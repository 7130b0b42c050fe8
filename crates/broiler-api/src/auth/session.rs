//! Session token lifecycle
//!
//! A login creates a session identified by a random `parentId`. The refresh
//! token carries that id, and the cache store holds one record per session:
//!
//! ```text
//! USER:REFRESH_TOKEN:<parentId> -> sha256(refresh token)   (TTL = refresh expiry)
//! ```
//!
//! A refresh token is honoured only while its record exists and matches.
//! A missing or mismatched record is treated as replay or tampering: the
//! record is dropped and the caller's `on_invalidate` hook clears whatever
//! session state the client holds.

use broiler_core::{AuthConfig, CacheStore, User, UserRepository, UserRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use super::jwt::{generate_parent_id, token_digest, Claims, TokenService};
use super::models::CacheKey;
use super::policy::validate_user_status;
use crate::error::AppError;

pub const INVALID_REFRESH_TOKEN: &str = "Refresh token is invalid";

/// Access/refresh token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    /// Empty when only the access token was reissued
    pub refresh_token: String,
}

/// Result of a successful refresh
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub tokens: SessionTokens,
    pub user_id: Uuid,
}

/// Issues session tokens and keeps their server-side records
pub struct SessionManager {
    tokens: TokenService,
    cache: Arc<dyn CacheStore>,
    users: Arc<dyn UserRepository>,
    refresh_ttl: Duration,
    rotate_refresh_tokens: bool,
}

impl SessionManager {
    pub fn new(
        config: &AuthConfig,
        cache: Arc<dyn CacheStore>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            tokens: TokenService::new(config),
            cache,
            users,
            refresh_ttl: config.refresh_token_ttl(),
            rotate_refresh_tokens: config.rotate_refresh_tokens,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Issue tokens for `user_id`
    ///
    /// A fresh login (`is_refresh == false`) opens a new session record. With
    /// `is_refresh` only an access token is minted and `refresh_token` is
    /// left empty; the caller keeps its existing refresh token.
    pub async fn create_session_tokens(
        &self,
        user_id: Uuid,
        role: UserRole,
        is_refresh: bool,
    ) -> Result<SessionTokens, AppError> {
        let access_token = self.tokens.issue_access_token(user_id, role)?;

        let refresh_token = if is_refresh {
            String::new()
        } else {
            self.open_session(user_id, role).await?
        };

        Ok(SessionTokens {
            access_token,
            refresh_token,
        })
    }

    /// Mint a new access token from a refresh token
    ///
    /// `on_invalidate` runs exactly once when the session is rejected after
    /// the token itself verified (no record, stale record, or user gone).
    /// Signature and expiry failures do not trigger it.
    ///
    /// # Errors
    ///
    /// * `Forbidden` - token expired, invalid, or session rejected
    /// * `Unauthorized` - the account is not active
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        on_invalidate: impl FnOnce() + Send,
    ) -> Result<RefreshedSession, AppError> {
        let claims = self.tokens.verify_refresh_token(refresh_token)?;

        let user = match self.resolve_session(&claims, refresh_token).await? {
            Some(user) => user,
            None => {
                on_invalidate();
                return Err(AppError::Forbidden(INVALID_REFRESH_TOKEN.to_string()));
            }
        };

        validate_user_status(user.status)?;

        let access_token = self.tokens.issue_access_token(user.id, user.role)?;
        let refresh_token = match claims.parent_id.as_deref() {
            Some(parent_id) if self.rotate_refresh_tokens => {
                self.cache.del(&CacheKey::refresh_token(parent_id)).await?;
                self.open_session(user.id, user.role).await?
            }
            _ => refresh_token.to_string(),
        };

        Ok(RefreshedSession {
            tokens: SessionTokens {
                access_token,
                refresh_token,
            },
            user_id: user.id,
        })
    }

    /// Drop the session a refresh token belongs to
    ///
    /// Returns whether a record was removed. Tokens that fail verification
    /// are ignored.
    pub async fn revoke_session(&self, refresh_token: &str) -> Result<bool, AppError> {
        let parent_id = match self.tokens.verify_refresh_token(refresh_token) {
            Ok(Claims {
                parent_id: Some(parent_id),
                ..
            }) => parent_id,
            _ => return Ok(false),
        };

        let key = CacheKey::refresh_token(&parent_id);
        match self.cache.get(&key).await? {
            Some(stored) if stored == token_digest(refresh_token) => Ok(self.cache.del(&key).await?),
            _ => Ok(false),
        }
    }

    async fn open_session(&self, user_id: Uuid, role: UserRole) -> Result<String, AppError> {
        let parent_id = generate_parent_id();
        let refresh_token = self.tokens.issue_refresh_token(user_id, role, &parent_id)?;

        self.cache
            .set(
                &CacheKey::refresh_token(&parent_id),
                &token_digest(&refresh_token),
                Some(self.refresh_ttl),
            )
            .await?;

        Ok(refresh_token)
    }

    /// The session's user, or `None` when the session must be rejected
    async fn resolve_session(
        &self,
        claims: &Claims,
        refresh_token: &str,
    ) -> Result<Option<User>, AppError> {
        let Some(parent_id) = claims.parent_id.as_deref() else {
            return Ok(None);
        };

        let key = CacheKey::refresh_token(parent_id);
        let stored = self.cache.get(&key).await?;

        let record_matches = stored.as_deref() == Some(token_digest(refresh_token).as_str());
        let user = match (record_matches, claims.subject_id()) {
            (true, Some(id)) => self.users.find_by_id(id).await?,
            _ => None,
        };

        if user.is_none() && stored.is_some() {
            self.cache.del(&key).await?;
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broiler_core::{InMemoryUserRepository, MemoryCache, NewUser, UserChanges, UserStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        sessions: SessionManager,
        cache: Arc<MemoryCache>,
        users: Arc<InMemoryUserRepository>,
    }

    fn fixture(config: AuthConfig) -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let users = Arc::new(InMemoryUserRepository::new());
        Fixture {
            sessions: SessionManager::new(&config, cache.clone(), users.clone()),
            cache,
            users,
        }
    }

    async fn active_user(users: &InMemoryUserRepository) -> User {
        let user = users
            .create(NewUser::registration("a@x.com", "hash", "Ada", "Lovelace"))
            .await
            .unwrap();
        users
            .update(user.id, UserChanges::verified(chrono::Utc::now()))
            .await
            .unwrap()
    }

    fn parent_id_of(sessions: &SessionManager, refresh_token: &str) -> String {
        sessions
            .tokens()
            .verify_refresh_token(refresh_token)
            .unwrap()
            .parent_id
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_session_records_digest() {
        let f = fixture(AuthConfig::default());
        let user = active_user(&f.users).await;

        let tokens = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();
        assert!(!tokens.refresh_token.is_empty());

        let parent_id = parent_id_of(&f.sessions, &tokens.refresh_token);
        let stored = f
            .cache
            .get(&CacheKey::refresh_token(&parent_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, token_digest(&tokens.refresh_token));
        assert!(!stored.contains(&tokens.refresh_token));
    }

    #[tokio::test]
    async fn test_refresh_flag_skips_refresh_token() {
        let f = fixture(AuthConfig::default());
        let tokens = f
            .sessions
            .create_session_tokens(Uuid::new_v4(), UserRole::User, true)
            .await
            .unwrap();

        assert!(!tokens.access_token.is_empty());
        assert!(tokens.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_refresh_token_refreshes_immediately() {
        let f = fixture(AuthConfig::default());
        let user = active_user(&f.users).await;
        let login = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();

        let refreshed = f
            .sessions
            .refresh_access_token(&login.refresh_token, || panic!("session invalidated"))
            .await
            .unwrap();

        assert_eq!(refreshed.user_id, user.id);
        assert_eq!(refreshed.tokens.refresh_token, login.refresh_token);
        let claims = f
            .sessions
            .tokens()
            .verify_access_token(&refreshed.tokens.access_token)
            .unwrap();
        assert_eq!(claims.subject_id(), Some(user.id));
    }

    #[tokio::test]
    async fn test_missing_record_invalidates() {
        let f = fixture(AuthConfig::default());
        let user = active_user(&f.users).await;
        let login = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();
        let parent_id = parent_id_of(&f.sessions, &login.refresh_token);
        f.cache.del(&CacheKey::refresh_token(&parent_id)).await.unwrap();

        let calls = AtomicUsize::new(0);
        let result = f
            .sessions
            .refresh_access_token(&login.refresh_token, || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(ref m)) if m == INVALID_REFRESH_TOKEN));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_record_is_deleted() {
        let f = fixture(AuthConfig::default());
        let user = active_user(&f.users).await;
        let login = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();
        let key = CacheKey::refresh_token(&parent_id_of(&f.sessions, &login.refresh_token));
        f.cache.set(&key, "superseded", None).await.unwrap();

        let calls = AtomicUsize::new(0);
        let result = f
            .sessions
            .refresh_access_token(&login.refresh_token, || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(f.cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_user_invalidates() {
        let f = fixture(AuthConfig::default());
        let user = active_user(&f.users).await;
        let login = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();
        f.users.soft_delete(user.id).await.unwrap();

        let calls = AtomicUsize::new(0);
        let result = f
            .sessions
            .refresh_access_token(&login.refresh_token, || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_suspended_user_cannot_refresh() {
        let f = fixture(AuthConfig::default());
        let user = active_user(&f.users).await;
        let login = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();
        f.users
            .update(
                user.id,
                UserChanges {
                    status: Some(UserStatus::Suspended),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = f
            .sessions
            .refresh_access_token(&login.refresh_token, || panic!("session invalidated"))
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_bad_signature_does_not_invalidate() {
        let f = fixture(AuthConfig::default());
        let access = f
            .sessions
            .tokens()
            .issue_access_token(Uuid::new_v4(), UserRole::User)
            .unwrap();

        let result = f
            .sessions
            .refresh_access_token(&access, || panic!("session invalidated"))
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_rotation_replaces_session() {
        let f = fixture(AuthConfig {
            rotate_refresh_tokens: true,
            ..Default::default()
        });
        let user = active_user(&f.users).await;
        let login = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();

        let refreshed = f
            .sessions
            .refresh_access_token(&login.refresh_token, || panic!("session invalidated"))
            .await
            .unwrap();
        assert_ne!(refreshed.tokens.refresh_token, login.refresh_token);

        let calls = AtomicUsize::new(0);
        let replay = f
            .sessions
            .refresh_access_token(&login.refresh_token, || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(replay.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(f
            .sessions
            .refresh_access_token(&refreshed.tokens.refresh_token, || {})
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_revoke_session() {
        let f = fixture(AuthConfig::default());
        let user = active_user(&f.users).await;
        let login = f
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await
            .unwrap();

        assert!(f.sessions.revoke_session(&login.refresh_token).await.unwrap());
        assert!(!f.sessions.revoke_session(&login.refresh_token).await.unwrap());
        assert!(!f.sessions.revoke_session("garbage").await.unwrap());

        let result = f
            .sessions
            .refresh_access_token(&login.refresh_token, || {})
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }
}
