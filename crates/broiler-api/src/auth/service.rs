//! Account lifecycle service
//!
//! Orchestrates registration, email verification, login, password change and
//! password reset on top of the record store, the cache store, the session
//! manager and the notification port.
//!
//! One-time tokens live in the cache store:
//!
//! ```text
//! USER:ACCOUNT_VERIFICATION_TOKEN:<secret|b64(email)> -> email       (verify TTL)
//! USER:RESET_PASSWORD_TOKEN:<b64(email)>               -> secret      (reset TTL)
//! ```
//!
//! A new reset request for the same email overwrites the previous secret, so
//! only the latest reset token is honoured.

use broiler_core::config::FrontendConfig;
use broiler_core::{
    normalize_email, AppConfig, CacheStore, EmailAction, EmailData, NewUser, Notifier, Page,
    Pagination, Recipient, User, UserChanges, UserFilter, UserPublic, UserRepository, UserRole,
    UserStatus,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::jwt::generate_alphanumeric;
use super::models::{
    CacheKey, OneTimeToken, PasswordResetCompleted, RegisterRequest, RegisteredUser, TokenIssued,
    TokenValidity, UserListQuery,
};
use super::password::CredentialService;
use super::policy::validate_user_status;
use super::session::{RefreshedSession, SessionManager, SessionTokens};
use crate::error::AppError;

pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const INVALID_VERIFICATION_TOKEN: &str = "Verification token is invalid";
pub const INVALID_RESET_TOKEN: &str = "Password reset token is invalid";
pub const VERIFICATION_REQUEST_FAILED: &str = "verification request failed";

/// Length of the random half of a one-time token
const ONE_TIME_SECRET_LEN: usize = 30;

/// Outcome of a credential check
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Correct credentials on an account that still awaits verification.
    /// A fresh verification email has been sent; no tokens are issued.
    Unverified(User),
    Authenticated { user: User, tokens: SessionTokens },
}

/// Lifecycle settings derived from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub verification_ttl: Duration,
    pub reset_password_ttl: Duration,
    pub frontend: FrontendConfig,
    /// Echo one-time tokens in responses (never in production)
    pub expose_tokens: bool,
}

impl AccountSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            verification_ttl: config.auth.verify_account_token_ttl(),
            reset_password_ttl: config.auth.reset_password_token_ttl(),
            frontend: config.frontend.clone(),
            expose_tokens: !config.environment.is_production(),
        }
    }
}

/// Account lifecycle manager
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    cache: Arc<dyn CacheStore>,
    sessions: SessionManager,
    credentials: CredentialService,
    notifier: Arc<dyn Notifier>,
    settings: AccountSettings,
}

impl AccountService {
    pub fn new(
        config: &AppConfig,
        users: Arc<dyn UserRepository>,
        cache: Arc<dyn CacheStore>,
        notifier: Arc<dyn Notifier>,
        credentials: CredentialService,
    ) -> Self {
        Self {
            sessions: SessionManager::new(&config.auth, cache.clone(), users.clone()),
            users,
            cache,
            credentials,
            notifier,
            settings: AccountSettings::from_config(config),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Register a new account
    ///
    /// The account starts `UNVERIFIED` and a verification email is sent.
    ///
    /// # Errors
    ///
    /// * `BadRequest` - a live account already uses the email
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisteredUser, AppError> {
        let email = normalize_email(&request.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AppError::BadRequest("User already exists".to_string()));
        }

        let password_hash = self.credentials.hash(&request.password).await?;
        let new_user = NewUser::registration(
            email,
            password_hash,
            request.first_name.trim(),
            request.last_name.trim(),
        )
        .with_middle_name(request.middle_name)
        .with_contact(request.phone, request.country);

        let user = self.users.create(new_user).await?;
        let token = self.send_account_verification_email(&user).await?;

        Ok(RegisteredUser {
            user: user.into(),
            token: self.expose(token),
        })
    }

    /// Confirm email ownership and open a session
    ///
    /// # Errors
    ///
    /// * `Forbidden` - unknown or expired token, or the account is no longer
    ///   `UNVERIFIED`
    pub async fn verify_account(&self, token: &str) -> Result<(User, SessionTokens), AppError> {
        let invalid = || AppError::Forbidden(INVALID_VERIFICATION_TOKEN.to_string());

        let key = CacheKey::account_verification(token);
        let email = self.cache.get(&key).await?.ok_or_else(invalid)?;

        let user = self
            .users
            .find_by_email(&email)
            .await?
            .filter(|user| user.status == UserStatus::Unverified)
            .ok_or_else(invalid)?;

        let user = self
            .users
            .update(user.id, UserChanges::verified(Utc::now()))
            .await?;
        self.cache.del(&key).await?;

        let tokens = self
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await?;

        Ok((user, tokens))
    }

    /// Check credentials and open a session
    ///
    /// Unknown email and wrong password fail with the same message.
    ///
    /// # Errors
    ///
    /// * `BadRequest` - invalid email or password
    /// * `Unauthorized` - the account is suspended or deactivated
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AppError> {
        let invalid = || AppError::BadRequest(INVALID_CREDENTIALS.to_string());

        let user = self
            .users
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or_else(invalid)?;

        if !self.credentials.verify(password, &user.password_hash).await? {
            return Err(invalid());
        }

        if user.status == UserStatus::Unverified {
            self.send_account_verification_email(&user).await?;
            return Ok(LoginOutcome::Unverified(user));
        }

        validate_user_status(user.status)?;

        let tokens = self
            .sessions
            .create_session_tokens(user.id, user.role, false)
            .await?;
        let user = self
            .users
            .update(user.id, UserChanges::last_login(Utc::now()))
            .await?;

        Ok(LoginOutcome::Authenticated { user, tokens })
    }

    /// Re-send the verification email of an `UNVERIFIED` account
    ///
    /// # Errors
    ///
    /// * `BadRequest` - no such account, or it is already verified
    pub async fn send_confirmation_email(&self, email: &str) -> Result<TokenIssued, AppError> {
        let user = self
            .users
            .find_by_email(&normalize_email(email))
            .await?
            .filter(|user| user.status == UserStatus::Unverified)
            .ok_or_else(|| AppError::BadRequest(VERIFICATION_REQUEST_FAILED.to_string()))?;

        let token = self.send_account_verification_email(&user).await?;
        Ok(TokenIssued {
            token: self.expose(token),
        })
    }

    /// Replace the password of an authenticated account
    pub async fn change_password(&self, user_id: Uuid, password: &str) -> Result<User, AppError> {
        let password_hash = self.credentials.hash(password).await?;
        Ok(self
            .users
            .update(user_id, UserChanges::password(password_hash))
            .await?)
    }

    /// Email a password reset token
    ///
    /// # Errors
    ///
    /// * `NotFound` - no live account uses the email
    pub async fn initiate_password_reset(&self, email: &str) -> Result<TokenIssued, AppError> {
        let user = self
            .users
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let token = OneTimeToken::new(generate_alphanumeric(ONE_TIME_SECRET_LEN), &user.email);
        self.cache
            .set(
                &CacheKey::password_reset(&token.encoded_email),
                &token.secret,
                Some(self.settings.reset_password_ttl),
            )
            .await?;

        let token = token.to_string();
        self.notify(
            EmailAction::ResetPassword,
            &user,
            "resetPasswordUrl",
            self.settings.frontend.password_reset_link(&token),
        )
        .await;

        Ok(TokenIssued {
            token: self.expose(Some(token)),
        })
    }

    /// Check a reset token without consuming it
    pub async fn validate_password_reset_token(
        &self,
        token: &str,
    ) -> Result<TokenValidity, AppError> {
        self.resolve_reset_token(token).await?;
        Ok(TokenValidity { valid: true })
    }

    /// Consume a reset token and store the new password
    ///
    /// The token is validated in full here; a prior call to
    /// [`Self::validate_password_reset_token`] is not required.
    pub async fn set_password(
        &self,
        token: &str,
        password: &str,
    ) -> Result<(User, PasswordResetCompleted), AppError> {
        let (token, user) = self.resolve_reset_token(token).await?;

        let password_hash = self.credentials.hash(password).await?;
        let user = self
            .users
            .update(user.id, UserChanges::password(password_hash))
            .await?;
        self.cache
            .del(&CacheKey::password_reset(&token.encoded_email))
            .await?;

        Ok((user, PasswordResetCompleted { completed: true }))
    }

    /// See [`SessionManager::refresh_access_token`]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        on_invalidate: impl FnOnce() + Send,
    ) -> Result<RefreshedSession, AppError> {
        self.sessions
            .refresh_access_token(refresh_token, on_invalidate)
            .await
    }

    /// End the session of `refresh_token`, if any
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<bool, AppError> {
        match refresh_token {
            Some(token) if !token.is_empty() => self.sessions.revoke_session(token).await,
            _ => Ok(false),
        }
    }

    /// Page through `USER` accounts
    ///
    /// `status` defaults to `ACTIVE`; an unknown status is a `BadRequest`.
    pub async fn list_users(&self, query: &UserListQuery) -> Result<Page<UserPublic>, AppError> {
        let pagination = Pagination::from_query(query.page.as_deref(), query.limit.as_deref());
        let status = match query.status.as_deref().map(str::trim) {
            Some(status) if !status.is_empty() => status.parse::<UserStatus>()?,
            _ => UserStatus::Active,
        };

        let filter = UserFilter {
            role: Some(UserRole::User),
            status: Some(status),
            search: query.search.clone(),
        };
        let (users, total) = self
            .users
            .find_and_count(&filter, pagination.offset, pagination.limit)
            .await?;

        Ok(Page::new(users, total, pagination).map(UserPublic::from))
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserPublic, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(UserPublic::from)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Issue, store and email a verification token
    ///
    /// Returns `None` for accounts that are not awaiting verification.
    async fn send_account_verification_email(
        &self,
        user: &User,
    ) -> Result<Option<String>, AppError> {
        if user.status != UserStatus::Unverified || user.email_verified_at.is_some() {
            return Ok(None);
        }

        let token =
            OneTimeToken::new(generate_alphanumeric(ONE_TIME_SECRET_LEN), &user.email).to_string();
        self.cache
            .set(
                &CacheKey::account_verification(&token),
                &user.email,
                Some(self.settings.verification_ttl),
            )
            .await?;

        self.notify(
            EmailAction::VerifyAccount,
            user,
            "verificationUrl",
            self.settings.frontend.verify_account_link(&token),
        )
        .await;

        Ok(Some(token))
    }

    async fn resolve_reset_token(&self, token: &str) -> Result<(OneTimeToken, User), AppError> {
        let invalid = || AppError::Forbidden(INVALID_RESET_TOKEN.to_string());

        let token = OneTimeToken::parse(token).ok_or_else(invalid)?;
        let stored = self
            .cache
            .get(&CacheKey::password_reset(&token.encoded_email))
            .await?;
        if stored.as_deref() != Some(token.secret.as_str()) {
            return Err(invalid());
        }

        let email = token.email().ok_or_else(invalid)?;
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or_else(invalid)?;

        Ok((token, user))
    }

    /// Hand a templated email to the notifier; failures are only logged
    async fn notify(&self, action: EmailAction, user: &User, link_var: &str, link: String) {
        let first_name = if user.first_name.is_empty() {
            "there"
        } else {
            user.first_name.as_str()
        };
        let data = EmailData::new()
            .var("firstName", first_name)
            .var("email", user.email.as_str())
            .var(link_var, link);
        let recipients = vec![Recipient::named(user.email.as_str(), first_name)];

        match self.notifier.send(action, recipients, data).await {
            Ok(()) => debug!(%action, user_id = %user.id, "email dispatched"),
            Err(err) => warn!(%action, user_id = %user.id, error = %err, "email dispatch failed"),
        }
    }

    fn expose(&self, token: Option<String>) -> Option<String> {
        token.filter(|_| self.settings.expose_tokens)
    }
}
