//! Broiler Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used by the broiler API:
//! - User identity model (roles, lifecycle status, soft deletion)
//! - Common error types
//! - Record store port for users (PostgreSQL and in-memory adapters)
//! - Cache store port for one-time and refresh tokens (Redis and in-memory adapters)
//! - Notification port for transactional email
//! - Configuration management
//! - Pagination primitives for listings

pub mod cache;
pub mod config;
pub mod notify;
pub mod repository;

pub use cache::{CacheStore, MemoryCache, RedisCache};
pub use config::{AppConfig, AuthConfig, CacheBackendKind, ConfigError, Environment};
pub use notify::{
    EmailAction, EmailData, LogNotifier, Notifier, Recipient, RecordingNotifier, SentEmail,
};
pub use repository::{InMemoryUserRepository, PgUserRepository, UserFilter, UserRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for store and domain operations
#[derive(Error, Debug)]
pub enum BroilerError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BroilerError>;

// ============================================================================
// Users
// ============================================================================

/// Access level of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::User => "USER",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = BroilerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "USER" => Ok(Self::User),
            _ => Err(BroilerError::ValidationError(format!("unknown role `{s}`"))),
        }
    }
}

/// Lifecycle state of an account
///
/// Accounts are created `Unverified` and move to `Active` once the email
/// address is confirmed. `Suspended` and `Deactivated` are set by
/// administrative tooling outside this service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    #[default]
    Unverified,
    Active,
    Suspended,
    Deactivated,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Unverified => "UNVERIFIED",
            UserStatus::Active => "ACTIVE",
            UserStatus::Suspended => "SUSPENDED",
            UserStatus::Deactivated => "DEACTIVATED",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = BroilerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNVERIFIED" => Ok(Self::Unverified),
            "ACTIVE" => Ok(Self::Active),
            "SUSPENDED" => Ok(Self::Suspended),
            "DEACTIVATED" => Ok(Self::Deactivated),
            _ => Err(BroilerError::ValidationError(format!("unknown status `{s}`"))),
        }
    }
}

/// Stored user record
///
/// `password_hash` is never serialized; API responses go through
/// [`UserPublic`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Normalized (lowercase) email address, unique among live users
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Public projection of a user (no credential material)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            middle_name: user.middle_name,
            phone: user.phone,
            country: user.country,
            role: user.role,
            status: user.status,
            email_verified_at: user.email_verified_at,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Data required to create a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
}

impl NewUser {
    /// A self-registered account: role `USER`, status `UNVERIFIED`
    pub fn registration(
        email: impl Into<String>,
        password_hash: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            email: normalize_email(&email.into()),
            password_hash: password_hash.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            middle_name: None,
            phone: None,
            country: None,
            role: UserRole::User,
            status: UserStatus::Unverified,
        }
    }

    pub fn with_contact(mut self, phone: Option<String>, country: Option<String>) -> Self {
        self.phone = phone;
        self.country = country;
        self
    }

    pub fn with_middle_name(mut self, middle_name: Option<String>) -> Self {
        self.middle_name = middle_name;
        self
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_status(mut self, status: UserStatus) -> Self {
        self.status = status;
        self
    }
}

/// Partial update applied by [`UserRepository::update`]
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub password_hash: Option<String>,
    pub status: Option<UserStatus>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserChanges {
    pub fn password(password_hash: impl Into<String>) -> Self {
        Self {
            password_hash: Some(password_hash.into()),
            ..Default::default()
        }
    }

    pub fn verified(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(UserStatus::Active),
            email_verified_at: Some(at),
            ..Default::default()
        }
    }

    pub fn last_login(at: DateTime<Utc>) -> Self {
        Self {
            last_login_at: Some(at),
            ..Default::default()
        }
    }
}

/// Lowercase and trim an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================================================
// Pagination
// ============================================================================

/// Largest page size a listing will serve
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Highest page number; keeps `offset` within `i64`
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_LIMIT;

/// Page size used when the client does not ask for one
pub const DEFAULT_PAGE_LIMIT: i64 = 10;

/// Resolved page window for a listing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    /// Build a window from raw query values
    ///
    /// Unparseable values fall back to the defaults. `limit` is clamped to
    /// `[1, MAX_PAGE_LIMIT]` and `page` to `[1, MAX_PAGE]`.
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page.and_then(|p| p.trim().parse::<i64>().ok()).unwrap_or(1);
        let limit = limit
            .and_then(|l| l.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        Self::new(page, limit)
    }

    pub fn new(page: i64, limit: i64) -> Self {
        let page = page.clamp(1, MAX_PAGE);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        Self {
            page,
            limit,
            offset: (page - 1) * limit,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_LIMIT)
    }
}

/// Page metadata returned alongside listing records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: i64,
    pub per_page: i64,
    pub page_count: i64,
    pub total_count: i64,
    pub has_previous_pages: bool,
    pub has_next_pages: bool,
}

/// A page of records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub records: Vec<T>,
    pub meta_data: PageMeta,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, total_count: i64, pagination: Pagination) -> Self {
        let page_count = (total_count + pagination.limit - 1) / pagination.limit;
        Self {
            records,
            meta_data: PageMeta {
                page: pagination.page,
                per_page: pagination.limit,
                page_count,
                total_count,
                has_previous_pages: pagination.page > 1,
                has_next_pages: pagination.page < page_count,
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            records: self.records.into_iter().map(f).collect(),
            meta_data: self.meta_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_role_and_status_parse() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!("USER".parse::<UserRole>().unwrap(), UserRole::User);
        assert!("owner".parse::<UserRole>().is_err());

        assert_eq!("active".parse::<UserStatus>().unwrap(), UserStatus::Active);
        assert_eq!(
            "DEACTIVATED".parse::<UserStatus>().unwrap(),
            UserStatus::Deactivated
        );
        assert!("banned".parse::<UserStatus>().is_err());
    }

    #[test]
    fn test_role_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&UserRole::Admin).unwrap(), "\"ADMIN\"");
        assert_eq!(
            serde_json::to_string(&UserStatus::Unverified).unwrap(),
            "\"UNVERIFIED\""
        );
    }

    #[test]
    fn test_registration_defaults() {
        let user = NewUser::registration(" A@X.com ", "hash", "Ada", "Lovelace");
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.status, UserStatus::Unverified);
    }

    #[test]
    fn test_user_public_hides_password() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            middle_name: None,
            phone: None,
            country: None,
            role: UserRole::User,
            status: UserStatus::Active,
            email_verified_at: Some(now),
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let raw = serde_json::to_string(&user).unwrap();
        assert!(!raw.contains("argon2id"));

        let public = serde_json::to_value(UserPublic::from(user)).unwrap();
        assert!(public.get("password").is_none());
        assert!(public.get("passwordHash").is_none());
        assert_eq!(public["firstName"], "Ada");
    }

    #[test]
    fn test_pagination_defaults() {
        let p = Pagination::from_query(None, None);
        assert_eq!(p, Pagination { page: 1, limit: 10, offset: 0 });

        let p = Pagination::from_query(Some("abc"), Some("xyz"));
        assert_eq!(p, Pagination { page: 1, limit: 10, offset: 0 });

        let p = Pagination::from_query(Some("3"), Some("500"));
        assert_eq!(p, Pagination { page: 3, limit: 100, offset: 200 });

        let p = Pagination::from_query(Some("0"), Some("0"));
        assert_eq!(p, Pagination { page: 1, limit: 1, offset: 0 });
    }

    #[test]
    fn test_page_meta() {
        let page = Page::new(vec![1, 2, 3], 23, Pagination::new(2, 10));
        assert_eq!(page.meta_data.page_count, 3);
        assert!(page.meta_data.has_previous_pages);
        assert!(page.meta_data.has_next_pages);

        let last = Page::new(vec![1], 21, Pagination::new(3, 10));
        assert!(!last.meta_data.has_next_pages);

        let empty: Page<i32> = Page::new(vec![], 0, Pagination::default());
        assert_eq!(empty.meta_data.page_count, 0);
        assert!(!empty.meta_data.has_next_pages);
    }

    #[test]
    fn test_pagination_huge_page_does_not_overflow() {
        let p = Pagination::from_query(Some("9223372036854775807"), Some("10"));
        assert_eq!(p.page, MAX_PAGE);
        assert!(p.offset >= 0);

        let p = Pagination::new(i64::MAX, i64::MAX);
        assert_eq!(p.limit, MAX_PAGE_LIMIT);
        assert_eq!(p.offset, (MAX_PAGE - 1) * MAX_PAGE_LIMIT);
    }

    proptest! {
        #[test]
        fn prop_pagination_is_clamped(page in any::<i64>(), limit in any::<i64>()) {
            let p = Pagination::from_query(Some(&page.to_string()), Some(&limit.to_string()));
            prop_assert!((1..=MAX_PAGE).contains(&p.page));
            prop_assert!((1..=MAX_PAGE_LIMIT).contains(&p.limit));
            prop_assert_eq!(p.offset, (p.page - 1) * p.limit);
        }
    }
}
