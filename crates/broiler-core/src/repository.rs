//! User record store
//!
//! Typed repository over the `users` table. The PostgreSQL adapter uses
//! SQLx; the in-memory adapter backs development runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{normalize_email, BroilerError, NewUser, Result, User, UserChanges, UserRole, UserStatus};

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    /// Case-insensitive prefix of the first or last name
    pub search: Option<String>,
}

impl UserFilter {
    fn matches(&self, user: &User) -> bool {
        if self.role.is_some_and(|role| user.role != role) {
            return false;
        }
        if self.status.is_some_and(|status| user.status != status) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                user.first_name.to_lowercase().starts_with(&term)
                    || user.last_name.to_lowercase().starts_with(&term)
            }
            _ => true,
        }
    }
}

/// Record store operations for users
///
/// Lookups never return soft-deleted rows.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user; fails with `AlreadyExists` when a live user holds the email
    async fn create(&self, user: NewUser) -> Result<User>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Case-insensitive email lookup
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Apply `changes` to an existing user; fails with `NotFound` if absent
    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<User>;

    /// A page of users matching `filter`, newest first, plus the total match count
    async fn find_and_count(
        &self,
        filter: &UserFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<User>, i64)>;

    /// Mark a user deleted; fails with `NotFound` if absent
    async fn soft_delete(&self, id: Uuid) -> Result<()>;

    /// Connectivity check used by the health endpoint
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// PostgreSQL user store
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Open a connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| BroilerError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BroilerError::DatabaseError(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, middle_name, \
     phone, country, role, status, email_verified_at, last_login_at, \
     created_at, updated_at, deleted_at";

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    middle_name: Option<String>,
    phone: Option<String>,
    country: Option<String>,
    role: String,
    status: String,
    email_verified_at: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = BroilerError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            middle_name: row.middle_name,
            phone: row.phone,
            country: row.country,
            role: row.role.parse()?,
            status: row.status.parse()?,
            email_verified_at: row.email_verified_at,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn db_error(context: &str, e: sqlx::Error) -> BroilerError {
    BroilerError::DatabaseError(format!("{context}: {e}"))
}

/// Escape LIKE wildcards in user-supplied search text
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(role) = filter.role {
        builder.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("{}%", escape_like(term));
        builder
            .push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (
                id, email, password_hash, first_name, last_name, middle_name,
                phone, country, role, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(normalize_email(&user.email))
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.middle_name)
        .bind(&user.phone)
        .bind(&user.country)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                BroilerError::AlreadyExists("User".to_string())
            }
            e => db_error("Failed to create user", e),
        })?;

        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get user", e))?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = $1 AND deleted_at IS NULL"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get user", e))?;

        row.map(User::try_from).transpose()
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<User> {
        if self.find_by_id(id).await?.is_none() {
            return Err(BroilerError::NotFound(format!("User {id}")));
        }

        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            UPDATE users SET
                password_hash = COALESCE($2, password_hash),
                status = COALESCE($3, status),
                email_verified_at = COALESCE($4, email_verified_at),
                last_login_at = COALESCE($5, last_login_at),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.password_hash)
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.email_verified_at)
        .bind(changes.last_login_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update user", e))?;

        row.ok_or_else(|| BroilerError::NotFound(format!("User {id}")))?
            .try_into()
    }

    async fn find_and_count(
        &self,
        filter: &UserFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<User>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to count users", e))?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<UserRow> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list users", e))?;

        let users = rows
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok((users, total))
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to delete user", e))?;

        if result.rows_affected() == 0 {
            return Err(BroilerError::NotFound(format!("User {id}")));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory user store
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;
        let email = normalize_email(&user.email);

        if users.values().any(|u| !u.is_deleted() && u.email == email) {
            return Err(BroilerError::AlreadyExists("User".to_string()));
        }

        let now = Utc::now();
        let record = User {
            id: Uuid::new_v4(),
            email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            middle_name: user.middle_name,
            phone: user.phone,
            country: user.country,
            role: user.role,
            status: user.status,
            email_verified_at: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&id).filter(|u| !u.is_deleted()).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| !u.is_deleted() && u.email == email)
            .cloned())
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<User> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| BroilerError::NotFound(format!("User {id}")))?;

        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(status) = changes.status {
            user.status = status;
        }
        if let Some(at) = changes.email_verified_at {
            user.email_verified_at = Some(at);
        }
        if let Some(at) = changes.last_login_at {
            user.last_login_at = Some(at);
        }
        user.updated_at = Utc::now();

        Ok(user.clone())
    }

    async fn find_and_count(
        &self,
        filter: &UserFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<User>, i64)> {
        let users = self.users.read().await;
        let mut matched: Vec<&User> = users
            .values()
            .filter(|u| !u.is_deleted() && filter.matches(u))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| BroilerError::NotFound(format!("User {id}")))?;

        let now = Utc::now();
        user.deleted_at = Some(now);
        user.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, first: &str, last: &str) -> NewUser {
        NewUser::registration(email, "hash", first, last)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = InMemoryUserRepository::new();
        let user = repo
            .create(new_user("Ada@Example.com", "Ada", "Lovelace"))
            .await
            .unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.status, UserStatus::Unverified);

        let by_email = repo.find_by_email("ADA@example.COM").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(repo.find_by_id(user.id).await.unwrap().is_some());
        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let repo = InMemoryUserRepository::new();
        repo.create(new_user("a@x.com", "A", "B")).await.unwrap();

        let err = repo.create(new_user("A@X.COM", "C", "D")).await.unwrap_err();
        assert!(matches!(err, BroilerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_soft_delete_frees_email() {
        let repo = InMemoryUserRepository::new();
        let user = repo.create(new_user("a@x.com", "A", "B")).await.unwrap();

        repo.soft_delete(user.id).await.unwrap();
        assert!(repo.find_by_id(user.id).await.unwrap().is_none());
        assert!(repo.find_by_email("a@x.com").await.unwrap().is_none());
        assert!(matches!(
            repo.soft_delete(user.id).await,
            Err(BroilerError::NotFound(_))
        ));

        assert!(repo.create(new_user("a@x.com", "A", "B")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update() {
        let repo = InMemoryUserRepository::new();
        let user = repo.create(new_user("a@x.com", "A", "B")).await.unwrap();

        let now = Utc::now();
        let updated = repo.update(user.id, UserChanges::verified(now)).await.unwrap();
        assert_eq!(updated.status, UserStatus::Active);
        assert_eq!(updated.email_verified_at, Some(now));
        assert_eq!(updated.password_hash, "hash");

        let updated = repo
            .update(user.id, UserChanges::password("new-hash"))
            .await
            .unwrap();
        assert_eq!(updated.password_hash, "new-hash");
        assert_eq!(updated.status, UserStatus::Active);

        let missing = repo.update(Uuid::new_v4(), UserChanges::default()).await;
        assert!(matches!(missing, Err(BroilerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_and_count_filters() {
        let repo = InMemoryUserRepository::new();
        let now = Utc::now();

        for (email, first, last) in [
            ("ada@x.com", "Ada", "Lovelace"),
            ("alan@x.com", "Alan", "Turing"),
            ("grace@x.com", "Grace", "Hopper"),
        ] {
            let user = repo.create(new_user(email, first, last)).await.unwrap();
            repo.update(user.id, UserChanges::verified(now)).await.unwrap();
        }
        repo.create(new_user("new@x.com", "Adele", "Pending"))
            .await
            .unwrap();
        repo.create(new_user("root@x.com", "Admin", "Root").with_role(UserRole::Admin))
            .await
            .unwrap();

        let active_users = UserFilter {
            role: Some(UserRole::User),
            status: Some(UserStatus::Active),
            search: None,
        };
        let (page, total) = repo.find_and_count(&active_users, 0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);

        let (page, _) = repo.find_and_count(&active_users, 2, 2).await.unwrap();
        assert_eq!(page.len(), 1);

        let search = UserFilter {
            search: Some("a".to_string()),
            ..active_users.clone()
        };
        let (page, total) = repo.find_and_count(&search, 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert!(page.iter().all(|u| u.first_name.starts_with('A')));

        let by_last = UserFilter {
            search: Some("HOP".to_string()),
            ..active_users
        };
        let (page, _) = repo.find_and_count(&by_last, 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].email, "grace@x.com");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("ab"), "ab");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
