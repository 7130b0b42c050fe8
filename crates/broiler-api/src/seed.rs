//! Account seeding
//!
//! Creates ready-to-use accounts (already verified and `ACTIVE`) so a fresh
//! deployment has an administrator able to reach the admin-only routes.
//! Self-registration only ever produces `USER` accounts.

use broiler_core::{
    normalize_email, NewUser, User, UserChanges, UserRepository, UserRole, UserStatus,
};
use chrono::Utc;
use validator::ValidateEmail;

use crate::auth::password::CredentialService;
use crate::error::AppError;

/// Shortest password a seeded account may use; same rule as registration
pub const MIN_PASSWORD_LEN: usize = 5;

/// Account to create
#[derive(Debug, Clone)]
pub struct SeedAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone)]
pub enum SeedOutcome {
    Created(User),
    /// A live account already uses the email; it is left untouched
    Existing(User),
}

impl SeedOutcome {
    pub fn user(&self) -> &User {
        match self {
            SeedOutcome::Created(user) | SeedOutcome::Existing(user) => user,
        }
    }
}

/// Create `account` as a verified, active user unless its email is taken
///
/// # Errors
///
/// * `BadRequest` - malformed email, empty name or short password
pub async fn seed_account(
    users: &dyn UserRepository,
    credentials: &CredentialService,
    account: SeedAccount,
) -> Result<SeedOutcome, AppError> {
    let email = normalize_email(&account.email);
    if !email.validate_email() {
        return Err(AppError::BadRequest(format!("Invalid email address: {email}")));
    }
    if account.first_name.trim().is_empty() || account.last_name.trim().is_empty() {
        return Err(AppError::BadRequest("First and last name are required".to_string()));
    }
    if account.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if let Some(existing) = users.find_by_email(&email).await? {
        tracing::info!(user_id = %existing.id, "seed account already exists, skipping");
        return Ok(SeedOutcome::Existing(existing));
    }

    let password_hash = credentials.hash(&account.password).await?;
    let user = users
        .create(
            NewUser::registration(
                email,
                password_hash,
                account.first_name.trim(),
                account.last_name.trim(),
            )
            .with_role(account.role)
            .with_status(UserStatus::Active),
        )
        .await?;
    let user = users
        .update(user.id, UserChanges::verified(Utc::now()))
        .await?;

    tracing::info!(user_id = %user.id, role = %user.role, "seed account created");
    Ok(SeedOutcome::Created(user))
}
