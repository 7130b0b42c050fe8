//! Account status and role policy
//!
//! Pure predicates shared by login, refresh and the session middleware.

use broiler_core::{UserRole, UserStatus};

use crate::error::AppError;

pub const UNVERIFIED_MESSAGE: &str =
    "Account has not been verified, please verify your account to continue";
pub const SUSPENDED_MESSAGE: &str = "Account has been suspended, please contact support";
pub const DEACTIVATED_MESSAGE: &str = "Account has been deactivated, please contact support";

/// Only `Active` accounts may hold a session
pub fn validate_user_status(status: UserStatus) -> Result<(), AppError> {
    match status {
        UserStatus::Active => Ok(()),
        UserStatus::Unverified => Err(AppError::Unauthorized(UNVERIFIED_MESSAGE.to_string())),
        UserStatus::Suspended => Err(AppError::Unauthorized(SUSPENDED_MESSAGE.to_string())),
        UserStatus::Deactivated => Err(AppError::Unauthorized(DEACTIVATED_MESSAGE.to_string())),
    }
}

/// Role allow-list check
pub fn authorize_roles(role: UserRole, allowed: &[UserRole]) -> Result<(), AppError> {
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You do not have permission to access this resource".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_policy() {
        assert!(validate_user_status(UserStatus::Active).is_ok());

        for (status, message) in [
            (UserStatus::Unverified, UNVERIFIED_MESSAGE),
            (UserStatus::Suspended, SUSPENDED_MESSAGE),
            (UserStatus::Deactivated, DEACTIVATED_MESSAGE),
        ] {
            match validate_user_status(status) {
                Err(AppError::Unauthorized(m)) => assert_eq!(m, message),
                other => panic!("unexpected result for {status}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_role_policy() {
        assert!(authorize_roles(UserRole::Admin, &[UserRole::Admin]).is_ok());
        assert!(authorize_roles(UserRole::User, &[UserRole::Admin, UserRole::User]).is_ok());
        assert!(matches!(
            authorize_roles(UserRole::User, &[UserRole::Admin]),
            Err(AppError::Forbidden(_))
        ));
        assert!(authorize_roles(UserRole::Admin, &[]).is_err());
    }
}
