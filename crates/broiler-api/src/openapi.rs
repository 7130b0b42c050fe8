//! OpenAPI document served at `/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::auth::{
    AccessTokenResponse, ChangePasswordRequest, EmailRequest, LoginRequest, LoginResponse,
    PasswordResetCompleted, RefreshTokenRequest, RegisterRequest, RegisteredUser,
    SetPasswordRequest, TokenIssued, TokenRequest, TokenValidity,
};
use crate::error::ApiError;
use crate::handlers::health::{BuildInfo, HealthResponse, ReadinessChecks, ReadinessResponse};
use broiler_core::{PageMeta, UserPublic, UserRole, UserStatus};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Broiler API",
        description = "Account registration, verification, login, password reset and token refresh"
    ),
    paths(
        crate::handlers::health::health_check,
        crate::handlers::health::readiness_check,
        crate::handlers::auth::register_handler,
        crate::handlers::auth::verify_account_handler,
        crate::handlers::auth::send_confirmation_email_handler,
        crate::handlers::auth::login_handler,
        crate::handlers::auth::change_password_handler,
        crate::handlers::auth::initiate_password_reset_handler,
        crate::handlers::auth::validate_password_reset_token_handler,
        crate::handlers::auth::set_password_handler,
        crate::handlers::auth::refresh_token_handler,
        crate::handlers::auth::logout_handler,
        crate::handlers::user::list_users,
        crate::handlers::user::me,
    ),
    components(
        schemas(
            ApiError,
            HealthResponse,
            BuildInfo,
            ReadinessResponse,
            ReadinessChecks,
            RegisterRequest,
            RegisteredUser,
            LoginRequest,
            LoginResponse,
            TokenRequest,
            EmailRequest,
            ChangePasswordRequest,
            SetPasswordRequest,
            RefreshTokenRequest,
            TokenIssued,
            TokenValidity,
            PasswordResetCompleted,
            AccessTokenResponse,
            UserPublic,
            UserRole,
            UserStatus,
            PageMeta,
        )
    ),
    tags(
        (name = "health", description = "Liveness and readiness checks"),
        (name = "auth", description = "Account lifecycle and sessions"),
        (name = "user", description = "User listing and profile")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by protected paths
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_auth_paths() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;

        assert!(paths.contains_key("/api/v1/auth/register"));
        assert!(paths.contains_key("/api/v1/auth/refresh-token"));
        assert!(paths.contains_key("/api/v1/user/me"));
        assert!(doc
            .components
            .as_ref()
            .is_some_and(|c| c.security_schemes.contains_key("bearer_auth")));
    }
}
