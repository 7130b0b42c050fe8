//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::{require_roles, session_middleware};
use crate::handlers::{auth, user};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use broiler_core::UserRole;
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/verify-account", post(auth::verify_account_handler))
        .route(
            "/auth/send-confirmation-email",
            post(auth::send_confirmation_email_handler),
        )
        .route("/auth/login", post(auth::login_handler))
        .route(
            "/auth/password-reset/initiate",
            post(auth::initiate_password_reset_handler),
        )
        .route(
            "/auth/password-reset/validate-token",
            post(auth::validate_password_reset_token_handler),
        )
        .route("/auth/set-password", post(auth::set_password_handler))
        .route("/auth/refresh-token", post(auth::refresh_token_handler));

    // Admin routes; the role check runs after the session middleware below
    let admin_routes = Router::new()
        .route("/user", get(user::list_users))
        .route_layer(middleware::from_fn(require_roles(&[UserRole::Admin])));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/auth/change-password", post(auth::change_password_handler))
        .route("/auth/logout", get(auth::logout_handler))
        .route("/user/me", get(user::me))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state, session_middleware));

    // Combine routes
    Router::new().merge(public_routes).merge(protected_routes)
}
