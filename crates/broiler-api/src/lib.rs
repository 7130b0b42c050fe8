//! Broiler API - HTTP server for account lifecycle and sessions
//!
//! Provides endpoints for registration, email verification, login, password
//! change and reset, access-token refresh, logout and user listing.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod seed;
pub mod state;

use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::handlers::health;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the application router over shared state
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router over in-memory stores, for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    testing::TestContext::new().router()
}

/// In-memory wiring shared by unit and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use crate::auth::{CredentialService, PasswordConfig};
    use broiler_core::{
        AppConfig, Environment, InMemoryUserRepository, MemoryCache, RecordingNotifier,
    };

    /// Application state with handles on its in-memory stores
    pub struct TestContext {
        pub state: Arc<AppState>,
        pub users: Arc<InMemoryUserRepository>,
        pub cache: Arc<MemoryCache>,
        pub outbox: RecordingNotifier,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self::with_config(AppConfig {
                environment: Environment::Test,
                ..AppConfig::default()
            })
        }

        pub fn with_config(config: AppConfig) -> Self {
            let users = Arc::new(InMemoryUserRepository::new());
            let cache = Arc::new(MemoryCache::new());
            let outbox = RecordingNotifier::new();

            let state = Arc::new(AppState::new(
                config,
                users.clone(),
                cache.clone(),
                Arc::new(outbox.clone()),
                CredentialService::new(PasswordConfig::light()),
            ));

            Self {
                state,
                users,
                cache,
                outbox,
            }
        }

        pub fn router(&self) -> Router {
            create_router(self.state.clone())
        }
    }

    impl Default for TestContext {
        fn default() -> Self {
            Self::new()
        }
    }
}
