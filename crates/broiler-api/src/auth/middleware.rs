/// Session middleware for protecting routes
///
/// Extracts the access token from the `Authorization: Bearer` header, falling
/// back to the `accessToken` cookie, verifies it, loads the acting user and
/// attaches a [`Principal`] to the request extensions.
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use broiler_core::{User, UserRole, UserStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::policy::authorize_roles;
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::error::AppError;
use crate::state::AppState;

/// Cookie holding the access token
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
/// Cookie holding the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

pub const TOKEN_REQUIRED: &str = "Authorization token is required";
pub const UNAUTHORIZED_ROUTE: &str = "Unauthorized to access this route";
pub const INACTIVE_ACCOUNT: &str = "User account is not active";

/// Authenticated user attached to request extensions
///
/// Extract in handlers with `Extension<Principal>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub status: UserStatus,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            status: user.status,
        }
    }
}

/// Access token from the bearer header, else from the `accessToken` cookie
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(ACCESS_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Require a valid access token held by an `ACTIVE` account
///
/// # Usage
///
/// ```ignore
/// let protected = Router::new()
///     .route("/me", get(me))
///     .layer(middleware::from_fn_with_state(state.clone(), session_middleware));
/// ```
///
/// # Errors
///
/// * `Forbidden` - no token, or the token is invalid or expired
/// * `Unauthorized` - the token has no subject, or its user is gone or not active
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = extract_access_token(request.headers()) else {
        audit_log(&AuditEvent::InvalidToken {
            reason: "missing token".to_string(),
            client: ClientInfo::from_headers(request.headers()),
        });
        return Err(AppError::Forbidden(TOKEN_REQUIRED.to_string()));
    };

    let claims = match state.accounts.sessions().tokens().verify_access_token(&token) {
        Ok(claims) => claims,
        Err(err) => {
            audit_log(&AuditEvent::InvalidToken {
                reason: err.to_string(),
                client: ClientInfo::from_headers(request.headers()),
            });
            return Err(err.into());
        }
    };

    let user_id = claims
        .subject_id()
        .ok_or_else(|| AppError::Unauthorized(UNAUTHORIZED_ROUTE.to_string()))?;

    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized(UNAUTHORIZED_ROUTE.to_string()))?;

    if user.status != UserStatus::Active {
        return Err(AppError::Unauthorized(INACTIVE_ACCOUNT.to_string()));
    }

    request.extensions_mut().insert(Principal::from(&user));

    Ok(next.run(request).await)
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AppError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Must run after [`session_middleware`].
///
/// # Example
///
/// ```ignore
/// let admin = Router::new()
///     .route("/", get(list_users))
///     .route_layer(middleware::from_fn(require_roles(&[UserRole::Admin])))
///     .route_layer(middleware::from_fn_with_state(state, session_middleware));
/// ```
pub fn require_roles(
    allowed: &'static [UserRole],
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let principal = request
                .extensions()
                .get::<Principal>()
                .cloned()
                .ok_or_else(|| AppError::Forbidden(TOKEN_REQUIRED.to_string()))?;

            if let Err(err) = authorize_roles(principal.role, allowed) {
                let required = allowed
                    .iter()
                    .map(UserRole::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                audit_log(&AuditEvent::AccessDenied {
                    user_id: Some(principal.id),
                    email: Some(principal.email.clone()),
                    resource: request.uri().path().to_string(),
                    required_roles: Some(required),
                    client: ClientInfo::from_headers(request.headers()),
                });
                return Err(err);
            }

            Ok(next.run(request).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use axum::{http::StatusCode, middleware, routing::get, Extension, Router};
    use broiler_core::{NewUser, UserChanges, UserRepository};
    use tower::ServiceExt;

    async fn whoami(Extension(principal): Extension<Principal>) -> String {
        principal.email
    }

    fn app(ctx: &TestContext) -> Router {
        Router::new()
            .route("/admin", get(whoami))
            .route_layer(middleware::from_fn(require_roles(&[UserRole::Admin])))
            .route("/me", get(whoami))
            .layer(middleware::from_fn_with_state(
                ctx.state.clone(),
                session_middleware,
            ))
            .with_state(ctx.state.clone())
    }

    async fn active_user(ctx: &TestContext, email: &str, role: UserRole) -> User {
        let user = ctx
            .users
            .create(NewUser::registration(email, "hash", "Ada", "Lovelace").with_role(role))
            .await
            .unwrap();
        ctx.users
            .update(user.id, UserChanges::verified(chrono::Utc::now()))
            .await
            .unwrap()
    }

    fn access_token(ctx: &TestContext, user: &User) -> String {
        ctx.state
            .accounts
            .sessions()
            .tokens()
            .issue_access_token(user.id, user.role)
            .unwrap()
    }

    async fn call(app: Router, uri: &str, header: Option<(&str, String)>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[test]
    fn test_bearer_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        headers.insert(header::COOKIE, "accessToken=from-cookie".parse().unwrap());
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-header"));

        headers.remove(header::AUTHORIZATION);
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-cookie"));

        assert!(extract_access_token(&HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_missing_token_is_forbidden() {
        let ctx = TestContext::new();
        let (status, body) = call(app(&ctx), "/me", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains(TOKEN_REQUIRED));
    }

    #[tokio::test]
    async fn test_valid_bearer_and_cookie() {
        let ctx = TestContext::new();
        let user = active_user(&ctx, "ada@x.com", UserRole::User).await;
        let token = access_token(&ctx, &user);

        let (status, body) = call(
            app(&ctx),
            "/me",
            Some(("authorization", format!("Bearer {token}"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ada@x.com");

        let (status, _) = call(app(&ctx), "/me", Some(("cookie", format!("accessToken={token}")))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_garbage_token_is_forbidden() {
        let ctx = TestContext::new();
        let (status, _) = call(
            app(&ctx),
            "/me",
            Some(("authorization", "Bearer not.a.jwt".to_string())),
        )
        .await;
        assert!(status == StatusCode::FORBIDDEN || status == StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inactive_or_missing_user_is_unauthorized() {
        let ctx = TestContext::new();
        let user = active_user(&ctx, "ada@x.com", UserRole::User).await;
        let token = access_token(&ctx, &user);

        ctx.users
            .update(
                user.id,
                UserChanges {
                    status: Some(UserStatus::Deactivated),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let (status, body) = call(
            app(&ctx),
            "/me",
            Some(("authorization", format!("Bearer {token}"))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains(INACTIVE_ACCOUNT));

        ctx.users.soft_delete(user.id).await.unwrap();
        let (status, _) = call(
            app(&ctx),
            "/me",
            Some(("authorization", format!("Bearer {token}"))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_allow_list() {
        let ctx = TestContext::new();
        let user = active_user(&ctx, "ada@x.com", UserRole::User).await;
        let admin = active_user(&ctx, "root@x.com", UserRole::Admin).await;

        let (status, _) = call(
            app(&ctx),
            "/admin",
            Some(("authorization", format!("Bearer {}", access_token(&ctx, &user)))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            app(&ctx),
            "/admin",
            Some(("authorization", format!("Bearer {}", access_token(&ctx, &admin)))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "root@x.com");
    }
}
