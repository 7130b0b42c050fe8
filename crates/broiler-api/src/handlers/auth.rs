//! Authentication API handlers
//!
//! Provides HTTP endpoints for registration, verification, login, password
//! management and token refresh. Successful logins and refreshes also set the
//! `accessToken` / `refreshToken` cookies.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::auth::middleware::{Principal, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::auth::{
    AccessTokenResponse, ApiResponse, ChangePasswordRequest, EmailRequest, LoginOutcome,
    LoginRequest, LoginResponse, RefreshTokenRequest, RegisterRequest, SessionTokens,
    SetPasswordRequest, TokenRequest,
};
use crate::error::AppError;
use crate::handlers::ValidatedJson;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use validator::Validate;

fn auth_cookie(name: &'static str, value: String, max_age_secs: u64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::seconds(
            i64::try_from(max_age_secs).unwrap_or(i64::MAX),
        ))
        .build()
}

/// Set both session cookies, each living as long as its token
fn set_auth_cookies(state: &AppState, jar: CookieJar, tokens: &SessionTokens) -> CookieJar {
    let ttl = state.accounts.sessions().tokens();
    let secure = state.secure_cookies();

    jar.add(auth_cookie(
        ACCESS_TOKEN_COOKIE,
        tokens.access_token.clone(),
        ttl.access_ttl_secs(),
        secure,
    ))
    .add(auth_cookie(
        REFRESH_TOKEN_COOKIE,
        tokens.refresh_token.clone(),
        ttl.refresh_ttl_secs(),
        secure,
    ))
}

fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, "")).http_only(true).path("/").build();
    cookie.make_removal();
    cookie
}

/// Expire both session cookies, whether or not the request carried them
fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    jar.add(removal_cookie(ACCESS_TOKEN_COOKIE))
        .add(removal_cookie(REFRESH_TOKEN_COOKIE))
}

/// Register a new user account
///
/// The account is created `UNVERIFIED` with role `USER`, and a verification
/// link is emailed. Outside production the verification token is echoed in
/// the response.
///
/// # Request Body
///
/// * `email` - Valid email address (unique among live accounts)
/// * `password` - At least 5 characters
/// * `firstName`, `lastName` - Required
/// * `middleName`, `phone`, `country` - Optional
///
/// # Responses
///
/// * `201 Created` - Account created
/// * `400 Bad Request` - Invalid input or email already registered
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created successfully", body = crate::auth::RegisteredUser),
        (status = 400, description = "Invalid input or user already exists", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = request.email.clone();

    match state.accounts.register(request).await {
        Ok(registered) => {
            audit_log(&AuditEvent::RegistrationSuccess {
                user_id: registered.user.id,
                email: registered.user.email.clone(),
                client: ClientInfo::from_headers(&headers),
            });
            Ok((
                StatusCode::CREATED,
                Json(ApiResponse::new("Account created successfully", registered)),
            ))
        }
        Err(err) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email,
                reason: err.to_string(),
                client: ClientInfo::from_headers(&headers),
            });
            Err(err)
        }
    }
}

/// Verify an account with the emailed token
///
/// Activates the account and returns a session.
#[utoipa::path(
    post,
    path = "/api/v1/auth/verify-account",
    tag = "auth",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Account verification successful", body = LoginResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 403, description = "Verification token is invalid", body = crate::error::ApiError),
    )
)]
pub async fn verify_account_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, tokens) = state.accounts.verify_account(&request.token).await?;

    audit_log(&AuditEvent::AccountVerified {
        user_id: user.id,
        email: user.email.clone(),
        client: ClientInfo::from_headers(&headers),
    });

    Ok(Json(ApiResponse::new(
        "Account verification successful",
        LoginResponse::verified(user, tokens),
    )))
}

/// Re-send the verification email of an unverified account
#[utoipa::path(
    post,
    path = "/api/v1/auth/send-confirmation-email",
    tag = "auth",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Verification email sent successfully", body = crate::auth::TokenIssued),
        (status = 400, description = "Verification request failed", body = crate::error::ApiError),
    )
)]
pub async fn send_confirmation_email_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state.accounts.send_confirmation_email(&request.email).await?;

    Ok(Json(ApiResponse::new(
        "Verification email sent successfully",
        issued,
    )))
}

/// Login with email and password
///
/// An unverified account receives a fresh verification email and
/// `{ "isVerified": false }` without tokens. Otherwise the session tokens
/// are returned and set as cookies.
///
/// # Responses
///
/// * `200 OK` - Login processed
/// * `400 Bad Request` - Invalid email or password
/// * `401 Unauthorized` - Account suspended or deactivated
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login processed", body = LoginResponse),
        (status = 400, description = "Invalid email or password", body = crate::error::ApiError),
        (status = 401, description = "Account not active", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let client = ClientInfo::from_headers(&headers);

    let outcome = match state.accounts.login(&request.email, &request.password).await {
        Ok(outcome) => outcome,
        Err(err) => {
            audit_log(&AuditEvent::LoginFailure {
                email: request.email,
                reason: err.to_string(),
                client,
            });
            return Err(err);
        }
    };

    match outcome {
        LoginOutcome::Unverified(user) => {
            audit_log(&AuditEvent::UnverifiedLogin {
                user_id: user.id,
                email: user.email,
                client,
            });
            Ok(Json(ApiResponse::new(
                "Please check your email to verify your account",
                LoginResponse::unverified(),
            ))
            .into_response())
        }
        LoginOutcome::Authenticated { user, tokens } => {
            audit_log(&AuditEvent::LoginSuccess {
                user_id: user.id,
                email: user.email.clone(),
                client,
            });
            let jar = set_auth_cookies(&state, jar, &tokens);
            Ok((jar, Json(ApiResponse::data(LoginResponse::verified(user, tokens)))).into_response())
        }
    }
}

/// Change the password of the authenticated user
#[utoipa::path(
    post,
    path = "/api/v1/auth/change-password",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed successfully"),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 403, description = "Missing or invalid token", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .accounts
        .change_password(principal.id, &request.password)
        .await?;

    audit_log(&AuditEvent::PasswordChange {
        user_id: principal.id,
        email: principal.email,
        client: ClientInfo::from_headers(&headers),
    });

    Ok(Json(ApiResponse::new("Password changed successfully", ())))
}

/// Email a password reset link
///
/// Unknown emails are reported as `404`. Outside production the reset token
/// is echoed in the response.
#[utoipa::path(
    post,
    path = "/api/v1/auth/password-reset/initiate",
    tag = "auth",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Password reset email sent", body = crate::auth::TokenIssued),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    )
)]
pub async fn initiate_password_reset_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .accounts
        .initiate_password_reset(&request.email)
        .await?;

    audit_log(&AuditEvent::PasswordResetRequested {
        email: request.email,
        client: ClientInfo::from_headers(&headers),
    });

    Ok(Json(ApiResponse::new("Password reset email sent", issued)))
}

/// Check a password reset token without consuming it
#[utoipa::path(
    post,
    path = "/api/v1/auth/password-reset/validate-token",
    tag = "auth",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Password reset token is valid", body = crate::auth::TokenValidity),
        (status = 403, description = "Password reset token is invalid", body = crate::error::ApiError),
    )
)]
pub async fn validate_password_reset_token_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let validity = state
        .accounts
        .validate_password_reset_token(&request.token)
        .await?;

    Ok(Json(ApiResponse::new(
        "Password reset token is valid",
        validity,
    )))
}

/// Complete a password reset
#[utoipa::path(
    post,
    path = "/api/v1/auth/set-password",
    tag = "auth",
    request_body = SetPasswordRequest,
    responses(
        (status = 200, description = "Password reset complete", body = crate::auth::PasswordResetCompleted),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 403, description = "Password reset token is invalid", body = crate::error::ApiError),
    )
)]
pub async fn set_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<SetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, completed) = state
        .accounts
        .set_password(&request.token, &request.password)
        .await?;

    audit_log(&AuditEvent::PasswordResetCompleted {
        email: user.email,
        client: ClientInfo::from_headers(&headers),
    });

    Ok(Json(ApiResponse::new(
        "Password reset complete. Please login with your new password",
        completed,
    )))
}

/// Exchange a refresh token for a new access token
///
/// The token is read from the body, falling back to the `refreshToken`
/// cookie. A token whose session record is gone or superseded clears both
/// cookies.
///
/// # Responses
///
/// * `200 OK` - New access token issued
/// * `401 Unauthorized` - Account not active
/// * `403 Forbidden` - Expired, invalid or revoked refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh-token",
    tag = "auth",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = AccessTokenResponse),
        (status = 400, description = "Refresh token is required", body = crate::error::ApiError),
        (status = 401, description = "Account not active", body = crate::error::ApiError),
        (status = 403, description = "Refresh token is invalid", body = crate::error::ApiError),
    )
)]
pub async fn refresh_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: RefreshTokenRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RefreshTokenRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| AppError::BadRequest(format!("Invalid request body: {err}")))?
    };
    request.validate()?;

    let presented = request
        .refresh_token
        .or_else(|| {
            jar.get(REFRESH_TOKEN_COOKIE)
                .map(|cookie| cookie.value().to_string())
        })
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()))?;

    let client = ClientInfo::from_headers(&headers);
    let invalidated = AtomicBool::new(false);

    let result = state
        .accounts
        .refresh(&presented, || invalidated.store(true, Ordering::Relaxed))
        .await;

    match result {
        Ok(session) => {
            audit_log(&AuditEvent::TokenRefresh {
                user_id: session.user_id,
                client,
            });
            let jar = set_auth_cookies(&state, jar, &session.tokens);
            Ok((
                jar,
                Json(ApiResponse::new(
                    "Token refreshed successfully",
                    AccessTokenResponse {
                        access_token: session.tokens.access_token,
                    },
                )),
            )
                .into_response())
        }
        Err(err) if invalidated.load(Ordering::Relaxed) => {
            audit_log(&AuditEvent::RefreshTokenReuse { client });
            Ok((clear_auth_cookies(jar), err).into_response())
        }
        Err(err) => Err(err),
    }
}

/// End the current session
///
/// Drops the session record of the `refreshToken` cookie, if any, and clears
/// both cookies.
#[utoipa::path(
    get,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out successfully"),
        (status = 403, description = "Missing or invalid token", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Err(err) = state.accounts.logout(refresh_token.as_deref()).await {
        tracing::warn!(user_id = %principal.id, error = %err, "failed to revoke session on logout");
    }

    audit_log(&AuditEvent::Logout {
        user_id: principal.id,
        email: principal.email,
        client: ClientInfo::from_headers(&headers),
    });

    Ok((
        clear_auth_cookies(jar),
        Json(ApiResponse::new("Logged out successfully", ())),
    ))
}
