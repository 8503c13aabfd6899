//! Account and session endpoints (/register, /login, /logout, /auth/me)

use axum::{
    Form, Json, Router,
    extract::{FromRequest, FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;
use crate::domain::users;
use crate::services::cookies;
use crate::services::error::{ApiError, LogErr};
use crate::services::{password, session};

pub fn routes() -> Router<Arc<AppState>> {
    // Per client IP: burst of 10, then one request every 6 seconds
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(6)
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .layer(rate_limit_layer)
        .route("/logout", post(logout))
        .route("/auth/me", get(get_me))
}

// ============================================================================
// Auth Extractor - validates the session token and extracts user_id
// ============================================================================

/// Extractor that validates the access_token cookie (or a Bearer token)
/// and returns the user_id
pub struct AuthUser(pub i64);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let token = jar
            .get(cookies::config::ACCESS_TOKEN_NAME)
            .map(|c| c.value().to_string())
            .or_else(|| bearer_token(&parts.headers).map(str::to_string))
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let user_id = session::validate_access_token(&token, &state.config.jwt_secret)
            .map_err(|e| {
                log::debug!("Rejected session token: {}", e);
                ApiError::unauthorized("Invalid or expired session")
            })?;

        Ok(AuthUser(user_id))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// ============================================================================
// Credentials body - form or JSON
// ============================================================================

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

/// Accepts `application/json` or an urlencoded form.
struct CredentialsBody(Credentials);

impl<S: Send + Sync> FromRequest<S> for CredentialsBody {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let credentials = if is_json {
            Json::<Credentials>::from_request(req, state)
                .await
                .map(|Json(c)| c)
                .map_err(|e| ApiError::bad_request(e.body_text()))?
        } else {
            Form::<Credentials>::from_request(req, state)
                .await
                .map(|Form(c)| c)
                .map_err(|e| ApiError::bad_request(e.body_text()))?
        };

        Ok(Self(credentials))
    }
}

// ============================================================================
// Account endpoints
// ============================================================================

#[derive(Serialize)]
struct MeResponse {
    id: i64,
    email: String,
}

/// POST /register - Create an account
async fn register(
    State(state): State<Arc<AppState>>,
    CredentialsBody(credentials): CredentialsBody,
) -> Result<(StatusCode, Json<MeResponse>), ApiError> {
    let email = credentials.email.trim().to_string();
    if email.is_empty() || credentials.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    // Hashing is CPU bound; run it on the blocking pool
    let iterations = state.config.password_iterations;
    let plain = credentials.password;
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&plain, iterations))
        .await
        .log_500("Password hashing task failed")?;

    match users::create_user(&state.db, &email, &hash).await {
        Ok(id) => {
            log::info!("Registered user {}", id);
            Ok((StatusCode::CREATED, Json(MeResponse { id, email })))
        }
        Err(e) if users::is_duplicate(&e) => Err(ApiError::new(
            StatusCode::CONFLICT,
            "Email already registered",
        )),
        Err(e) => {
            log::error!("Create user error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR.into())
        }
    }
}

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("Invalid credentials")
}

/// POST /login - Verify credentials and set the session cookie
async fn login(
    State(state): State<Arc<AppState>>,
    CredentialsBody(credentials): CredentialsBody,
) -> Result<Response, ApiError> {
    let user = users::get_user_by_email(&state.db, credentials.email.trim())
        .await
        .log_500("Get user by email error")?
        .ok_or_else(invalid_credentials)?;

    let stored = user.password;
    let plain = credentials.password;
    let verified = tokio::task::spawn_blocking(move || password::verify_password(&plain, &stored))
        .await
        .log_500("Password verification task failed")?
        .log_500("Stored password hash unreadable")?;

    if !verified {
        log::info!("Failed login for user {}", user.id);
        return Err(invalid_credentials());
    }

    let token = session::create_access_token(user.id, &state.config.jwt_secret)
        .log_500("Failed to create access token")?;

    // 204 No Content - only sets the cookie
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().append(
        header::SET_COOKIE,
        cookies::build_access_cookie(&token, state.config.secure_cookies)?,
    );

    Ok(response)
}

/// POST /logout - Clear the session cookie
async fn logout() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, cookies::build_clear_access_cookie());
    response
}

/// GET /auth/me - Current user info (validates session)
async fn get_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let user = users::get_user_by_id(&state.db, user_id)
        .await
        .log_500("Get user by ID error")?;

    // A valid token for a deleted user is still unauthorized
    let user = user.ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
    }))
}
