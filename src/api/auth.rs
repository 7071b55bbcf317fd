//! Session-cookie auth for the dashboard.
//!
//! Login/register answer with an HTTP-only `session_token` cookie; the
//! session guard middleware resolves it back to a user on every protected
//! request. Failed logins are rate limited per (ip, user-agent).

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::types::{
    AuthResponse, LoginRequest, MessageResponse, RegisterRequest, SessionResponse, UserResponse,
};
use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::ratelimit;
use crate::users::User;

const SESSION_COOKIE: &str = "session_token";
const SESSION_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// Authenticated user attached to protected requests.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

/// Routes that require a valid session.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/sessions", get(list_sessions))
}

fn client_identity(headers: &HeaderMap) -> (String, String) {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "local".to_string());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    (ip, user_agent)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        part.trim()
            .strip_prefix(SESSION_COOKIE)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v.to_string())
    })
}

fn set_session_cookie(response: &mut Response, token: &str, max_age: i64) {
    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token, max_age
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
}

/// POST /v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Response> {
    let user = state.users.create(&req.email, &req.password).await?;

    let (ip, user_agent) = client_identity(&headers);
    let session = state.sessions.create(user.uuid, &user_agent, &ip).await;

    let mut response = (
        StatusCode::CREATED,
        Json(AuthResponse { user: user.into() }),
    )
        .into_response();
    set_session_cookie(&mut response, &session.token, SESSION_MAX_AGE_SECS);
    Ok(response)
}

/// POST /v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Response> {
    let (ip, user_agent) = client_identity(&headers);
    let identifier = ratelimit::identifier(&ip, &user_agent);

    if let Some(remaining) = state.rate_limiter.blocked_for(&identifier).await {
        return Err(ApiError::too_many_attempts(remaining.as_secs()));
    }

    let user = match state.users.verify(&req.email, &req.password).await {
        Ok(user) => user,
        Err(err) => {
            state.rate_limiter.record_failure(&identifier).await;
            let attempts = state.rate_limiter.attempt_count(&identifier).await;
            if attempts > 3 {
                tracing::warn!(email = %req.email, ip = %ip, attempts, "Repeated failed logins");
            }
            return Err(err.into());
        }
    };

    state.rate_limiter.reset(&identifier).await;
    let session = state.sessions.create(user.uuid, &user_agent, &ip).await;

    let mut response = Json(AuthResponse { user: user.into() }).into_response();
    set_session_cookie(&mut response, &session.token, SESSION_MAX_AGE_SECS);
    Ok(response)
}

/// Session guard middleware for protected routes.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if state.config.dev_mode {
        req.extensions_mut().insert(AuthUser {
            user: dev_user(),
            token: String::new(),
        });
        return next.run(req).await;
    }

    let Some(token) = session_cookie(req.headers()) else {
        return ApiError::unauthorized("Authentication required").into_response();
    };

    let Some(session) = state.sessions.validate(&token).await else {
        return ApiError::unauthorized("Session expired or invalid").into_response();
    };

    let Some(user) = state.users.get(session.user_uuid).await else {
        // Session outlived its user; drop it.
        state.sessions.delete(&token).await;
        return ApiError::unauthorized("Session expired or invalid").into_response();
    };

    req.extensions_mut().insert(AuthUser { user, token });
    next.run(req).await
}

/// Stand-in identity when the guard is disabled.
fn dev_user() -> User {
    let now = chrono::Utc::now();
    User {
        uuid: uuid::Uuid::nil(),
        email: "dev@localhost".to_string(),
        password_hash: String::new(),
        salt: String::new(),
        created_at: now,
        updated_at: now,
    }
}

/// GET /v1/auth/me
async fn me(Extension(auth): Extension<AuthUser>) -> Json<UserResponse> {
    Json(auth.user.into())
}

/// POST /v1/auth/logout
async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Response {
    if !auth.token.is_empty() {
        state.sessions.delete(&auth.token).await;
    }

    let mut response = Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    })
    .into_response();
    set_session_cookie(&mut response, "", 0);
    response
}

/// POST /v1/auth/logout-all
async fn logout_all(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Response {
    state.sessions.delete_for_user(auth.user.uuid).await;

    let mut response = Json(MessageResponse {
        message: "Logged out from all devices".to_string(),
    })
    .into_response();
    set_session_cookie(&mut response, "", 0);
    response
}

/// GET /v1/auth/sessions
async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Json<Vec<SessionResponse>> {
    let sessions = state.sessions.list_for_user(auth.user.uuid).await;
    Json(sessions.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing_handles_multiple_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_token=abc123; lang=en"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(session_cookie(&headers), None);
    }

    #[test]
    fn client_identity_prefers_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));

        let (ip, ua) = client_identity(&headers);
        assert_eq!(ip, "203.0.113.7");
        assert_eq!(ua, "Mozilla/5.0");

        let (ip, ua) = client_identity(&HeaderMap::new());
        assert_eq!(ip, "local");
        assert_eq!(ua, "");
    }
}
