//! Authentication endpoints and the middleware guarding `/filesystem`.

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Json;
use protocol::messages::{
    LoginRequest, MessageResponse, RefreshRequest, TokenResponse, ValidateRequest,
    ValidateResponse,
};
use protocol::{Credential, StorageError, TOKEN_COOKIE};
use tracing::debug;

use super::error::{run_blocking, ApiJson, ApiResult};
use super::AppState;
use crate::service::RequestContext;

/// Extracts the credential from `Authorization: Bearer` or the `token`
/// cookie, in that order.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn session_cookie(token: &str, max_age: u64) -> String {
    format!("{TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}")
}

fn token_response(state: &AppState, credential: Credential) -> Response {
    let claims = credential.claims();
    let body = TokenResponse {
        expires_at: claims.expires_at,
        root_dir: claims.tenant_root.clone(),
        token: credential.token().to_string(),
    };
    let cookie = session_cookie(credential.token(), state.tokens.ttl().as_secs());
    (AppendHeaders([(SET_COOKIE, cookie)]), Json(body)).into_response()
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<Response> {
    let tokens = state.tokens.clone();
    let credential = run_blocking(move || tokens.login(&request.name, &request.password)).await?;
    Ok(token_response(&state, credential))
}

/// Refreshes the credential sent in the body, the header or the cookie.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| StorageError::bad_request(format!("invalid refresh body: {e}")))?
            .token
    };
    let token = from_body
        .or_else(|| credential_from_headers(&headers))
        .ok_or_else(StorageError::wrong_credentials)?;

    let credential = state.tokens.refresh(&token)?;
    Ok(token_response(&state, credential))
}

pub async fn validate(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ValidateRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    let identity = state.tokens.validate(&request.token)?;
    Ok(Json(ValidateResponse {
        name: identity.identity,
        root_dir: identity.tenant_root,
    }))
}

/// Drops the caller's session and clears the cookie.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(identity) = credential_from_headers(&headers)
        .and_then(|token| state.tokens.validate(&token).ok())
    {
        let sessions = state.sessions.clone();
        run_blocking(move || Ok(sessions.remove(&identity.session_id))).await?;
    } else {
        debug!("Logout without a valid credential");
    }

    let body = MessageResponse {
        message: "logged out successfully".to_string(),
    };
    Ok((AppendHeaders([(SET_COOKIE, session_cookie("", 0))]), Json(body)).into_response())
}

/// Validates the credential and attaches the caller's [`RequestContext`].
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token =
        credential_from_headers(request.headers()).ok_or_else(StorageError::wrong_credentials)?;
    let identity = state.tokens.validate(&token)?;

    let sessions = state.sessions.clone();
    let session = run_blocking(move || sessions.open(&identity)).await?;
    session.touch();

    request.extensions_mut().insert(RequestContext::new(session));
    Ok(next.run(request).await)
}
