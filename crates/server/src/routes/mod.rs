//! JSON API.
//!
//! Public intake:
//! - `POST /api/conversations`                        - open a conversation
//! - `GET  /api/conversations/{id}`                   - conversation with decrypted fields and turns
//! - `POST /api/conversations/{id}/message`           - apply one turn
//! - `POST /api/conversations/{id}/end-and-send`      - force submit and notify
//! - `POST /api/uploads/presign`                      - presigned upload URL
//!
//! Client portal (bearer session):
//! - `POST /api/auth/otp/request`, `POST /api/auth/otp/verify`
//! - `GET  /api/client/projects`
//! - `GET|POST /api/client/requests`, `POST /api/client/requests/{id}/updates`
//!
//! Admin (static bearer token):
//! - `GET  /api/admin/conversations/{id}`, `POST /api/admin/conversations/{id}/notify`
//! - `GET  /api/admin/estimates`, `POST /api/admin/estimates/{id}/approve`
//! - `POST /api/admin/invoices/{id}/send`

mod admin;
mod auth;
mod conversations;
mod requests;
mod uploads;

use axum::{
    http::{header, HeaderMap},
    routing::{get, post},
    Router,
};
use intake_core::crypto::sha256_hex;
use intake_core::{ApplicationError, Session};

use crate::error::HttpError;
use crate::state::AppState;

pub const ADMIN_ACTOR: &str = "admin";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/conversations", post(conversations::create_conversation))
        .route("/api/conversations/{id}", get(conversations::get_conversation))
        .route("/api/conversations/{id}/message", post(conversations::post_message))
        .route("/api/conversations/{id}/end-and-send", post(conversations::end_and_send))
        .route("/api/uploads/presign", post(uploads::presign_upload))
        .route("/api/auth/otp/request", post(auth::request_otp))
        .route("/api/auth/otp/verify", post(auth::verify_otp))
        .route("/api/client/projects", get(requests::list_projects))
        .route("/api/client/requests", get(requests::list_requests).post(requests::create_request))
        .route("/api/client/requests/{id}/updates", post(requests::post_request_update))
        .route("/api/admin/conversations/{id}", get(admin::get_conversation))
        .route("/api/admin/conversations/{id}/notify", post(admin::retry_notification))
        .route("/api/admin/estimates", get(admin::list_estimates))
        .route("/api/admin/estimates/{id}/approve", post(admin::approve_estimate))
        .route("/api/admin/invoices/{id}/send", post(admin::send_invoice))
        .with_state(state)
}

/// Maps service failures onto the response taxonomy under one correlation id.
pub(crate) fn reject(correlation_id: &str) -> impl Fn(ApplicationError) -> HttpError + '_ {
    move |error| HttpError::new(error, correlation_id)
}

/// Rate-limit key for anonymous callers: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then `unknown`.
pub(crate) fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    forwarded.or_else(real_ip).unwrap_or("unknown").to_string()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim()).filter(|token| !token.is_empty())
}

pub(crate) async fn require_session(
    state: &AppState,
    headers: &HeaderMap,
    correlation_id: &str,
) -> Result<Session, HttpError> {
    let token = bearer_token(headers).ok_or_else(|| {
        HttpError::new(
            ApplicationError::Unauthorized("missing bearer token".to_string()),
            correlation_id,
        )
    })?;
    state.auth.resolve_session(token).await.map_err(reject(correlation_id))
}

pub(crate) fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    correlation_id: &str,
) -> Result<(), HttpError> {
    let Some(expected) = state.admin_token_digest() else {
        return Err(HttpError::new(
            ApplicationError::Configuration("server.admin_token is not configured".to_string()),
            correlation_id,
        ));
    };

    let presented = bearer_token(headers).map(|token| sha256_hex(token.as_bytes()));
    if presented.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(HttpError::new(
            ApplicationError::Unauthorized("admin token required".to_string()),
            correlation_id,
        ))
    }
}
