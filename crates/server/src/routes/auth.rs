use axum::{extract::State, Json};
use serde::Deserialize;

use super::reject;
use crate::error::{new_correlation_id, HttpError};
use crate::services::auth::{IssuedSession, OtpRequested};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OtpRequestBody {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct OtpVerifyBody {
    pub challenge_id: String,
    pub code: String,
}

pub async fn request_otp(
    State(state): State<AppState>,
    Json(body): Json<OtpRequestBody>,
) -> Result<Json<OtpRequested>, HttpError> {
    let correlation_id = new_correlation_id();
    state.auth.request_otp(&body.email).await.map(Json).map_err(reject(&correlation_id))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(body): Json<OtpVerifyBody>,
) -> Result<Json<IssuedSession>, HttpError> {
    let correlation_id = new_correlation_id();
    state
        .auth
        .verify_otp(body.challenge_id.trim(), body.code.trim())
        .await
        .map(Json)
        .map_err(reject(&correlation_id))
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};

    use super::*;
    use crate::services::fixtures::TestHarness;

    #[tokio::test]
    async fn dev_mode_code_logs_the_contact_in() {
        let mut harness = TestHarness::new().await;
        harness.config.security.dev_mode = true;
        let state = harness.app_state(harness.integrations());

        let Json(requested) = request_otp(
            State(state.clone()),
            Json(OtpRequestBody { email: format!("  {} ", harness.contact.email) }),
        )
        .await
        .expect("request");
        let code = requested.dev_code.expect("dev code");

        let Json(issued) = verify_otp(
            State(state.clone()),
            Json(OtpVerifyBody { challenge_id: requested.challenge_id, code }),
        )
        .await
        .expect("verify");
        assert_eq!(issued.contact_id, harness.contact.id);

        let session = state.auth.resolve_session(&issued.token).await.expect("session");
        assert_eq!(session.account_id, harness.account.id);
    }

    #[tokio::test]
    async fn wrong_code_is_unauthorized() {
        let harness = TestHarness::new().await;
        let state = harness.app_state(harness.integrations());

        let Json(requested) = request_otp(
            State(state.clone()),
            Json(OtpRequestBody { email: harness.contact.email.clone() }),
        )
        .await
        .expect("request");
        assert!(requested.dev_code.is_none());

        let error = verify_otp(
            State(state),
            Json(OtpVerifyBody { challenge_id: requested.challenge_id, code: "not-it".to_string() }),
        )
        .await
        .expect_err("mismatch");
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
    }
}
