use axum::{extract::State, Json};
use intake_core::{PresignedUpload, UploadRequest};
use serde::Deserialize;

use super::reject;
use crate::error::{new_correlation_id, HttpError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PresignBody {
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

pub async fn presign_upload(
    State(state): State<AppState>,
    Json(body): Json<PresignBody>,
) -> Result<Json<PresignedUpload>, HttpError> {
    let correlation_id = new_correlation_id();
    let request = UploadRequest {
        file_name: body.file_name,
        content_type: body.content_type,
        content_length: body.content_length,
    };
    state
        .uploads
        .presign(request, body.conversation_id.as_deref())
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
    async fn unconfigured_storage_is_a_server_error() {
        let harness = TestHarness::new().await;
        let state = harness.app_state(harness.integrations());

        let error = presign_upload(
            State(state),
            Json(PresignBody {
                file_name: "brief.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                content_length: Some(100),
                conversation_id: None,
            }),
        )
        .await
        .expect_err("no bucket");
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn configured_storage_signs_for_a_known_conversation() {
        let mut harness = TestHarness::new().await;
        harness.config.storage.bucket = Some("intake-uploads".to_string());
        harness.config.storage.access_key_id = Some("AKIDEXAMPLE".to_string());
        harness.config.storage.secret_access_key =
            Some(secrecy::SecretString::from("secret".to_string()));
        let state = harness.app_state(harness.integrations());
        let conversation = harness
            .conversation_at(intake_core::IntakeState::Needs, intake_core::FieldMap::new())
            .await;

        let Json(upload) = presign_upload(
            State(state),
            Json(PresignBody {
                file_name: "brief.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                content_length: None,
                conversation_id: Some(conversation),
            }),
        )
        .await
        .expect("presign");
        assert_eq!(upload.method, "PUT");
        assert!(upload.file_url.contains("brief.pdf"));
    }
}
