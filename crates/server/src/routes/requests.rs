use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use intake_core::{AttachmentInput, ClientRequest, Project, RequestUpdate};
use serde::Deserialize;

use super::{reject, require_session};
use crate::error::{new_correlation_id, HttpError};
use crate::services::requests::{NewClientRequest, RequestCreated};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub project_id: String,
    pub request_type: String,
    pub description: String,
    pub impact: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Deserialize)]
pub struct RequestUpdateBody {
    pub body: String,
}

pub async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Project>>, HttpError> {
    let correlation_id = new_correlation_id();
    let session = require_session(&state, &headers, &correlation_id).await?;
    state.requests.list_projects(&session).await.map(Json).map_err(reject(&correlation_id))
}

pub async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ClientRequest>>, HttpError> {
    let correlation_id = new_correlation_id();
    let session = require_session(&state, &headers, &correlation_id).await?;
    state.requests.list_requests(&session).await.map(Json).map_err(reject(&correlation_id))
}

pub async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestCreated>), HttpError> {
    let correlation_id = new_correlation_id();
    let session = require_session(&state, &headers, &correlation_id).await?;
    let created = state
        .requests
        .create_request(
            &session,
            NewClientRequest {
                project_id: body.project_id,
                request_type: body.request_type,
                description: body.description,
                impact: body.impact,
                urgency: body.urgency,
                attachments: body.attachments,
            },
        )
        .await
        .map_err(reject(&correlation_id))?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn post_request_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RequestUpdateBody>,
) -> Result<(StatusCode, Json<RequestUpdate>), HttpError> {
    let correlation_id = new_correlation_id();
    let session = require_session(&state, &headers, &correlation_id).await?;
    let update = state
        .requests
        .post_request_update(&session, &id, &body.body)
        .await
        .map_err(reject(&correlation_id))?;

    Ok((StatusCode::CREATED, Json(update)))
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        Json,
    };

    use super::*;
    use crate::routes::tests::bearer;
    use crate::services::fixtures::{RecordingOtpSender, TestHarness};
    use crate::state::AppState;

    async fn signed_in(harness: &TestHarness) -> (AppState, HeaderMap) {
        let sender = RecordingOtpSender::new();
        let mut integrations = harness.integrations();
        integrations.otp_sender = std::sync::Arc::new(sender.clone());
        let state = harness.app_state(integrations);

        let requested = state.auth.request_otp(&harness.contact.email).await.expect("otp");
        let code = sender.last_code().await.expect("code");
        let issued = state.auth.verify_otp(&requested.challenge_id, &code).await.expect("verify");
        (state, bearer(&issued.token))
    }

    fn body(project_id: &str) -> Json<CreateRequestBody> {
        Json(CreateRequestBody {
            project_id: project_id.to_string(),
            request_type: "change".to_string(),
            description: "Swap the hero image".to_string(),
            impact: "low".to_string(),
            urgency: String::new(),
            attachments: Vec::new(),
        })
    }

    #[tokio::test]
    async fn signed_in_contact_files_and_lists_requests() {
        let harness = TestHarness::new().await;
        let (state, headers) = signed_in(&harness).await;

        let Json(projects) =
            list_projects(State(state.clone()), headers.clone()).await.expect("projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, harness.project.id);

        let (status, Json(created)) =
            create_request(State(state.clone()), headers.clone(), body(&harness.project.id))
                .await
                .expect("create");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.estimate.template_key, "change_small");

        let (status, Json(update)) = post_request_update(
            State(state.clone()),
            Path(created.request.id.clone()),
            headers.clone(),
            Json(RequestUpdateBody { body: "Any news?".to_string() }),
        )
        .await
        .expect("update");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(update.request_id, created.request.id);

        let Json(listed) = list_requests(State(state), headers).await.expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn anonymous_callers_are_rejected() {
        let harness = TestHarness::new().await;
        let state = harness.app_state(harness.integrations());

        let error = create_request(State(state), HeaderMap::new(), body(&harness.project.id))
            .await
            .expect_err("no session");
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
    }
}
