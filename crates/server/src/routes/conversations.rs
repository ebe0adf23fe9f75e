use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use intake_core::{Conversation, FieldMap};
use serde::Deserialize;

use super::{client_key, reject};
use crate::error::{new_correlation_id, HttpError};
use crate::services::intake::{ConversationView, NewConversation, TurnInput, TurnResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    pub account_id: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    #[serde(default = "default_sender")]
    pub sender_type: String,
    #[serde(default)]
    pub sender_contact_id: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndAndSendBody {
    #[serde(default)]
    pub summary: Option<String>,
}

fn default_sender() -> String {
    "contact".to_string()
}

pub async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateConversationBody>,
) -> Result<(StatusCode, Json<Conversation>), HttpError> {
    let correlation_id = new_correlation_id();
    let conversation = state
        .intake
        .create_conversation(
            NewConversation {
                account_id: body.account_id,
                contact_id: body.contact_id,
                channel: body.channel.unwrap_or_default(),
                subject: body.subject,
            },
            &client_key(&headers),
        )
        .await
        .map_err(reject(&correlation_id))?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, HttpError> {
    let correlation_id = new_correlation_id();
    state.intake.get_conversation(&id).await.map(Json).map_err(reject(&correlation_id))
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<MessageBody>,
) -> Result<Json<TurnResult>, HttpError> {
    let correlation_id = new_correlation_id();
    state
        .intake
        .post_message(
            &id,
            TurnInput {
                sender_type: body.sender_type,
                sender_contact_id: body.sender_contact_id,
                body: body.body,
                fields: body.fields,
            },
            &client_key(&headers),
        )
        .await
        .map(Json)
        .map_err(reject(&correlation_id))
}

pub async fn end_and_send(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<EndAndSendBody>,
) -> Result<Json<TurnResult>, HttpError> {
    let correlation_id = new_correlation_id();
    state
        .intake
        .end_and_send(&id, body.summary, &client_key(&headers))
        .await
        .map(Json)
        .map_err(reject(&correlation_id))
}
