use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::fields::{FieldMap, FieldValue, ATTACHMENTS_KEY};
use crate::flows::{ConversationMode, IntakeState, SenderRole};

/// A multi-turn intake conversation. `fields` holds plaintext in memory;
/// sensitive keys are sealed before they reach storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub account_id: String,
    pub contact_id: Option<String>,
    pub channel: String,
    pub subject: Option<String>,
    pub state: IntakeState,
    pub mode: ConversationMode,
    pub fields: FieldMap,
    pub summary: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub slack_post_id: Option<String>,
    pub slack_posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by every stored turn; writers compare it before updating.
    #[serde(default)]
    pub revision: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    InFlight,
    Delivered,
}

impl Conversation {
    pub fn new(
        account_id: impl Into<String>,
        contact_id: Option<String>,
        channel: impl Into<String>,
        subject: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            contact_id,
            channel: channel.into(),
            subject,
            state: IntakeState::Welcome,
            mode: ConversationMode::Prospect,
            fields: FieldMap::new(),
            summary: None,
            ended_at: None,
            slack_post_id: None,
            slack_posted_at: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn notification_status(&self) -> NotificationStatus {
        match (&self.slack_post_id, &self.slack_posted_at) {
            (_, Some(_)) => NotificationStatus::Delivered,
            (Some(_), None) => NotificationStatus::InFlight,
            (None, None) => NotificationStatus::Pending,
        }
    }
}

/// Mode follows `fields.mode` when it names a known mode.
pub fn mode_from_fields(fields: &FieldMap, current: ConversationMode) -> ConversationMode {
    fields
        .get("mode")
        .and_then(FieldValue::as_text)
        .and_then(ConversationMode::parse)
        .unwrap_or(current)
}

/// One immutable conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_type: SenderRole,
    pub sender_contact_id: Option<String>,
    pub body: String,
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: impl Into<String>,
        sender_type: SenderRole,
        sender_contact_id: Option<String>,
        body: impl Into<String>,
        fields: FieldMap,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender_type,
            sender_contact_id,
            body: body.into(),
            fields,
            created_at: Utc::now(),
        }
    }
}

/// Where an attachment hangs. A row belongs to a conversation (and its brief)
/// or to a client request, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "owner", rename_all = "snake_case")]
pub enum AttachmentOwner {
    Conversation { conversation_id: String, brief_id: Option<String> },
    Request { request_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInput {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub url: String,
    pub key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub owner: AttachmentOwner,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub url: String,
    pub key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(owner: AttachmentOwner, input: AttachmentInput) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            file_name: input.file_name,
            content_type: input.content_type,
            size: input.size,
            url: input.url,
            key: input.key,
            created_at: Utc::now(),
        }
    }
}

/// Extracts uploaded-file descriptors from the accumulated `attachments` list.
/// Entries without a URL are ignored.
pub fn attachments_from_fields(fields: &FieldMap) -> Vec<AttachmentInput> {
    let Some(FieldValue::List(items)) = fields.get(ATTACHMENTS_KEY) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            FieldValue::Map(entry) => attachment_from_entry(entry),
            _ => None,
        })
        .collect()
}

fn attachment_from_entry(
    entry: &std::collections::BTreeMap<String, FieldValue>,
) -> Option<AttachmentInput> {
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(FieldValue::as_text)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let url = text("url")?;
    let file_name = text("file_name").unwrap_or_else(|| {
        url.rsplit('/').next().filter(|name| !name.is_empty()).unwrap_or("attachment").to_string()
    });
    let size = match entry.get("size") {
        Some(FieldValue::Number(number)) => number.as_i64(),
        Some(FieldValue::Text(value)) => value.trim().parse().ok(),
        _ => None,
    };

    Some(AttachmentInput { file_name, content_type: text("content_type"), size, url, key: text("key") })
}
