use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EVENT_INTAKE_SUBMITTED: &str = "intake.submitted";
pub const EVENT_REQUEST_CREATED: &str = "request.created";
pub const EVENT_ESTIMATE_APPROVED: &str = "estimate.approved";
pub const EVENT_INVOICE_SENT: &str = "invoice.sent";

/// One append-only row of the audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub event_type: String,
    pub conversation_id: Option<String>,
    pub request_id: Option<String>,
    pub actor: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event_type: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            conversation_id: None,
            request_id: None,
            actor: actor.into(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn for_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn for_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_owned())
    }
}
