use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Bug,
    Change,
    New,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Change => "change",
            Self::New => "new",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bug" => Ok(Self::Bug),
            "change" => Ok(Self::Change),
            "new" | "feature" => Ok(Self::New),
            other => Err(DomainError::invalid(
                "request_type",
                format!("`{other}` is not one of bug|change|new"),
            )),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(DomainError::invalid(
                "impact",
                format!("`{other}` is not one of low|medium|high|critical"),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub id: String,
    pub account_id: String,
    pub project_id: String,
    pub contact_id: Option<String>,
    pub request_type: RequestType,
    pub description: String,
    pub impact: Impact,
    pub urgency: String,
    pub addon_flag: bool,
    pub addon_rationale: Option<String>,
    /// Messaging thread root, set once the request is announced.
    pub slack_thread_ts: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUpdate {
    pub id: String,
    pub request_id: String,
    pub author_contact_id: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl RequestUpdate {
    pub fn new(
        request_id: impl Into<String>,
        author_contact_id: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            author_contact_id,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    Draft,
    Approved,
}

impl EstimateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub id: String,
    pub request_id: String,
    pub template_key: String,
    pub title: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: EstimateStatus,
    pub invoice_claim_id: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Estimate {
    /// Approval is one-way; an approved estimate never returns to draft.
    pub fn can_transition_to(&self, next: EstimateStatus) -> bool {
        matches!(
            (self.status, next),
            (EstimateStatus::Draft, EstimateStatus::Approved)
                | (EstimateStatus::Approved, EstimateStatus::Approved)
        )
    }

    pub fn approve(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.can_transition_to(EstimateStatus::Approved) {
            return Err(DomainError::InvariantViolation(format!(
                "estimate {} cannot be approved from {}",
                self.id,
                self.status.as_str()
            )));
        }
        if self.status == EstimateStatus::Draft {
            self.status = EstimateStatus::Approved;
            self.approved_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub estimate_id: String,
    pub provider: String,
    pub provider_invoice_id: String,
    pub provider_invoice_url: Option<String>,
    pub provider_customer_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub send_claim_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some() || self.status == InvoiceStatus::Sent
    }
}
