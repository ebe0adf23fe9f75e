use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use intake_core::domain::conversation::{Attachment, AttachmentInput};
use intake_core::pipeline::EstimateTemplate;
use intake_core::{
    Account, AuditEntry, ClientRequest, Contact, Conversation, Estimate, EstimateStatus,
    IntakeBrief, Invoice, Message, OtpChallenge, Project, RequestType, RequestUpdate, Session,
};

pub mod account;
pub mod attachment;
pub mod audit;
pub mod auth;
pub mod conversation;
pub mod estimate;
pub mod request;

#[cfg(test)]
pub(crate) mod fixtures;

pub use account::SqlAccountRepository;
pub use audit::SqlAuditRepository;
pub use auth::SqlAuthRepository;
pub use conversation::SqlConversationRepository;
pub use estimate::SqlEstimateRepository;
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Everything written when an intake reaches SUBMIT. Applied in one
/// transaction.
#[derive(Clone, Debug)]
pub struct Finalization {
    pub brief: IntakeBrief,
    pub attachments: Vec<AttachmentInput>,
    pub audit: AuditEntry,
}

/// Result of a guarded turn write.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnWrite {
    /// The turn was stored. Carries the brief when the turn finalized.
    Applied { brief: Option<IntakeBrief> },
    /// Another writer moved the row first; nothing was stored.
    Stale,
}

/// A client request with its draft estimate, attachments and audit row.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub request: ClientRequest,
    pub estimate: Estimate,
    pub attachments: Vec<AttachmentInput>,
    pub audit: AuditEntry,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn save_account(&self, account: Account) -> Result<(), RepositoryError>;
    async fn find_account(&self, id: &str) -> Result<Option<Account>, RepositoryError>;
    async fn save_project(&self, project: Project) -> Result<(), RepositoryError>;
    async fn find_project(&self, id: &str) -> Result<Option<Project>, RepositoryError>;
    async fn list_projects(&self, account_id: &str) -> Result<Vec<Project>, RepositoryError>;
    async fn save_contact(&self, contact: Contact) -> Result<(), RepositoryError>;
    async fn find_contact(&self, id: &str) -> Result<Option<Contact>, RepositoryError>;
    async fn find_contact_by_email(&self, email: &str)
        -> Result<Option<Contact>, RepositoryError>;

    /// Stores the billing customer only when none is recorded yet. Returns
    /// `false` when another writer got there first.
    async fn set_billing_customer_if_absent(
        &self,
        account_id: &str,
        customer_id: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Conversation>, RepositoryError>;

    /// Writes one turn as a compare-and-swap on `revision`: the row only
    /// moves when its stored revision still equals `conversation.revision`.
    /// The message and, for the turn that submits, the finalization commit in
    /// the same transaction. `ended_at` is only ever set once.
    async fn record_turn(
        &self,
        conversation: &Conversation,
        message: Message,
        finalization: Option<Finalization>,
    ) -> Result<TurnWrite, RepositoryError>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, RepositoryError>;

    async fn find_brief(&self, conversation_id: &str)
        -> Result<Option<IntakeBrief>, RepositoryError>;
    async fn list_attachments(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Attachment>, RepositoryError>;

    async fn claim_notification(
        &self,
        conversation_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError>;
    async fn commit_notification(
        &self,
        conversation_id: &str,
        token: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn release_notification(
        &self,
        conversation_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_template(
        &self,
        request_type: RequestType,
    ) -> Result<Option<EstimateTemplate>, RepositoryError>;
    async fn create(&self, new_request: NewRequest) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ClientRequest>, RepositoryError>;
    async fn list_for_account(&self, account_id: &str)
        -> Result<Vec<ClientRequest>, RepositoryError>;
    async fn set_thread_ts(&self, request_id: &str, thread_ts: &str)
        -> Result<(), RepositoryError>;
    async fn add_update(&self, update: RequestUpdate) -> Result<(), RepositoryError>;
    async fn list_updates(&self, request_id: &str) -> Result<Vec<RequestUpdate>, RepositoryError>;
    async fn list_attachments(&self, request_id: &str) -> Result<Vec<Attachment>, RepositoryError>;
}

#[async_trait]
pub trait EstimateRepository: Send + Sync {
    async fn find_estimate(&self, id: &str) -> Result<Option<Estimate>, RepositoryError>;
    async fn find_estimate_for_request(
        &self,
        request_id: &str,
    ) -> Result<Option<Estimate>, RepositoryError>;
    async fn list_estimates(
        &self,
        status: Option<EstimateStatus>,
    ) -> Result<Vec<Estimate>, RepositoryError>;

    /// Claims the right to create the invoice for an estimate. Fails when
    /// another claim is held or an invoice already exists.
    async fn claim_invoice_creation(
        &self,
        estimate_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError>;
    async fn release_invoice_claim(
        &self,
        estimate_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError>;

    /// Approves the estimate and stores the provider invoice under the held
    /// claim. Returns `false` when the claim is no longer held.
    async fn record_invoice(
        &self,
        token: &str,
        invoice: Invoice,
        approved_at: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError>;

    async fn find_invoice(&self, id: &str) -> Result<Option<Invoice>, RepositoryError>;
    async fn find_invoice_for_estimate(
        &self,
        estimate_id: &str,
    ) -> Result<Option<Invoice>, RepositoryError>;

    async fn claim_invoice_send(
        &self,
        invoice_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError>;
    async fn mark_invoice_sent(
        &self,
        invoice_id: &str,
        token: &str,
        sent_at: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError>;
    async fn release_invoice_send(
        &self,
        invoice_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AuthRepository: Send + Sync {
    async fn create_challenge(&self, challenge: OtpChallenge) -> Result<(), RepositoryError>;
    async fn find_challenge(&self, id: &str) -> Result<Option<OtpChallenge>, RepositoryError>;

    /// Counts one verification attempt if the challenge is still usable.
    async fn register_attempt(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn consume_challenge(&self, id: &str, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;

    async fn create_session(&self, session: Session) -> Result<(), RepositoryError>;
    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>, RepositoryError>;

    /// Drops expired sessions and challenges. Returns the number of rows removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError>;
    async fn list_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<AuditEntry>, RepositoryError>;
    async fn list_for_request(&self, request_id: &str) -> Result<Vec<AuditEntry>, RepositoryError>;
}

/// Fixed-width UTC timestamps so stored values compare as text.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(encode_timestamp)
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}
