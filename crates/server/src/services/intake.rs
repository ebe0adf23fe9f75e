use std::sync::Arc;

use chrono::Utc;
use intake_core::audit::EVENT_INTAKE_SUBMITTED;
use intake_core::domain::conversation::{attachments_from_fields, mode_from_fields};
use intake_core::domain::fields::text_field;
use intake_core::flows::ProspectIntakeFlow;
use intake_core::rate_limit::{RateLimiter, BUCKET_CONVERSATION_CREATE, BUCKET_CONVERSATION_MESSAGE};
use intake_core::{
    ApplicationError, AuditEntry, Conversation, CryptoError, DomainError, FieldMap,
    FieldNormalizer, FieldValue, FlowEngine, IntakeBrief, IntakeState, Message, SenderRole,
};
use intake_db::repositories::{
    AccountRepository, ConversationRepository, Finalization, TurnWrite,
};
use serde::Serialize;
use tracing::{debug, info};

use super::notify::{DispatchOutcome, NotificationDispatcher};
use super::{admit, persistence};

/// Attempts per turn when a concurrent writer bumps the revision first.
const TURN_WRITE_ATTEMPTS: usize = 3;

pub struct NewConversation {
    pub account_id: String,
    pub contact_id: Option<String>,
    pub channel: String,
    pub subject: Option<String>,
}

pub struct TurnInput {
    pub sender_type: String,
    pub sender_contact_id: Option<String>,
    pub body: String,
    pub fields: FieldMap,
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnResult {
    pub conversation: Conversation,
    pub from: IntakeState,
    pub to: IntakeState,
    pub submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<DispatchOutcome>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Conversation lifecycle: turns, forced completion and submission.
pub struct IntakeService {
    accounts: Arc<dyn AccountRepository>,
    conversations: Arc<dyn ConversationRepository>,
    normalizer: Arc<FieldNormalizer>,
    engine: FlowEngine<ProspectIntakeFlow>,
    dispatcher: Arc<NotificationDispatcher>,
    limiter: Arc<dyn RateLimiter>,
}

impl IntakeService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        conversations: Arc<dyn ConversationRepository>,
        normalizer: Arc<FieldNormalizer>,
        dispatcher: Arc<NotificationDispatcher>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            accounts,
            conversations,
            normalizer,
            engine: FlowEngine::default(),
            dispatcher,
            limiter,
        }
    }

    pub async fn create_conversation(
        &self,
        input: NewConversation,
        client_key: &str,
    ) -> Result<Conversation, ApplicationError> {
        admit(self.limiter.as_ref(), BUCKET_CONVERSATION_CREATE, client_key)?;

        if self.accounts.find_account(&input.account_id).await.map_err(persistence)?.is_none() {
            return Err(ApplicationError::not_found("account", input.account_id));
        }
        if let Some(contact_id) = input.contact_id.as_deref() {
            let contact = self.accounts.find_contact(contact_id).await.map_err(persistence)?;
            if contact.map_or(true, |contact| contact.account_id != input.account_id) {
                return Err(ApplicationError::not_found("contact", contact_id));
            }
        }

        let channel = input.channel.trim();
        let channel = if channel.is_empty() { "web" } else { channel };
        let mut conversation =
            Conversation::new(input.account_id, input.contact_id, channel, input.subject);
        conversation.state = self.engine.initial_state();

        self.conversations.create(self.sealed(&conversation)?).await.map_err(persistence)?;
        info!(
            event_name = "conversation.created",
            conversation_id = %conversation.id,
            account_id = %conversation.account_id,
            "conversation created"
        );
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<ConversationView, ApplicationError> {
        let conversation = self.load(id).await?;
        let messages = self
            .conversations
            .list_messages(id)
            .await
            .map_err(persistence)?
            .into_iter()
            .map(|mut message| {
                message.fields = self.normalizer.reveal(&message.fields);
                message
            })
            .collect();
        Ok(ConversationView { conversation, messages })
    }

    /// Applies one turn. Validation runs on the merged candidate before
    /// anything is written, so a rejected turn leaves no trace.
    ///
    /// The write is guarded by the conversation revision. When another turn
    /// lands first the turn is re-read and re-applied, unless it is a contact
    /// answer and the conversation has already moved to another step.
    pub async fn post_message(
        &self,
        id: &str,
        input: TurnInput,
        client_ip: &str,
    ) -> Result<TurnResult, ApplicationError> {
        admit(self.limiter.as_ref(), BUCKET_CONVERSATION_MESSAGE, client_ip)?;

        let role = SenderRole::parse(&input.sender_type).ok_or_else(|| {
            DomainError::invalid("sender_type", format!("unknown sender `{}`", input.sender_type))
        })?;

        let mut observed = None;
        for _ in 0..TURN_WRITE_ATTEMPTS {
            let (mut conversation, stored) = self.load_for_write(id).await?;
            let answered = *observed.get_or_insert(conversation.state);
            if role == SenderRole::Contact && conversation.state != answered {
                return Err(ApplicationError::Conflict(format!(
                    "conversation {id} moved from {} to {} before this answer was stored",
                    answered.as_str(),
                    conversation.state.as_str()
                )));
            }

            let candidate = self.normalizer.merge(&conversation.fields, &input.fields);
            let outcome = self
                .engine
                .apply(conversation.state, role, &candidate)
                .map_err(DomainError::from)?;

            let now = Utc::now();
            conversation.fields = candidate;
            conversation.state = outcome.to;
            conversation.mode = mode_from_fields(&conversation.fields, conversation.mode);
            if let Some(summary) = text_field(&conversation.fields, "summary") {
                conversation.summary = Some(summary.to_string());
            }
            if outcome.reached_terminal && conversation.ended_at.is_none() {
                conversation.ended_at = Some(now);
            }
            conversation.updated_at = now;

            let message = Message::new(
                id,
                role,
                input.sender_contact_id.clone(),
                input.body.clone(),
                input.fields.clone(),
            );
            let finalization = outcome.reached_terminal.then(|| {
                self.finalization(&conversation, outcome.from, client_ip, role.as_str())
            });
            let write = self
                .persist_turn(&conversation, &stored, &input.fields, message, finalization)
                .await?;
            let TurnWrite::Applied { brief } = write else {
                debug!(
                    event_name = "conversation.turn_stale",
                    conversation_id = %id,
                    revision = conversation.revision,
                    "conversation changed underneath the turn, re-reading"
                );
                continue;
            };

            conversation.revision += 1;
            info!(
                event_name = "conversation.turn_applied",
                conversation_id = %id,
                sender_type = role.as_str(),
                from = outcome.from.as_str(),
                to = outcome.to.as_str(),
                "conversation turn applied"
            );

            let mut notification = None;
            if outcome.reached_terminal {
                log_finalized(id, brief.as_ref());
                notification = Some(self.dispatcher.dispatch(id).await?);
            }

            return Ok(TurnResult {
                conversation,
                from: outcome.from,
                to: outcome.to,
                submitted: outcome.reached_terminal,
                notification,
            });
        }

        Err(contended(id))
    }

    /// Forces SUBMIT regardless of what the current step still needs, then
    /// dispatches. Only the call that moves the conversation into SUBMIT
    /// writes the brief and the audit row.
    pub async fn end_and_send(
        &self,
        id: &str,
        summary: Option<String>,
        client_ip: &str,
    ) -> Result<TurnResult, ApplicationError> {
        let mut incoming = FieldMap::new();
        let summary =
            summary.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        if let Some(summary) = summary {
            incoming.insert("summary".to_string(), FieldValue::Text(summary));
        }

        for _ in 0..TURN_WRITE_ATTEMPTS {
            let (mut conversation, stored) = self.load_for_write(id).await?;
            let prior = conversation.state;

            let now = Utc::now();
            conversation.fields = self.normalizer.merge(&conversation.fields, &incoming);
            conversation.state = IntakeState::Submit;
            if let Some(summary) = text_field(&conversation.fields, "summary") {
                conversation.summary = Some(summary.to_string());
            }
            conversation.ended_at.get_or_insert(now);
            conversation.updated_at = now;

            let message =
                Message::new(id, SenderRole::System, None, "Conversation ended", incoming.clone());
            let finalization = (!prior.is_terminal()).then(|| {
                self.finalization(&conversation, prior, client_ip, SenderRole::System.as_str())
            });
            let write =
                self.persist_turn(&conversation, &stored, &incoming, message, finalization).await?;
            let TurnWrite::Applied { brief } = write else {
                debug!(
                    event_name = "conversation.turn_stale",
                    conversation_id = %id,
                    revision = conversation.revision,
                    "conversation changed underneath end-and-send, re-reading"
                );
                continue;
            };

            conversation.revision += 1;
            info!(
                event_name = "conversation.ended",
                conversation_id = %id,
                from = prior.as_str(),
                "conversation forced to submit"
            );
            if !prior.is_terminal() {
                log_finalized(id, brief.as_ref());
            }
            let notification = self.dispatcher.dispatch(id).await?;

            return Ok(TurnResult {
                conversation,
                from: prior,
                to: IntakeState::Submit,
                submitted: !prior.is_terminal(),
                notification: Some(notification),
            });
        }

        Err(contended(id))
    }

    pub async fn retry_notification(&self, id: &str) -> Result<DispatchOutcome, ApplicationError> {
        let conversation = self.load(id).await?;
        if !conversation.is_terminal() {
            return Err(ApplicationError::Conflict(format!(
                "conversation {id} has not been submitted"
            )));
        }
        self.dispatcher.dispatch(id).await
    }

    async fn load(&self, id: &str) -> Result<Conversation, ApplicationError> {
        self.load_for_write(id).await.map(|(conversation, _)| conversation)
    }

    /// Returns the conversation with revealed fields alongside the sealed
    /// fields as stored.
    async fn load_for_write(&self, id: &str) -> Result<(Conversation, FieldMap), ApplicationError> {
        let mut conversation = self
            .conversations
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("conversation", id))?;
        let stored = std::mem::take(&mut conversation.fields);
        conversation.fields = self.normalizer.reveal(&stored);
        Ok((conversation, stored))
    }

    fn sealed(&self, conversation: &Conversation) -> Result<Conversation, ApplicationError> {
        let mut stored = conversation.clone();
        stored.fields = self.normalizer.seal(&conversation.fields).map_err(encryption_failed)?;
        Ok(stored)
    }

    async fn persist_turn(
        &self,
        conversation: &Conversation,
        stored: &FieldMap,
        incoming: &FieldMap,
        mut message: Message,
        finalization: Option<Finalization>,
    ) -> Result<TurnWrite, ApplicationError> {
        message.fields = self.normalizer.seal(&message.fields).map_err(encryption_failed)?;
        let mut row = conversation.clone();
        row.fields = self
            .normalizer
            .seal_over(stored, &conversation.fields, incoming)
            .map_err(encryption_failed)?;
        self.conversations.record_turn(&row, message, finalization).await.map_err(persistence)
    }

    fn finalization(
        &self,
        conversation: &Conversation,
        prior: IntakeState,
        client_ip: &str,
        actor: &str,
    ) -> Finalization {
        let brief = IntakeBrief::derive(&conversation.id, &conversation.fields);
        let attachments = attachments_from_fields(&conversation.fields);
        let audit = AuditEntry::new(EVENT_INTAKE_SUBMITTED, actor)
            .for_conversation(&conversation.id)
            .with_metadata("client_ip", client_ip)
            .with_metadata("prior_state", prior.as_str())
            .with_metadata("attachment_count", attachments.len().to_string());
        Finalization { brief, attachments, audit }
    }
}

fn log_finalized(conversation_id: &str, brief: Option<&IntakeBrief>) {
    if let Some(brief) = brief {
        info!(
            event_name = "conversation.finalized",
            conversation_id = %conversation_id,
            brief_id = %brief.id,
            "intake brief stored"
        );
    }
}

fn encryption_failed(error: CryptoError) -> ApplicationError {
    ApplicationError::Configuration(format!("field encryption failed: {error}"))
}

fn contended(id: &str) -> ApplicationError {
    ApplicationError::Conflict(format!("conversation {id} is being updated concurrently, retry"))
}
