use std::sync::Arc;

use chrono::Utc;
use intake_core::crypto::generate_claim_token;
use intake_core::domain::conversation::attachments_from_fields;
use intake_core::{ApplicationError, FieldNormalizer};
use intake_db::repositories::ConversationRepository;
use intake_slack::intake::intake_submitted_message;
use intake_slack::WebhookClient;
use serde::Serialize;
use tracing::{error, info, warn};

use super::persistence;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered { attempts: u32 },
    /// Another caller holds the claim or already delivered.
    AlreadyClaimed,
    /// No webhook configured; claim fields are left untouched.
    Skipped,
}

/// Sends the one-time intake announcement for a conversation.
///
/// Mutual exclusion comes from a conditional update on the conversation row,
/// so concurrent callers in any number of processes race on the claim and
/// exactly one of them posts.
pub struct NotificationDispatcher {
    conversations: Arc<dyn ConversationRepository>,
    normalizer: Arc<FieldNormalizer>,
    webhook: Option<Arc<WebhookClient>>,
    admin_base_url: String,
}

impl NotificationDispatcher {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        normalizer: Arc<FieldNormalizer>,
        webhook: Option<Arc<WebhookClient>>,
        admin_base_url: impl Into<String>,
    ) -> Self {
        Self { conversations, normalizer, webhook, admin_base_url: admin_base_url.into() }
    }

    pub async fn dispatch(&self, conversation_id: &str) -> Result<DispatchOutcome, ApplicationError> {
        let Some(webhook) = self.webhook.as_ref() else {
            warn!(
                event_name = "notification.skipped",
                conversation_id,
                "slack webhook is not configured; skipping intake notification"
            );
            return Ok(DispatchOutcome::Skipped);
        };

        let token = generate_claim_token();
        let claimed = self
            .conversations
            .claim_notification(conversation_id, &token)
            .await
            .map_err(persistence)?;
        if !claimed {
            info!(
                event_name = "notification.already_claimed",
                conversation_id,
                "intake notification already claimed or delivered"
            );
            return Ok(DispatchOutcome::AlreadyClaimed);
        }
        info!(event_name = "notification.claimed", conversation_id, "intake notification claimed");

        match self.deliver(webhook, conversation_id).await {
            Ok(attempts) => {
                let committed = self
                    .conversations
                    .commit_notification(conversation_id, &token, Utc::now())
                    .await
                    .map_err(persistence)?;
                if !committed {
                    // Delivery happened; only the bookkeeping was lost.
                    error!(
                        event_name = "notification.commit_lost",
                        conversation_id,
                        "delivered notification could not be marked as posted"
                    );
                }
                info!(
                    event_name = "notification.delivered",
                    conversation_id,
                    attempts,
                    "intake notification delivered"
                );
                Ok(DispatchOutcome::Delivered { attempts })
            }
            Err(failure) => {
                let released = self
                    .conversations
                    .release_notification(conversation_id, &token)
                    .await
                    .map_err(persistence)?;
                warn!(
                    event_name = "notification.released",
                    conversation_id,
                    released,
                    error = %failure,
                    "intake notification failed; claim released for retry"
                );
                Err(failure)
            }
        }
    }

    async fn deliver(
        &self,
        webhook: &WebhookClient,
        conversation_id: &str,
    ) -> Result<u32, ApplicationError> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("conversation", conversation_id))?;

        let fields = self.normalizer.reveal(&conversation.fields);
        let attachments = attachments_from_fields(&fields);
        let message =
            intake_submitted_message(conversation_id, &fields, &attachments, &self.admin_base_url);

        webhook
            .deliver(&message)
            .await
            .map_err(|error| ApplicationError::Upstream(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use intake_core::ApplicationError;
    use intake_db::repositories::ConversationRepository;

    use super::{DispatchOutcome, NotificationDispatcher};
    use crate::services::fixtures::{
        dispatcher_with, failing, seeded_conversation, ScriptedWebhook, TestHarness,
    };

    #[tokio::test]
    async fn concurrent_dispatches_deliver_exactly_once() {
        let harness = TestHarness::new().await;
        let conversation_id = seeded_conversation(&harness).await;
        let webhook = ScriptedWebhook::acknowledging();
        let dispatcher = Arc::new(dispatcher_with(&harness, webhook.clone()));

        let (first, second) = tokio::join!(
            dispatcher.dispatch(&conversation_id),
            dispatcher.dispatch(&conversation_id)
        );
        let outcomes = [first.expect("first"), second.expect("second")];

        assert_eq!(
            outcomes.iter().filter(|outcome| matches!(outcome, DispatchOutcome::Delivered { .. })).count(),
            1
        );
        assert!(outcomes.contains(&DispatchOutcome::AlreadyClaimed));
        assert_eq!(webhook.calls().await, 1);

        let stored = harness.conversations.find_by_id(&conversation_id).await.expect("find").expect("row");
        assert!(stored.slack_posted_at.is_some());
        assert!(stored.slack_post_id.is_some());
    }

    #[tokio::test]
    async fn failed_delivery_releases_the_claim_for_a_retry() {
        let harness = TestHarness::new().await;
        let conversation_id = seeded_conversation(&harness).await;

        let broken = dispatcher_with(&harness, ScriptedWebhook::with(vec![failing(), failing(), failing()]));
        let error = broken.dispatch(&conversation_id).await.expect_err("delivery should fail");
        assert!(matches!(error, ApplicationError::Upstream(_)));

        let stored = harness.conversations.find_by_id(&conversation_id).await.expect("find").expect("row");
        assert!(stored.slack_post_id.is_none());
        assert!(stored.slack_posted_at.is_none());

        let healthy = dispatcher_with(&harness, ScriptedWebhook::acknowledging());
        let outcome = healthy.dispatch(&conversation_id).await.expect("retry should deliver");
        assert_eq!(outcome, DispatchOutcome::Delivered { attempts: 1 });

        let again = healthy.dispatch(&conversation_id).await.expect("no-op");
        assert_eq!(again, DispatchOutcome::AlreadyClaimed);
    }

    #[tokio::test]
    async fn missing_webhook_skips_without_claiming() {
        let harness = TestHarness::new().await;
        let conversation_id = seeded_conversation(&harness).await;

        let outcome = harness.dispatcher(None).dispatch(&conversation_id).await.expect("skip");
        assert_eq!(outcome, DispatchOutcome::Skipped);

        let stored = harness.conversations.find_by_id(&conversation_id).await.expect("find").expect("row");
        assert!(stored.slack_post_id.is_none());
    }
}
