use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::config::AppConfig;
use intake_core::{
    Account, AddonClassifier, ApplicationError, Contact, Conversation, Estimate, FieldCipher,
    FieldMap, FieldNormalizer, IntakeState, OtpHasher, Project, RateLimiter, Session,
    SlidingWindowRateLimiter,
};
use intake_db::repositories::{
    AccountRepository, ConversationRepository, SqlAccountRepository, SqlAuditRepository,
    SqlAuthRepository, SqlConversationRepository, SqlEstimateRepository, SqlRequestRepository,
};
use intake_db::{connect_with_settings, migrations, DbPool};
use intake_slack::api::ApiError;
use intake_slack::webhook::{TransportError, WebhookResponse};
use intake_slack::{MessageTemplate, RetryPolicy, SlackApi, WebhookClient, WebhookTransport};
use secrecy::SecretString;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::auth::AuthSettings;
use super::{AuthService, IntakeService, NotificationDispatcher, OtpSender, RequestService};
use crate::billing::{BillingError, BillingProvider, ProviderInvoice};
use crate::state::{AppState, Integrations};

pub(crate) const ADMIN_TOKEN: &str = "admin-test-token";
pub(crate) const THREAD_ROOT_TS: &str = "1700000000.000100";

pub(crate) fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.security.field_encryption_key = SecretString::from("test-field-key".to_string());
    config.security.otp_pepper = SecretString::from("test-pepper".to_string());
    config.server.admin_token = Some(SecretString::from(ADMIN_TOKEN.to_string()));
    config.slack.request_channel = Some("#client-requests".to_string());
    config
}

/// Migrated single-connection memory database with one seeded account.
pub(crate) struct TestHarness {
    pub pool: DbPool,
    pub config: AppConfig,
    pub accounts: Arc<SqlAccountRepository>,
    pub conversations: Arc<SqlConversationRepository>,
    pub requests: Arc<SqlRequestRepository>,
    pub estimates: Arc<SqlEstimateRepository>,
    pub auth: Arc<SqlAuthRepository>,
    pub audit: Arc<SqlAuditRepository>,
    pub normalizer: Arc<FieldNormalizer>,
    pub limiter: Arc<dyn RateLimiter>,
    pub account: Account,
    pub project: Project,
    pub contact: Contact,
}

impl TestHarness {
    pub async fn new() -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");

        let config = test_config();
        let cipher =
            FieldCipher::from_secret(&config.security.field_encryption_key).expect("cipher");
        let normalizer =
            Arc::new(FieldNormalizer::new(cipher, config.security.sensitive_fields.iter().cloned()));
        let limiter: Arc<dyn RateLimiter> =
            Arc::new(SlidingWindowRateLimiter::from_config(&config.rate_limit));

        let accounts = Arc::new(SqlAccountRepository::new(pool.clone()));
        let suffix = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let account = Account {
            id: format!("acct-{suffix}"),
            name: "Acme Studio".to_string(),
            billing_email: Some("billing@acme.test".to_string()),
            billing_customer_id: None,
            created_at: now,
        };
        let project = Project {
            id: format!("proj-{suffix}"),
            account_id: account.id.clone(),
            name: "Storefront".to_string(),
            known_integrations: vec!["Stripe".to_string()],
            same_day_sla: false,
            created_at: now,
        };
        let contact = Contact {
            id: format!("contact-{suffix}"),
            account_id: account.id.clone(),
            full_name: "Ada Lovelace".to_string(),
            email: format!("ada+{suffix}@acme.test"),
            created_at: now,
        };
        accounts.save_account(account.clone()).await.expect("save account");
        accounts.save_project(project.clone()).await.expect("save project");
        accounts.save_contact(contact.clone()).await.expect("save contact");

        Self {
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            requests: Arc::new(SqlRequestRepository::new(pool.clone())),
            estimates: Arc::new(SqlEstimateRepository::new(pool.clone())),
            auth: Arc::new(SqlAuthRepository::new(pool.clone())),
            audit: Arc::new(SqlAuditRepository::new(pool.clone())),
            accounts,
            pool,
            config,
            normalizer,
            limiter,
            account,
            project,
            contact,
        }
    }

    pub fn dispatcher(&self, webhook: Option<Arc<WebhookClient>>) -> NotificationDispatcher {
        NotificationDispatcher::new(
            self.conversations.clone(),
            self.normalizer.clone(),
            webhook,
            self.config.server.admin_base_url.clone(),
        )
    }

    pub fn intake_service(&self, webhook: Option<ScriptedWebhook>) -> IntakeService {
        let dispatcher = self.dispatcher(webhook.map(|webhook| Arc::new(webhook.client())));
        IntakeService::new(
            self.accounts.clone(),
            self.conversations.clone(),
            self.normalizer.clone(),
            Arc::new(dispatcher),
            self.limiter.clone(),
        )
    }

    pub fn request_service(
        &self,
        slack: Option<RecordingSlackApi>,
        billing: Option<FakeBilling>,
    ) -> RequestService {
        RequestService::new(
            self.accounts.clone(),
            self.requests.clone(),
            self.estimates.clone(),
            AddonClassifier::new(&self.config.pipeline.urgent_values),
            self.config.billing.currency.clone(),
            self.limiter.clone(),
        )
        .with_slack(
            slack.map(|slack| Arc::new(slack) as Arc<dyn SlackApi>),
            self.config.slack.request_channel.clone(),
        )
        .with_billing(billing.map(|billing| Arc::new(billing) as Arc<dyn BillingProvider>))
    }

    pub fn auth_service(&self, sender: RecordingOtpSender, dev_mode: bool) -> AuthService {
        AuthService::new(
            self.accounts.clone(),
            self.auth.clone(),
            OtpHasher::new(self.config.security.otp_pepper.clone()).expect("hasher"),
            Arc::new(sender),
            self.limiter.clone(),
            AuthSettings {
                otp_ttl_secs: self.config.security.otp_ttl_secs,
                otp_max_attempts: self.config.security.otp_max_attempts,
                session_ttl_secs: self.config.security.session_ttl_secs,
                dev_mode,
            },
        )
    }

    /// Full application state over this harness' database.
    pub fn app_state(&self, integrations: Integrations) -> AppState {
        AppState::build(self.config.clone(), self.pool.clone(), integrations).expect("app state")
    }

    pub fn integrations(&self) -> Integrations {
        Integrations {
            webhook: Some(Arc::new(ScriptedWebhook::acknowledging().client())),
            slack_api: None,
            billing: Some(Arc::new(FakeBilling::new())),
            otp_sender: Arc::new(RecordingOtpSender::new()),
            rate_limiter: Arc::new(SlidingWindowRateLimiter::from_config(&self.config.rate_limit)),
        }
    }

    /// A client session for the seeded contact. Not persisted.
    pub fn session(&self) -> Session {
        let now = Utc::now();
        Session {
            token_hash: "unused".to_string(),
            account_id: self.account.id.clone(),
            contact_id: self.contact.id.clone(),
            expires_at: now + chrono::Duration::hours(1),
            created_at: now,
        }
    }

    /// Stores a conversation already sitting at `state` with `fields`.
    pub async fn conversation_at(&self, state: IntakeState, fields: FieldMap) -> String {
        let mut conversation = Conversation::new(&self.account.id, None, "web", None);
        conversation.state = state;
        conversation.fields = self.normalizer.seal(&fields).expect("seal");
        let id = conversation.id.clone();
        self.conversations.create(conversation).await.expect("create conversation");
        id
    }
}

pub(crate) async fn seeded_conversation(harness: &TestHarness) -> String {
    let fields: FieldMap = [
        ("full_name", "Ada Lovelace"),
        ("email", "ada@acme.test"),
        ("business_name", "Acme"),
        ("needs_summary", "Rebuild the checkout"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), intake_core::FieldValue::text(value)))
    .collect();
    harness.conversation_at(IntakeState::Submit, fields).await
}

pub(crate) fn dispatcher_with(harness: &TestHarness, webhook: ScriptedWebhook) -> NotificationDispatcher {
    harness.dispatcher(Some(Arc::new(webhook.client())))
}

pub(crate) fn failing() -> Result<WebhookResponse, TransportError> {
    Err(TransportError::Request("connection reset".to_string()))
}

#[derive(Default)]
struct ScriptState {
    responses: VecDeque<Result<WebhookResponse, TransportError>>,
    acknowledge_when_empty: bool,
    calls: usize,
}

/// Webhook transport replaying a fixed script of responses.
#[derive(Clone, Default)]
pub(crate) struct ScriptedWebhook {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedWebhook {
    pub fn acknowledging() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                acknowledge_when_empty: true,
                ..ScriptState::default()
            })),
        }
    }

    pub fn with(responses: Vec<Result<WebhookResponse, TransportError>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                responses: responses.into(),
                ..ScriptState::default()
            })),
        }
    }

    pub async fn calls(&self) -> usize {
        self.state.lock().await.calls
    }

    pub fn client(&self) -> WebhookClient {
        WebhookClient::new(
            Arc::new(self.clone()),
            SecretString::from("https://hooks.slack.test/services/T/B/X".to_string()),
            RetryPolicy { max_attempts: 3, base_delay_ms: 0, max_delay_ms: 0 },
        )
    }
}

#[async_trait]
impl WebhookTransport for ScriptedWebhook {
    async fn post(
        &self,
        _url: &str,
        _payload: &serde_json::Value,
    ) -> Result<WebhookResponse, TransportError> {
        let mut state = self.state.lock().await;
        state.calls += 1;
        match state.responses.pop_front() {
            Some(response) => response,
            None if state.acknowledge_when_empty => {
                Ok(WebhookResponse { status: 200, body: "ok".to_string() })
            }
            None => Err(TransportError::Request("script exhausted".to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PostedMessage {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub message: MessageTemplate,
}

/// Slack Web API fake. Thread roots get [`THREAD_ROOT_TS`].
#[derive(Clone, Default)]
pub(crate) struct RecordingSlackApi {
    posts: Arc<Mutex<Vec<PostedMessage>>>,
}

impl RecordingSlackApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn posts(&self) -> Vec<PostedMessage> {
        self.posts.lock().await.clone()
    }
}

#[async_trait]
impl SlackApi for RecordingSlackApi {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<String, ApiError> {
        let mut posts = self.posts.lock().await;
        posts.push(PostedMessage {
            channel: channel.to_string(),
            thread_ts: thread_ts.map(str::to_string),
            message: message.clone(),
        });
        Ok(match thread_ts {
            None => THREAD_ROOT_TS.to_string(),
            Some(_) => format!("1700000000.{:06}", 100 + posts.len()),
        })
    }
}

#[derive(Default)]
struct BillingLedger {
    customers: usize,
    invoices: usize,
    sent: usize,
    fail_next_invoice: bool,
}

/// In-memory billing provider counting every upstream call.
#[derive(Clone, Default)]
pub(crate) struct FakeBilling {
    ledger: Arc<Mutex<BillingLedger>>,
}

impl FakeBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first_invoice() -> Self {
        Self {
            ledger: Arc::new(Mutex::new(BillingLedger {
                fail_next_invoice: true,
                ..BillingLedger::default()
            })),
        }
    }

    pub async fn customers_created(&self) -> usize {
        self.ledger.lock().await.customers
    }

    pub async fn invoices_created(&self) -> usize {
        self.ledger.lock().await.invoices
    }

    pub async fn invoices_sent(&self) -> usize {
        self.ledger.lock().await.sent
    }
}

#[async_trait]
impl BillingProvider for FakeBilling {
    fn provider_name(&self) -> &'static str {
        "fake"
    }

    async fn create_customer(
        &self,
        _account: &Account,
        _idempotency_key: &str,
    ) -> Result<String, BillingError> {
        let mut ledger = self.ledger.lock().await;
        ledger.customers += 1;
        Ok(format!("cus_{}", ledger.customers))
    }

    async fn create_invoice(
        &self,
        _customer_id: &str,
        _estimate: &Estimate,
        _idempotency_key: &str,
    ) -> Result<ProviderInvoice, BillingError> {
        let mut ledger = self.ledger.lock().await;
        if ledger.fail_next_invoice {
            ledger.fail_next_invoice = false;
            return Err(BillingError::Status { status: 500, message: "upstream down".to_string() });
        }
        ledger.invoices += 1;
        Ok(ProviderInvoice {
            id: format!("in_{}", ledger.invoices),
            hosted_url: Some(format!("https://billing.test/in_{}", ledger.invoices)),
            status: Some("draft".to_string()),
        })
    }

    async fn send_invoice(&self, invoice_id: &str) -> Result<ProviderInvoice, BillingError> {
        let mut ledger = self.ledger.lock().await;
        ledger.sent += 1;
        Ok(ProviderInvoice {
            id: invoice_id.to_string(),
            hosted_url: Some(format!("https://billing.test/{invoice_id}")),
            status: Some("open".to_string()),
        })
    }
}

/// Captures issued passcodes instead of mailing them.
#[derive(Clone, Default)]
pub(crate) struct RecordingOtpSender {
    codes: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingOtpSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last_code(&self) -> Option<String> {
        self.codes.lock().await.last().map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl OtpSender for RecordingOtpSender {
    async fn send(
        &self,
        email: &str,
        code: &str,
        _expires_at: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.codes.lock().await.push((email.to_string(), code.to_string()));
        Ok(())
    }
}
