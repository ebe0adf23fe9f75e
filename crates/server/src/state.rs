use std::sync::Arc;

use intake_core::config::AppConfig;
use intake_core::crypto::sha256_hex;
use intake_core::{
    AddonClassifier, CryptoError, FieldCipher, FieldNormalizer, OtpHasher, RateLimiter,
    SlidingWindowRateLimiter, UploadSigner,
};
use intake_db::repositories::{
    AccountRepository, AuthRepository, ConversationRepository, EstimateRepository,
    RequestRepository, SqlAccountRepository, SqlAuthRepository, SqlConversationRepository,
    SqlEstimateRepository, SqlRequestRepository,
};
use intake_db::DbPool;
use intake_slack::webhook::TransportError;
use intake_slack::{ApiError, HttpSlackApi, SlackApi, WebhookClient};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::billing::{BillingError, BillingProvider, StripeBilling};
use crate::services::auth::AuthSettings;
use crate::services::{
    AuthService, IntakeService, LoggingOtpSender, NotificationDispatcher, OtpSender,
    RequestService, UploadService,
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("security settings are unusable: {0}")]
    Crypto(#[from] CryptoError),
    #[error("slack webhook client could not be built: {0}")]
    Webhook(#[from] TransportError),
    #[error("slack api client could not be built: {0}")]
    SlackApi(#[from] ApiError),
    #[error("billing client could not be built: {0}")]
    Billing(#[from] BillingError),
}

/// Outbound collaborators. Built from config in production and swapped for
/// fakes in tests.
pub struct Integrations {
    pub webhook: Option<Arc<WebhookClient>>,
    pub slack_api: Option<Arc<dyn SlackApi>>,
    pub billing: Option<Arc<dyn BillingProvider>>,
    pub otp_sender: Arc<dyn OtpSender>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl Integrations {
    pub fn from_config(config: &AppConfig) -> Result<Self, StateError> {
        let webhook = WebhookClient::from_config(&config.slack)?.map(Arc::new);
        let slack_api = HttpSlackApi::from_config(&config.slack)?
            .map(|api| Arc::new(api) as Arc<dyn SlackApi>);
        let billing = StripeBilling::from_config(&config.billing)?
            .map(|billing| Arc::new(billing) as Arc<dyn BillingProvider>);

        Ok(Self {
            webhook,
            slack_api,
            billing,
            otp_sender: Arc::new(LoggingOtpSender),
            rate_limiter: Arc::new(SlidingWindowRateLimiter::from_config(&config.rate_limit)),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: DbPool,
    pub intake: Arc<IntakeService>,
    pub requests: Arc<RequestService>,
    pub auth: Arc<AuthService>,
    pub uploads: Arc<UploadService>,
    admin_token_digest: Option<String>,
}

impl AppState {
    pub fn build(
        config: AppConfig,
        db_pool: DbPool,
        integrations: Integrations,
    ) -> Result<Self, StateError> {
        let cipher = FieldCipher::from_secret(&config.security.field_encryption_key)?;
        let normalizer =
            Arc::new(FieldNormalizer::new(cipher, config.security.sensitive_fields.iter().cloned()));
        let hasher = OtpHasher::new(config.security.otp_pepper.clone())?;

        let accounts: Arc<dyn AccountRepository> =
            Arc::new(SqlAccountRepository::new(db_pool.clone()));
        let conversations: Arc<dyn ConversationRepository> =
            Arc::new(SqlConversationRepository::new(db_pool.clone()));
        let requests: Arc<dyn RequestRepository> =
            Arc::new(SqlRequestRepository::new(db_pool.clone()));
        let estimates: Arc<dyn EstimateRepository> =
            Arc::new(SqlEstimateRepository::new(db_pool.clone()));
        let auth: Arc<dyn AuthRepository> = Arc::new(SqlAuthRepository::new(db_pool.clone()));

        let dispatcher = Arc::new(NotificationDispatcher::new(
            conversations.clone(),
            normalizer.clone(),
            integrations.webhook,
            config.server.admin_base_url.clone(),
        ));
        let intake = IntakeService::new(
            accounts.clone(),
            conversations.clone(),
            normalizer,
            dispatcher,
            integrations.rate_limiter.clone(),
        );
        let request_service = RequestService::new(
            accounts.clone(),
            requests,
            estimates,
            AddonClassifier::new(&config.pipeline.urgent_values),
            config.billing.currency.clone(),
            integrations.rate_limiter.clone(),
        )
        .with_slack(integrations.slack_api, config.slack.request_channel.clone())
        .with_billing(integrations.billing);
        let auth_service = AuthService::new(
            accounts,
            auth,
            hasher,
            integrations.otp_sender,
            integrations.rate_limiter,
            AuthSettings {
                otp_ttl_secs: config.security.otp_ttl_secs,
                otp_max_attempts: config.security.otp_max_attempts,
                session_ttl_secs: config.security.session_ttl_secs,
                dev_mode: config.security.dev_mode,
            },
        );
        let uploads = UploadService::new(UploadSigner::from_config(&config.storage), conversations);

        let admin_token_digest = config
            .server
            .admin_token
            .as_ref()
            .map(|token| sha256_hex(token.expose_secret().trim().as_bytes()));

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            intake: Arc::new(intake),
            requests: Arc::new(request_service),
            auth: Arc::new(auth_service),
            uploads: Arc::new(uploads),
            admin_token_digest,
        })
    }

    /// `None` when no admin token is configured.
    pub fn admin_token_digest(&self) -> Option<&str> {
        self.admin_token_digest.as_deref()
    }
}
