use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use intake_core::crypto::{generate_otp_code, generate_session_token, sha256_hex};
use intake_core::domain::account::normalize_email;
use intake_core::rate_limit::{RateLimiter, BUCKET_OTP_REQUEST, BUCKET_OTP_VERIFY};
use intake_core::{ApplicationError, DomainError, OtpChallenge, OtpHasher, Session};
use intake_db::repositories::{AccountRepository, AuthRepository};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{admit, persistence};

/// Delivers a passcode to the person behind an email address.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApplicationError>;
}

/// Default sender when no mail transport is wired. Never logs the code.
pub struct LoggingOtpSender;

#[async_trait]
impl OtpSender for LoggingOtpSender {
    async fn send(
        &self,
        email: &str,
        _code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        info!(
            event_name = "auth.otp.issued",
            email = %mask_email(email),
            expires_at = %expires_at.to_rfc3339(),
            "passcode issued; no delivery transport configured"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct OtpRequested {
    pub challenge_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_code: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub account_id: String,
    pub contact_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub otp_ttl_secs: u64,
    pub otp_max_attempts: u32,
    pub session_ttl_secs: u64,
    pub dev_mode: bool,
}

/// Email passcode login and bearer session resolution.
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    auth: Arc<dyn AuthRepository>,
    hasher: OtpHasher,
    sender: Arc<dyn OtpSender>,
    limiter: Arc<dyn RateLimiter>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        auth: Arc<dyn AuthRepository>,
        hasher: OtpHasher,
        sender: Arc<dyn OtpSender>,
        limiter: Arc<dyn RateLimiter>,
        settings: AuthSettings,
    ) -> Self {
        Self { accounts, auth, hasher, sender, limiter, settings }
    }

    /// Always answers with a challenge, whether or not the address belongs to
    /// a contact. Only known contacts are sent a code.
    pub async fn request_otp(&self, email: &str) -> Result<OtpRequested, ApplicationError> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::invalid("email", "must be an email address").into());
        }
        admit(self.limiter.as_ref(), BUCKET_OTP_REQUEST, &email)?;

        let contact = self.accounts.find_contact_by_email(&email).await.map_err(persistence)?;
        let now = Utc::now();
        let challenge_id = Uuid::new_v4().to_string();
        let code = generate_otp_code();
        let code_hash = self
            .hasher
            .hash(&challenge_id, &code)
            .map_err(|error| ApplicationError::Configuration(format!("otp hashing failed: {error}")))?;
        let expires_at = now + seconds(self.settings.otp_ttl_secs);

        self.auth
            .create_challenge(OtpChallenge {
                id: challenge_id.clone(),
                email: email.clone(),
                contact_id: contact.as_ref().map(|contact| contact.id.clone()),
                code_hash,
                attempts: 0,
                max_attempts: self.settings.otp_max_attempts.max(1),
                expires_at,
                consumed_at: None,
                created_at: now,
            })
            .await
            .map_err(persistence)?;

        if contact.is_some() {
            self.sender.send(&email, &code, expires_at).await?;
        } else {
            info!(
                event_name = "auth.otp.unknown_email",
                challenge_id = %challenge_id,
                "passcode requested for an address with no contact"
            );
        }

        Ok(OtpRequested {
            challenge_id,
            expires_at,
            dev_code: self.settings.dev_mode.then_some(code),
        })
    }

    pub async fn verify_otp(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<IssuedSession, ApplicationError> {
        admit(self.limiter.as_ref(), BUCKET_OTP_VERIFY, challenge_id)?;

        let challenge = self
            .auth
            .find_challenge(challenge_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("otp challenge", challenge_id))?;

        let now = Utc::now();
        // The attempt is counted before the code is checked.
        let counted = self.auth.register_attempt(challenge_id, now).await.map_err(persistence)?;
        if !counted {
            warn!(event_name = "auth.otp.rejected", challenge_id, reason = "unusable", "passcode rejected");
            return Err(ApplicationError::Unauthorized(
                "passcode expired, already used or out of attempts".to_string(),
            ));
        }

        let matches = self.hasher.verify(challenge_id, code, &challenge.code_hash);
        let Some(contact_id) = challenge.contact_id.filter(|_| matches) else {
            warn!(event_name = "auth.otp.rejected", challenge_id, reason = "mismatch", "passcode rejected");
            return Err(ApplicationError::Unauthorized("invalid passcode".to_string()));
        };

        if !self.auth.consume_challenge(challenge_id, now).await.map_err(persistence)? {
            return Err(ApplicationError::Unauthorized("passcode already used".to_string()));
        }

        let contact = self
            .accounts
            .find_contact(&contact_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::Unauthorized("contact no longer exists".to_string()))?;

        let token = generate_session_token();
        let expires_at = now + seconds(self.settings.session_ttl_secs);
        self.auth
            .create_session(Session {
                token_hash: sha256_hex(token.as_bytes()),
                account_id: contact.account_id.clone(),
                contact_id: contact.id.clone(),
                expires_at,
                created_at: now,
            })
            .await
            .map_err(persistence)?;
        info!(
            event_name = "auth.session.created",
            account_id = %contact.account_id,
            contact_id = %contact.id,
            "client session issued"
        );

        Ok(IssuedSession {
            token,
            account_id: contact.account_id,
            contact_id: contact.id,
            expires_at,
        })
    }

    pub async fn resolve_session(&self, token: &str) -> Result<Session, ApplicationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ApplicationError::Unauthorized("missing session token".to_string()));
        }

        let session = self
            .auth
            .find_session(&sha256_hex(token.as_bytes()))
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::Unauthorized("unknown session".to_string()))?;
        if session.expires_at <= Utc::now() {
            return Err(ApplicationError::Unauthorized("session expired".to_string()));
        }
        Ok(session)
    }

    pub async fn purge_expired(&self) -> Result<u64, ApplicationError> {
        self.auth.purge_expired(Utc::now()).await.map_err(persistence)
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use intake_core::ApplicationError;

    use super::mask_email;
    use crate::services::fixtures::{RecordingOtpSender, TestHarness};

    #[test]
    fn masks_the_local_part() {
        assert_eq!(mask_email("ada@acme.test"), "a***@acme.test");
        assert_eq!(mask_email("nonsense"), "***");
    }

    #[tokio::test]
    async fn known_contact_logs_in_with_the_sent_code() {
        let harness = TestHarness::new().await;
        let sender = RecordingOtpSender::new();
        let service = harness.auth_service(sender.clone(), false);

        let requested = service.request_otp(&harness.contact.email.to_uppercase()).await.expect("request");
        assert!(requested.dev_code.is_none());

        let code = sender.last_code().await.expect("code was sent");
        let issued = service.verify_otp(&requested.challenge_id, &code).await.expect("verify");
        assert_eq!(issued.account_id, harness.account.id);
        assert_eq!(issued.contact_id, harness.contact.id);

        let session = service.resolve_session(&issued.token).await.expect("session");
        assert_eq!(session.contact_id, harness.contact.id);
        assert_ne!(session.token_hash, issued.token);

        let reused = service.verify_otp(&requested.challenge_id, &code).await.expect_err("single use");
        assert!(matches!(reused, ApplicationError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unknown_email_still_gets_a_challenge() {
        let harness = TestHarness::new().await;
        let sender = RecordingOtpSender::new();
        let service = harness.auth_service(sender.clone(), true);

        let requested = service.request_otp("nobody@example.test").await.expect("request");
        let dev_code = requested.dev_code.expect("dev mode echoes the code");
        assert!(sender.last_code().await.is_none());

        let error = service.verify_otp(&requested.challenge_id, &dev_code).await.expect_err("no contact");
        assert!(matches!(error, ApplicationError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn attempts_are_capped() {
        let harness = TestHarness::new().await;
        let sender = RecordingOtpSender::new();
        let service = harness.auth_service(sender.clone(), false);
        let requested = service.request_otp(&harness.contact.email).await.expect("request");
        let code = sender.last_code().await.expect("code");

        for _ in 0..5 {
            let error = service.verify_otp(&requested.challenge_id, "000000x").await.expect_err("wrong");
            assert!(matches!(error, ApplicationError::Unauthorized(_)));
        }

        let error = service.verify_otp(&requested.challenge_id, &code).await.expect_err("exhausted");
        assert!(matches!(error, ApplicationError::Unauthorized(message) if message.contains("attempts")));
    }

    #[tokio::test]
    async fn unknown_challenge_and_bad_tokens_are_rejected() {
        let harness = TestHarness::new().await;
        let service = harness.auth_service(RecordingOtpSender::new(), false);

        let missing = service.verify_otp("missing", "123456").await.expect_err("missing");
        assert!(matches!(missing, ApplicationError::NotFound { .. }));

        let invalid = service.resolve_session("not-a-token").await.expect_err("unknown");
        assert!(matches!(invalid, ApplicationError::Unauthorized(_)));

        let malformed = service.request_otp("not-an-email").await.expect_err("bad email");
        assert!(matches!(malformed, ApplicationError::Domain(_)));
    }
}
