use std::sync::Arc;

use chrono::Utc;
use intake_core::audit::{EVENT_ESTIMATE_APPROVED, EVENT_INVOICE_SENT, EVENT_REQUEST_CREATED};
use intake_core::crypto::generate_claim_token;
use intake_core::pipeline::draft_estimate;
use intake_core::rate_limit::{RateLimiter, BUCKET_REQUEST_CREATE};
use intake_core::{
    Account, AddonClassifier, ApplicationError, AttachmentInput, AuditEntry, ClientRequest,
    DomainError, Estimate, EstimateStatus, Impact, Invoice, InvoiceStatus, Project, RequestType,
    RequestUpdate, Session,
};
use intake_db::repositories::{AccountRepository, EstimateRepository, NewRequest, RequestRepository};
use intake_slack::intake::{invoice_sent_message, request_thread_message, request_update_message};
use intake_slack::{MessageTemplate, SlackApi};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{admit, persistence};
use crate::billing::{BillingError, BillingProvider};

pub struct NewClientRequest {
    pub project_id: String,
    pub request_type: String,
    pub description: String,
    pub impact: String,
    pub urgency: String,
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestCreated {
    pub request: ClientRequest,
    pub estimate: Estimate,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApprovalOutcome {
    pub invoice: Invoice,
    /// False when an earlier approval already produced this invoice.
    pub created: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SendOutcome {
    pub invoice: Invoice,
    pub already_sent: bool,
}

/// Client requests, their draft estimates and the invoice lifecycle.
pub struct RequestService {
    accounts: Arc<dyn AccountRepository>,
    requests: Arc<dyn RequestRepository>,
    estimates: Arc<dyn EstimateRepository>,
    classifier: AddonClassifier,
    currency: String,
    limiter: Arc<dyn RateLimiter>,
    slack: Option<Arc<dyn SlackApi>>,
    request_channel: Option<String>,
    billing: Option<Arc<dyn BillingProvider>>,
}

impl RequestService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        requests: Arc<dyn RequestRepository>,
        estimates: Arc<dyn EstimateRepository>,
        classifier: AddonClassifier,
        currency: impl Into<String>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            accounts,
            requests,
            estimates,
            classifier,
            currency: currency.into(),
            limiter,
            slack: None,
            request_channel: None,
            billing: None,
        }
    }

    /// Threads are only posted when both the API client and a channel exist.
    pub fn with_slack(mut self, slack: Option<Arc<dyn SlackApi>>, channel: Option<String>) -> Self {
        self.slack = slack;
        self.request_channel = channel;
        self
    }

    pub fn with_billing(mut self, billing: Option<Arc<dyn BillingProvider>>) -> Self {
        self.billing = billing;
        self
    }

    pub async fn list_projects(&self, session: &Session) -> Result<Vec<Project>, ApplicationError> {
        self.accounts.list_projects(&session.account_id).await.map_err(persistence)
    }

    pub async fn list_requests(
        &self,
        session: &Session,
    ) -> Result<Vec<ClientRequest>, ApplicationError> {
        self.requests.list_for_account(&session.account_id).await.map_err(persistence)
    }

    pub async fn create_request(
        &self,
        session: &Session,
        input: NewClientRequest,
    ) -> Result<RequestCreated, ApplicationError> {
        admit(self.limiter.as_ref(), BUCKET_REQUEST_CREATE, &session.account_id)?;

        let request_type = RequestType::parse(&input.request_type)?;
        let impact = Impact::parse(&input.impact)?;
        let description = input.description.trim();
        if description.is_empty() {
            return Err(DomainError::invalid("description", "must not be empty").into());
        }

        let project = self
            .accounts
            .find_project(&input.project_id)
            .await
            .map_err(persistence)?
            .filter(|project| project.account_id == session.account_id)
            .ok_or_else(|| ApplicationError::not_found("project", input.project_id.as_str()))?;

        let urgency = input.urgency.trim().to_ascii_lowercase();
        let assessment = self.classifier.classify(&project, request_type, description, &urgency);
        let request = ClientRequest {
            id: Uuid::new_v4().to_string(),
            account_id: session.account_id.clone(),
            project_id: project.id.clone(),
            contact_id: Some(session.contact_id.clone()),
            request_type,
            description: description.to_string(),
            impact,
            urgency,
            addon_flag: assessment.addon_flag,
            addon_rationale: assessment.rationale,
            slack_thread_ts: None,
            created_at: Utc::now(),
        };

        let template = self.requests.find_template(request_type).await.map_err(persistence)?;
        let estimate = draft_estimate(&request.id, request_type, template, &self.currency);
        let audit = AuditEntry::new(EVENT_REQUEST_CREATED, session.contact_id.as_str())
            .for_request(&request.id)
            .with_metadata("project_id", project.id.as_str())
            .with_metadata("addon_flag", request.addon_flag.to_string())
            .with_metadata("attachment_count", input.attachments.len().to_string());

        self.requests
            .create(NewRequest {
                request: request.clone(),
                estimate: estimate.clone(),
                attachments: input.attachments,
                audit,
            })
            .await
            .map_err(persistence)?;
        info!(
            event_name = "request.created",
            request_id = %request.id,
            account_id = %request.account_id,
            addon_flag = request.addon_flag,
            estimate_cents = estimate.amount_cents,
            "client request created"
        );

        let mut request = request;
        let root = request_thread_message(&request, &project.name, &estimate);
        if let Some(thread_ts) = self.post_to_channel(&request.id, None, &root).await {
            match self.requests.set_thread_ts(&request.id, &thread_ts).await {
                Ok(()) => request.slack_thread_ts = Some(thread_ts),
                Err(failure) => warn!(
                    event_name = "request.thread.store_failed",
                    request_id = %request.id,
                    error = %failure,
                    "request thread reference could not be stored"
                ),
            }
        }

        Ok(RequestCreated { request, estimate })
    }

    pub async fn post_request_update(
        &self,
        session: &Session,
        request_id: &str,
        body: &str,
    ) -> Result<RequestUpdate, ApplicationError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(DomainError::invalid("body", "must not be empty").into());
        }

        let request = self
            .requests
            .find_by_id(request_id)
            .await
            .map_err(persistence)?
            .filter(|request| request.account_id == session.account_id)
            .ok_or_else(|| ApplicationError::not_found("request", request_id))?;

        let update = RequestUpdate::new(&request.id, Some(session.contact_id.clone()), body);
        self.requests.add_update(update.clone()).await.map_err(persistence)?;
        info!(event_name = "request.update_added", request_id, "request update stored");

        if let Some(thread_ts) = request.slack_thread_ts.as_deref() {
            self.post_to_channel(request_id, Some(thread_ts), &request_update_message(body)).await;
        }
        Ok(update)
    }

    pub async fn list_estimates(
        &self,
        status: Option<EstimateStatus>,
    ) -> Result<Vec<Estimate>, ApplicationError> {
        self.estimates.list_estimates(status).await.map_err(persistence)
    }

    /// Creates the external draft invoice at most once per estimate and
    /// flips the estimate to approved.
    pub async fn approve_estimate(
        &self,
        estimate_id: &str,
        actor: &str,
    ) -> Result<ApprovalOutcome, ApplicationError> {
        let estimate = self
            .estimates
            .find_estimate(estimate_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("estimate", estimate_id))?;

        if let Some(invoice) = self.existing_invoice(estimate_id).await? {
            return Ok(ApprovalOutcome { invoice, created: false });
        }
        let billing = self.billing()?;

        let token = generate_claim_token();
        let claimed =
            self.estimates.claim_invoice_creation(estimate_id, &token).await.map_err(persistence)?;
        if !claimed {
            // Lost the race: either the winner already finished or is still working.
            if let Some(invoice) = self.existing_invoice(estimate_id).await? {
                return Ok(ApprovalOutcome { invoice, created: false });
            }
            return Err(ApplicationError::Conflict(format!(
                "invoice creation for estimate {estimate_id} is already in progress"
            )));
        }
        info!(event_name = "invoice.claimed", estimate_id, "invoice creation claimed");

        match self.create_invoice(billing.as_ref(), &estimate, &token, actor).await {
            Ok(invoice) => {
                info!(
                    event_name = "invoice.created",
                    estimate_id,
                    invoice_id = %invoice.id,
                    provider_invoice_id = %invoice.provider_invoice_id,
                    "draft invoice created"
                );
                Ok(ApprovalOutcome { invoice, created: true })
            }
            Err(failure) => {
                let released = self
                    .estimates
                    .release_invoice_claim(estimate_id, &token)
                    .await
                    .map_err(persistence)?;
                warn!(
                    event_name = "invoice.claim_released",
                    estimate_id,
                    released,
                    error = %failure,
                    "invoice creation failed; claim released for retry"
                );
                Err(failure)
            }
        }
    }

    /// Sends the invoice through the provider at most once.
    pub async fn send_invoice(
        &self,
        invoice_id: &str,
        actor: &str,
    ) -> Result<SendOutcome, ApplicationError> {
        let invoice = self.load_invoice(invoice_id).await?;
        if invoice.is_sent() {
            return Ok(SendOutcome { invoice, already_sent: true });
        }
        let billing = self.billing()?;

        let token = generate_claim_token();
        let claimed =
            self.estimates.claim_invoice_send(invoice_id, &token).await.map_err(persistence)?;
        if !claimed {
            let current = self.load_invoice(invoice_id).await?;
            if current.is_sent() {
                return Ok(SendOutcome { invoice: current, already_sent: true });
            }
            return Err(ApplicationError::Conflict(format!(
                "invoice {invoice_id} is already being sent"
            )));
        }

        if let Err(failure) = billing.send_invoice(&invoice.provider_invoice_id).await {
            let released = self
                .estimates
                .release_invoice_send(invoice_id, &token)
                .await
                .map_err(persistence)?;
            warn!(
                event_name = "invoice.send_released",
                invoice_id,
                released,
                error = %failure,
                "invoice send failed; claim released for retry"
            );
            return Err(upstream(failure));
        }

        let audit = AuditEntry::new(EVENT_INVOICE_SENT, actor)
            .with_metadata("invoice_id", invoice_id)
            .with_metadata("provider_invoice_id", invoice.provider_invoice_id.as_str());
        let audit = match self.request_id_for(&invoice).await {
            Some(request_id) => audit.for_request(request_id),
            None => audit,
        };
        let committed = self
            .estimates
            .mark_invoice_sent(invoice_id, &token, Utc::now(), audit)
            .await
            .map_err(persistence)?;
        if !committed {
            error!(
                event_name = "invoice.commit_lost",
                invoice_id,
                "invoice was sent upstream but could not be marked as sent"
            );
        }
        info!(event_name = "invoice.sent", invoice_id, "invoice sent");

        let invoice = self.load_invoice(invoice_id).await?;
        self.announce_sent(&invoice).await;
        Ok(SendOutcome { invoice, already_sent: false })
    }

    async fn create_invoice(
        &self,
        billing: &dyn BillingProvider,
        estimate: &Estimate,
        token: &str,
        actor: &str,
    ) -> Result<Invoice, ApplicationError> {
        let request = self
            .requests
            .find_by_id(&estimate.request_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("request", estimate.request_id.as_str()))?;
        let account = self
            .accounts
            .find_account(&request.account_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("account", request.account_id.as_str()))?;

        let customer_id = self.billing_customer(billing, &account).await?;
        let provider_invoice = billing
            .create_invoice(&customer_id, estimate, &format!("invoice-{}", estimate.id))
            .await
            .map_err(upstream)?;

        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            estimate_id: estimate.id.clone(),
            provider: billing.provider_name().to_string(),
            provider_invoice_id: provider_invoice.id,
            provider_invoice_url: provider_invoice.hosted_url,
            provider_customer_id: customer_id,
            amount_cents: estimate.amount_cents,
            currency: estimate.currency.clone(),
            status: InvoiceStatus::Draft,
            send_claim_id: None,
            sent_at: None,
            created_at: now,
        };
        let audit = AuditEntry::new(EVENT_ESTIMATE_APPROVED, actor)
            .for_request(&request.id)
            .with_metadata("estimate_id", estimate.id.as_str())
            .with_metadata("invoice_id", invoice.id.as_str());

        let recorded = self
            .estimates
            .record_invoice(token, invoice.clone(), now, audit)
            .await
            .map_err(persistence)?;
        if !recorded {
            return Err(ApplicationError::Conflict(format!(
                "invoice claim for estimate {} was lost",
                estimate.id
            )));
        }
        Ok(invoice)
    }

    /// Reuses the account's customer, creating one on first approval. A
    /// concurrent creator that stored first wins.
    async fn billing_customer(
        &self,
        billing: &dyn BillingProvider,
        account: &Account,
    ) -> Result<String, ApplicationError> {
        if let Some(existing) = account.billing_customer_id.as_deref() {
            return Ok(existing.to_string());
        }

        let created = billing
            .create_customer(account, &format!("customer-{}", account.id))
            .await
            .map_err(upstream)?;
        let stored = self
            .accounts
            .set_billing_customer_if_absent(&account.id, &created)
            .await
            .map_err(persistence)?;
        if stored {
            return Ok(created);
        }

        self.accounts
            .find_account(&account.id)
            .await
            .map_err(persistence)?
            .and_then(|account| account.billing_customer_id)
            .ok_or_else(|| {
                ApplicationError::Conflict(format!(
                    "billing customer for account {} could not be resolved",
                    account.id
                ))
            })
    }

    async fn existing_invoice(&self, estimate_id: &str) -> Result<Option<Invoice>, ApplicationError> {
        self.estimates.find_invoice_for_estimate(estimate_id).await.map_err(persistence)
    }

    async fn load_invoice(&self, invoice_id: &str) -> Result<Invoice, ApplicationError> {
        self.estimates
            .find_invoice(invoice_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::not_found("invoice", invoice_id))
    }

    async fn request_id_for(&self, invoice: &Invoice) -> Option<String> {
        match self.estimates.find_estimate(&invoice.estimate_id).await {
            Ok(estimate) => estimate.map(|estimate| estimate.request_id),
            Err(failure) => {
                warn!(invoice_id = %invoice.id, error = %failure, "estimate lookup failed");
                None
            }
        }
    }

    async fn announce_sent(&self, invoice: &Invoice) {
        let Some(request_id) = self.request_id_for(invoice).await else {
            return;
        };
        let thread_ts = match self.requests.find_by_id(&request_id).await {
            Ok(Some(request)) => request.slack_thread_ts,
            Ok(None) => None,
            Err(failure) => {
                warn!(request_id = %request_id, error = %failure, "request lookup failed");
                None
            }
        };
        if let Some(thread_ts) = thread_ts.as_deref() {
            self.post_to_channel(&request_id, Some(thread_ts), &invoice_sent_message(invoice)).await;
        }
    }

    /// Best effort: failures are logged and swallowed.
    async fn post_to_channel(
        &self,
        request_id: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Option<String> {
        let (Some(slack), Some(channel)) = (self.slack.as_ref(), self.request_channel.as_deref())
        else {
            return None;
        };

        match slack.post_message(channel, thread_ts, message).await {
            Ok(ts) => {
                info!(
                    event_name = "request.thread.posted",
                    request_id,
                    threaded = thread_ts.is_some(),
                    "request message posted"
                );
                Some(ts)
            }
            Err(failure) => {
                warn!(
                    event_name = "request.thread.post_failed",
                    request_id,
                    error = %failure,
                    "request message could not be posted"
                );
                None
            }
        }
    }

    fn billing(&self) -> Result<Arc<dyn BillingProvider>, ApplicationError> {
        self.billing
            .clone()
            .ok_or_else(|| ApplicationError::Configuration("billing.api_key is not configured".to_string()))
    }
}

fn upstream(error: BillingError) -> ApplicationError {
    ApplicationError::Upstream(error.to_string())
}
