use std::time::Duration;

use async_trait::async_trait;
use intake_core::config::BillingConfig;
use intake_core::{Account, Estimate};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("billing client could not be built: {0}")]
    Client(String),
    #[error("billing request failed: {0}")]
    Request(String),
    #[error("billing provider returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("billing response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInvoice {
    pub id: String,
    pub hosted_url: Option<String>,
    pub status: Option<String>,
}

/// External invoicing. Every call is keyed so a replay after a lost response
/// does not create duplicates upstream.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn create_customer(
        &self,
        account: &Account,
        idempotency_key: &str,
    ) -> Result<String, BillingError>;

    /// Adds one line item for the estimate and opens a draft invoice that
    /// will be sent by email.
    async fn create_invoice(
        &self,
        customer_id: &str,
        estimate: &Estimate,
        idempotency_key: &str,
    ) -> Result<ProviderInvoice, BillingError>;

    async fn send_invoice(&self, invoice_id: &str) -> Result<ProviderInvoice, BillingError>;
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    id: String,
    hosted_invoice_url: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Stripe's form-encoded v1 API.
pub struct StripeBilling {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    days_until_due: u32,
}

impl StripeBilling {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        days_until_due: u32,
        timeout: Duration,
    ) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| BillingError::Client(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            days_until_due,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &BillingConfig) -> Result<Option<Self>, BillingError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        Self::new(
            &config.base_url,
            api_key,
            config.days_until_due,
            Duration::from_secs(config.timeout_secs.max(1)),
        )
        .map(Some)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<ObjectResponse, BillingError> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response =
            request.send().await.map_err(|error| BillingError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(BillingError::Status { status: status.as_u16(), message });
        }

        response.json::<ObjectResponse>().await.map_err(|error| BillingError::Decode(error.to_string()))
    }
}

#[async_trait]
impl BillingProvider for StripeBilling {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    async fn create_customer(
        &self,
        account: &Account,
        idempotency_key: &str,
    ) -> Result<String, BillingError> {
        let mut form = vec![
            ("name", account.name.clone()),
            ("metadata[account_id]", account.id.clone()),
        ];
        if let Some(email) = account.billing_email.as_deref() {
            form.push(("email", email.to_string()));
        }

        let customer = self.post_form("/customers", &form, Some(idempotency_key)).await?;
        info!(
            event_name = "billing.customer.created",
            account_id = %account.id,
            customer_id = %customer.id,
            "billing customer created"
        );
        Ok(customer.id)
    }

    async fn create_invoice(
        &self,
        customer_id: &str,
        estimate: &Estimate,
        idempotency_key: &str,
    ) -> Result<ProviderInvoice, BillingError> {
        self.post_form(
            "/invoiceitems",
            &[
                ("customer", customer_id.to_string()),
                ("amount", estimate.amount_cents.to_string()),
                ("currency", estimate.currency.clone()),
                ("description", estimate.title.clone()),
                ("metadata[estimate_id]", estimate.id.clone()),
            ],
            Some(&format!("{idempotency_key}:item")),
        )
        .await?;

        let invoice = self
            .post_form(
                "/invoices",
                &[
                    ("customer", customer_id.to_string()),
                    ("collection_method", "send_invoice".to_string()),
                    ("days_until_due", self.days_until_due.to_string()),
                    ("pending_invoice_items_behavior", "include".to_string()),
                    ("metadata[estimate_id]", estimate.id.clone()),
                ],
                Some(&format!("{idempotency_key}:invoice")),
            )
            .await?;

        Ok(ProviderInvoice {
            id: invoice.id,
            hosted_url: invoice.hosted_invoice_url,
            status: invoice.status,
        })
    }

    async fn send_invoice(&self, invoice_id: &str) -> Result<ProviderInvoice, BillingError> {
        let invoice = self.post_form(&format!("/invoices/{invoice_id}/send"), &[], None).await?;
        Ok(ProviderInvoice {
            id: invoice.id,
            hosted_url: invoice.hosted_invoice_url,
            status: invoice.status,
        })
    }
}
