use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::{Estimate, EstimateStatus, RequestType};

pub const FALLBACK_TEMPLATE_KEY: &str = "unpriced";

/// Named pricing template looked up by request type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateTemplate {
    pub key: String,
    pub request_type: RequestType,
    pub title: String,
    pub amount_cents: i64,
}

impl EstimateTemplate {
    pub fn zero(request_type: RequestType) -> Self {
        Self {
            key: FALLBACK_TEMPLATE_KEY.to_string(),
            request_type,
            title: format!("{request_type} request (to be priced)"),
            amount_cents: 0,
        }
    }
}

/// Draft estimate for a new request; a missing template prices at zero.
pub fn draft_estimate(
    request_id: impl Into<String>,
    request_type: RequestType,
    template: Option<EstimateTemplate>,
    currency: &str,
) -> Estimate {
    let template = template.unwrap_or_else(|| EstimateTemplate::zero(request_type));
    Estimate {
        id: Uuid::new_v4().to_string(),
        request_id: request_id.into(),
        template_key: template.key,
        title: template.title,
        amount_cents: template.amount_cents,
        currency: currency.to_ascii_lowercase(),
        status: EstimateStatus::Draft,
        invoice_claim_id: None,
        approved_at: None,
        created_at: Utc::now(),
    }
}
