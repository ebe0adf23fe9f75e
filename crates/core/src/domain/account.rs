use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub billing_email: Option<String>,
    /// External billing customer, created lazily on first estimate approval.
    pub billing_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub known_integrations: Vec<String>,
    pub same_day_sla: bool,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn knows_integration(&self, target: &str) -> bool {
        self.known_integrations.iter().any(|known| known.trim().eq_ignore_ascii_case(target.trim()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub account_id: String,
    pub full_name: String,
    /// Lower-cased login address.
    pub email: String,
    pub created_at: DateTime<Utc>,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// One-time passcode challenge. Only the keyed hash of the code is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub id: String,
    pub email: String,
    pub contact_id: Option<String>,
    pub code_hash: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OtpChallenge {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.attempts < self.max_attempts && self.expires_at > now
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token_hash: String,
    pub account_id: String,
    pub contact_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
