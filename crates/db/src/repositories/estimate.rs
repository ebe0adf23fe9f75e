use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use intake_core::{AuditEntry, Estimate, EstimateStatus, Invoice, InvoiceStatus};

use super::audit::insert_audit;
use super::{
    encode_optional_timestamp, encode_timestamp, parse_optional_timestamp, parse_timestamp,
    EstimateRepository, RepositoryError,
};
use crate::DbPool;

const ESTIMATE_COLUMNS: &str = "id, request_id, template_key, title, amount_cents, currency, \
     status, invoice_claim_id, approved_at, created_at";

const INVOICE_COLUMNS: &str = "id, estimate_id, provider, provider_invoice_id, \
     provider_invoice_url, provider_customer_id, amount_cents, currency, status, send_claim_id, \
     sent_at, created_at";

pub struct SqlEstimateRepository {
    pool: DbPool,
}

impl SqlEstimateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_estimate(
    conn: &mut SqliteConnection,
    estimate: &Estimate,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO estimate ({ESTIMATE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&estimate.id)
    .bind(&estimate.request_id)
    .bind(&estimate.template_key)
    .bind(&estimate.title)
    .bind(estimate.amount_cents)
    .bind(&estimate.currency)
    .bind(estimate.status.as_str())
    .bind(estimate.invoice_claim_id.as_deref())
    .bind(encode_optional_timestamp(estimate.approved_at))
    .bind(encode_timestamp(estimate.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl EstimateRepository for SqlEstimateRepository {
    async fn find_estimate(&self, id: &str) -> Result<Option<Estimate>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ESTIMATE_COLUMNS} FROM estimate WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(estimate_from_row).transpose()
    }

    async fn find_estimate_for_request(
        &self,
        request_id: &str,
    ) -> Result<Option<Estimate>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {ESTIMATE_COLUMNS} FROM estimate WHERE request_id = ?"))
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(estimate_from_row).transpose()
    }

    async fn list_estimates(
        &self,
        status: Option<EstimateStatus>,
    ) -> Result<Vec<Estimate>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {ESTIMATE_COLUMNS} FROM estimate
                 WHERE status = ?
                 ORDER BY created_at DESC, id ASC"
            ))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {ESTIMATE_COLUMNS} FROM estimate ORDER BY created_at DESC, id ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(estimate_from_row).collect()
    }

    async fn claim_invoice_creation(
        &self,
        estimate_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE estimate
             SET invoice_claim_id = ?
             WHERE id = ?
               AND invoice_claim_id IS NULL
               AND NOT EXISTS (SELECT 1 FROM invoice WHERE invoice.estimate_id = estimate.id)",
        )
        .bind(token)
        .bind(estimate_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_invoice_claim(
        &self,
        estimate_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE estimate
             SET invoice_claim_id = NULL
             WHERE id = ?
               AND invoice_claim_id = ?
               AND NOT EXISTS (SELECT 1 FROM invoice WHERE invoice.estimate_id = estimate.id)",
        )
        .bind(estimate_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_invoice(
        &self,
        token: &str,
        invoice: Invoice,
        approved_at: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let approved = sqlx::query(
            "UPDATE estimate
             SET status = 'approved',
                 approved_at = COALESCE(approved_at, ?)
             WHERE id = ? AND invoice_claim_id = ?",
        )
        .bind(encode_timestamp(approved_at))
        .bind(&invoice.estimate_id)
        .bind(token)
        .execute(&mut *tx)
        .await?;

        if approved.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(&format!(
            "INSERT INTO invoice ({INVOICE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&invoice.id)
        .bind(&invoice.estimate_id)
        .bind(&invoice.provider)
        .bind(&invoice.provider_invoice_id)
        .bind(invoice.provider_invoice_url.as_deref())
        .bind(&invoice.provider_customer_id)
        .bind(invoice.amount_cents)
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(invoice.send_claim_id.as_deref())
        .bind(encode_optional_timestamp(invoice.sent_at))
        .bind(encode_timestamp(invoice.created_at))
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut *tx, &audit).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find_invoice(&self, id: &str) -> Result<Option<Invoice>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoice WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(invoice_from_row).transpose()
    }

    async fn find_invoice_for_estimate(
        &self,
        estimate_id: &str,
    ) -> Result<Option<Invoice>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {INVOICE_COLUMNS} FROM invoice WHERE estimate_id = ?"))
                .bind(estimate_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(invoice_from_row).transpose()
    }

    async fn claim_invoice_send(
        &self,
        invoice_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE invoice
             SET send_claim_id = ?
             WHERE id = ? AND send_claim_id IS NULL AND sent_at IS NULL",
        )
        .bind(token)
        .bind(invoice_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_invoice_sent(
        &self,
        invoice_id: &str,
        token: &str,
        sent_at: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE invoice
             SET status = 'sent', sent_at = ?
             WHERE id = ? AND send_claim_id = ? AND sent_at IS NULL",
        )
        .bind(encode_timestamp(sent_at))
        .bind(invoice_id)
        .bind(token)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_audit(&mut *tx, &audit).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn release_invoice_send(
        &self,
        invoice_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE invoice
             SET send_claim_id = NULL
             WHERE id = ? AND send_claim_id = ? AND sent_at IS NULL",
        )
        .bind(invoice_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn estimate_from_row(row: SqliteRow) -> Result<Estimate, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = EstimateStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown estimate status `{status_raw}`")))?;

    Ok(Estimate {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        template_key: row.try_get("template_key")?,
        title: row.try_get("title")?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        status,
        invoice_claim_id: row.try_get("invoice_claim_id")?,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn invoice_from_row(row: SqliteRow) -> Result<Invoice, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = InvoiceStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown invoice status `{status_raw}`")))?;

    Ok(Invoice {
        id: row.try_get("id")?,
        estimate_id: row.try_get("estimate_id")?,
        provider: row.try_get("provider")?,
        provider_invoice_id: row.try_get("provider_invoice_id")?,
        provider_invoice_url: row.try_get("provider_invoice_url")?,
        provider_customer_id: row.try_get("provider_customer_id")?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        status,
        send_claim_id: row.try_get("send_claim_id")?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use intake_core::audit::{EVENT_ESTIMATE_APPROVED, EVENT_INVOICE_SENT, EVENT_REQUEST_CREATED};
    use intake_core::pipeline::draft_estimate;
    use intake_core::{
        AuditEntry, ClientRequest, Estimate, EstimateStatus, Impact, Invoice, InvoiceStatus,
        RequestType,
    };

    use super::SqlEstimateRepository;
    use crate::repositories::fixtures::{seed_account, setup_pool};
    use crate::repositories::{EstimateRepository, NewRequest, RequestRepository, SqlRequestRepository};
    use crate::DbPool;

    async fn seed_estimate(pool: &DbPool) -> Estimate {
        let seeded = seed_account(pool).await;
        let request = ClientRequest {
            id: Uuid::new_v4().to_string(),
            account_id: seeded.account.id.clone(),
            project_id: seeded.project.id.clone(),
            contact_id: None,
            request_type: RequestType::Change,
            description: "Tweak the pricing page copy".to_string(),
            impact: Impact::Low,
            urgency: "normal".to_string(),
            addon_flag: false,
            addon_rationale: None,
            slack_thread_ts: None,
            created_at: Utc::now(),
        };
        let estimate = draft_estimate(&request.id, RequestType::Change, None, "usd");
        SqlRequestRepository::new(pool.clone())
            .create(NewRequest {
                request: request.clone(),
                estimate: estimate.clone(),
                attachments: Vec::new(),
                audit: AuditEntry::new(EVENT_REQUEST_CREATED, "contact").for_request(&request.id),
            })
            .await
            .expect("create request");
        estimate
    }

    fn invoice_for(estimate: &Estimate) -> Invoice {
        Invoice {
            id: Uuid::new_v4().to_string(),
            estimate_id: estimate.id.clone(),
            provider: "stripe".to_string(),
            provider_invoice_id: "in_123".to_string(),
            provider_invoice_url: Some("https://invoice.test/in_123".to_string()),
            provider_customer_id: "cus_123".to_string(),
            amount_cents: estimate.amount_cents,
            currency: estimate.currency.clone(),
            status: InvoiceStatus::Draft,
            send_claim_id: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }

    fn approval_audit(estimate: &Estimate) -> AuditEntry {
        AuditEntry::new(EVENT_ESTIMATE_APPROVED, "staff").for_request(&estimate.request_id)
    }

    #[tokio::test]
    async fn invoice_claim_is_exclusive_and_closed_by_invoice() {
        let pool = setup_pool().await;
        let estimate = seed_estimate(&pool).await;
        let repo = SqlEstimateRepository::new(pool);

        assert!(repo.claim_invoice_creation(&estimate.id, "claim-a").await.expect("claim a"));
        assert!(!repo.claim_invoice_creation(&estimate.id, "claim-b").await.expect("claim b"));

        let recorded = repo
            .record_invoice("claim-a", invoice_for(&estimate), Utc::now(), approval_audit(&estimate))
            .await
            .expect("record");
        assert!(recorded);

        assert!(!repo.release_invoice_claim(&estimate.id, "claim-a").await.expect("release"));
        let stored = repo.find_estimate(&estimate.id).await.expect("find").expect("estimate");
        assert_eq!(stored.status, EstimateStatus::Approved);
        assert!(stored.approved_at.is_some());
        assert_eq!(repo.list_estimates(Some(EstimateStatus::Draft)).await.expect("list").len(), 0);
    }

    #[tokio::test]
    async fn record_invoice_requires_the_held_claim() {
        let pool = setup_pool().await;
        let estimate = seed_estimate(&pool).await;
        let repo = SqlEstimateRepository::new(pool);

        assert!(repo.claim_invoice_creation(&estimate.id, "claim-a").await.expect("claim"));
        assert!(repo.release_invoice_claim(&estimate.id, "claim-a").await.expect("release"));

        let recorded = repo
            .record_invoice("claim-a", invoice_for(&estimate), Utc::now(), approval_audit(&estimate))
            .await
            .expect("record");

        assert!(!recorded);
        assert!(repo.find_invoice_for_estimate(&estimate.id).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn approved_estimate_cannot_revert_to_draft() {
        let pool = setup_pool().await;
        let estimate = seed_estimate(&pool).await;
        let repo = SqlEstimateRepository::new(pool.clone());

        repo.claim_invoice_creation(&estimate.id, "claim").await.expect("claim");
        repo.record_invoice("claim", invoice_for(&estimate), Utc::now(), approval_audit(&estimate))
            .await
            .expect("record");

        let revert = sqlx::query("UPDATE estimate SET status = 'draft' WHERE id = ?")
            .bind(&estimate.id)
            .execute(&pool)
            .await;
        assert!(revert.is_err());
    }

    #[tokio::test]
    async fn send_claim_commits_once() {
        let pool = setup_pool().await;
        let estimate = seed_estimate(&pool).await;
        let repo = SqlEstimateRepository::new(pool);
        let invoice = invoice_for(&estimate);

        repo.claim_invoice_creation(&estimate.id, "claim").await.expect("claim");
        repo.record_invoice("claim", invoice.clone(), Utc::now(), approval_audit(&estimate))
            .await
            .expect("record");

        let send_audit =
            || AuditEntry::new(EVENT_INVOICE_SENT, "staff").for_request(&estimate.request_id);

        assert!(repo.claim_invoice_send(&invoice.id, "send-a").await.expect("claim a"));
        assert!(!repo.claim_invoice_send(&invoice.id, "send-b").await.expect("claim b"));
        assert!(!repo
            .mark_invoice_sent(&invoice.id, "send-b", Utc::now(), send_audit())
            .await
            .expect("wrong token"));
        assert!(repo
            .mark_invoice_sent(&invoice.id, "send-a", Utc::now(), send_audit())
            .await
            .expect("mark sent"));
        assert!(!repo.claim_invoice_send(&invoice.id, "send-c").await.expect("after send"));

        let stored = repo.find_invoice(&invoice.id).await.expect("find").expect("invoice");
        assert!(stored.is_sent());
        assert_eq!(stored.status, InvoiceStatus::Sent);
    }
}
