use sqlx::{sqlite::SqliteRow, Row};

use intake_core::domain::conversation::{Attachment, AttachmentOwner};
use intake_core::pipeline::EstimateTemplate;
use intake_core::{ClientRequest, Impact, RequestType, RequestUpdate};

use super::attachment::{insert_attachment, list_for_request};
use super::audit::insert_audit;
use super::estimate::insert_estimate;
use super::{encode_timestamp, parse_timestamp, NewRequest, RepositoryError, RequestRepository};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, account_id, project_id, contact_id, request_type, description, \
     impact, urgency, addon_flag, addon_rationale, slack_thread_ts, created_at";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn find_template(
        &self,
        request_type: RequestType,
    ) -> Result<Option<EstimateTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT key, request_type, title, amount_cents
             FROM estimate_template
             WHERE request_type = ?",
        )
        .bind(request_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(template_from_row).transpose()
    }

    async fn create(&self, new_request: NewRequest) -> Result<(), RepositoryError> {
        let NewRequest { request, estimate, attachments, audit } = new_request;
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO client_request ({REQUEST_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&request.id)
        .bind(&request.account_id)
        .bind(&request.project_id)
        .bind(request.contact_id.as_deref())
        .bind(request.request_type.as_str())
        .bind(&request.description)
        .bind(request.impact.as_str())
        .bind(&request.urgency)
        .bind(request.addon_flag)
        .bind(request.addon_rationale.as_deref())
        .bind(request.slack_thread_ts.as_deref())
        .bind(encode_timestamp(request.created_at))
        .execute(&mut *tx)
        .await?;

        insert_estimate(&mut *tx, &estimate).await?;

        for input in attachments {
            let attachment =
                Attachment::new(AttachmentOwner::Request { request_id: request.id.clone() }, input);
            insert_attachment(&mut *tx, &attachment).await?;
        }

        insert_audit(&mut *tx, &audit).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ClientRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM client_request WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(request_from_row).transpose()
    }

    async fn list_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<ClientRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM client_request
             WHERE account_id = ?
             ORDER BY created_at DESC, id ASC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(request_from_row).collect()
    }

    async fn set_thread_ts(
        &self,
        request_id: &str,
        thread_ts: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE client_request SET slack_thread_ts = ? WHERE id = ?")
            .bind(thread_ts)
            .bind(request_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_update(&self, update: RequestUpdate) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO request_update (id, request_id, author_contact_id, body, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&update.id)
        .bind(&update.request_id)
        .bind(update.author_contact_id.as_deref())
        .bind(&update.body)
        .bind(encode_timestamp(update.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_updates(&self, request_id: &str) -> Result<Vec<RequestUpdate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, author_contact_id, body, created_at
             FROM request_update
             WHERE request_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(update_from_row).collect()
    }

    async fn list_attachments(&self, request_id: &str) -> Result<Vec<Attachment>, RepositoryError> {
        list_for_request(&self.pool, request_id).await
    }
}

fn template_from_row(row: SqliteRow) -> Result<EstimateTemplate, RepositoryError> {
    let request_type_raw = row.try_get::<String, _>("request_type")?;

    Ok(EstimateTemplate {
        key: row.try_get("key")?,
        request_type: RequestType::parse(&request_type_raw)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        title: row.try_get("title")?,
        amount_cents: row.try_get("amount_cents")?,
    })
}

fn update_from_row(row: SqliteRow) -> Result<RequestUpdate, RepositoryError> {
    Ok(RequestUpdate {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        author_contact_id: row.try_get("author_contact_id")?,
        body: row.try_get("body")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn request_from_row(row: SqliteRow) -> Result<ClientRequest, RepositoryError> {
    let request_type_raw = row.try_get::<String, _>("request_type")?;
    let impact_raw = row.try_get::<String, _>("impact")?;

    Ok(ClientRequest {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        project_id: row.try_get("project_id")?,
        contact_id: row.try_get("contact_id")?,
        request_type: RequestType::parse(&request_type_raw)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        description: row.try_get("description")?,
        impact: Impact::parse(&impact_raw)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        urgency: row.try_get("urgency")?,
        addon_flag: row.try_get("addon_flag")?,
        addon_rationale: row.try_get("addon_rationale")?,
        slack_thread_ts: row.try_get("slack_thread_ts")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
