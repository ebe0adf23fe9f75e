use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use intake_core::AuditEntry;

use super::{encode_timestamp, parse_json, parse_timestamp, AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_audit(
    conn: &mut SqliteConnection,
    entry: &AuditEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO audit_log (
            id,
            event_type,
            conversation_id,
            request_id,
            actor,
            metadata_json,
            created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.event_type)
    .bind(entry.conversation_id.as_deref())
    .bind(entry.request_id.as_deref())
    .bind(&entry.actor)
    .bind(entry.metadata_json())
    .bind(encode_timestamp(entry.created_at))
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        event_name = "audit.appended",
        audit_id = %entry.id,
        event_type = %entry.event_type,
        "audit entry appended"
    );

    Ok(())
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_audit(&mut *conn, &entry).await
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, event_type, conversation_id, request_id, actor, metadata_json, created_at
             FROM audit_log
             WHERE conversation_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(audit_from_row).collect()
    }

    async fn list_for_request(&self, request_id: &str) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, event_type, conversation_id, request_id, actor, metadata_json, created_at
             FROM audit_log
             WHERE request_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(audit_from_row).collect()
    }
}

fn audit_from_row(row: SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, String> = parse_json("metadata_json", &metadata_raw)?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        conversation_id: row.try_get("conversation_id")?,
        request_id: row.try_get("request_id")?,
        actor: row.try_get("actor")?,
        metadata,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
