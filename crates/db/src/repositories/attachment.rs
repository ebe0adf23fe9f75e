use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use intake_core::domain::conversation::{Attachment, AttachmentOwner};

use super::{encode_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const ATTACHMENT_COLUMNS: &str = "id, conversation_id, brief_id, request_id, file_name, \
     content_type, size_bytes, url, object_key, created_at";

/// Inserts an attachment row. A repeated URL for the same owner is ignored.
pub(crate) async fn insert_attachment(
    conn: &mut SqliteConnection,
    attachment: &Attachment,
) -> Result<(), RepositoryError> {
    let (conversation_id, brief_id, request_id) = match &attachment.owner {
        AttachmentOwner::Conversation { conversation_id, brief_id } => {
            (Some(conversation_id.as_str()), brief_id.as_deref(), None)
        }
        AttachmentOwner::Request { request_id } => (None, None, Some(request_id.as_str())),
    };

    sqlx::query(
        "INSERT INTO attachment (
            id,
            conversation_id,
            brief_id,
            request_id,
            file_name,
            content_type,
            size_bytes,
            url,
            object_key,
            created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(&attachment.id)
    .bind(conversation_id)
    .bind(brief_id)
    .bind(request_id)
    .bind(&attachment.file_name)
    .bind(attachment.content_type.as_deref())
    .bind(attachment.size)
    .bind(&attachment.url)
    .bind(attachment.key.as_deref())
    .bind(encode_timestamp(attachment.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn list_for_conversation(
    pool: &DbPool,
    conversation_id: &str,
) -> Result<Vec<Attachment>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachment
         WHERE conversation_id = ?
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(attachment_from_row).collect()
}

pub(crate) async fn list_for_request(
    pool: &DbPool,
    request_id: &str,
) -> Result<Vec<Attachment>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachment
         WHERE request_id = ?
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(attachment_from_row).collect()
}

fn attachment_from_row(row: SqliteRow) -> Result<Attachment, RepositoryError> {
    let conversation_id: Option<String> = row.try_get("conversation_id")?;
    let request_id: Option<String> = row.try_get("request_id")?;

    let owner = match (conversation_id, request_id) {
        (Some(conversation_id), None) => {
            AttachmentOwner::Conversation { conversation_id, brief_id: row.try_get("brief_id")? }
        }
        (None, Some(request_id)) => AttachmentOwner::Request { request_id },
        _ => {
            return Err(RepositoryError::Decode(
                "attachment must belong to exactly one owner".to_string(),
            ))
        }
    };

    Ok(Attachment {
        id: row.try_get("id")?,
        owner,
        file_name: row.try_get("file_name")?,
        content_type: row.try_get("content_type")?,
        size: row.try_get("size_bytes")?,
        url: row.try_get("url")?,
        key: row.try_get("object_key")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
