use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use intake_core::domain::brief::SchedulingPreference;
use intake_core::domain::conversation::{Attachment, AttachmentOwner};
use intake_core::domain::fields::{field_map_json, parse_field_map};
use intake_core::{
    Conversation, ConversationMode, IntakeBrief, IntakeState, Message, SenderRole,
};

use super::attachment::{insert_attachment, list_for_conversation};
use super::audit::insert_audit;
use super::{
    encode_optional_timestamp, encode_timestamp, parse_json, parse_optional_timestamp,
    parse_timestamp, ConversationRepository, Finalization, RepositoryError, TurnWrite,
};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (
                id,
                account_id,
                contact_id,
                channel,
                subject,
                state,
                mode,
                normalized_fields_json,
                summary,
                ended_at,
                slack_post_id,
                slack_posted_at,
                revision,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.account_id)
        .bind(conversation.contact_id.as_deref())
        .bind(&conversation.channel)
        .bind(conversation.subject.as_deref())
        .bind(conversation.state.as_str())
        .bind(conversation.mode.as_str())
        .bind(field_map_json(&conversation.fields))
        .bind(conversation.summary.as_deref())
        .bind(encode_optional_timestamp(conversation.ended_at))
        .bind(conversation.revision)
        .bind(encode_timestamp(conversation.created_at))
        .bind(encode_timestamp(conversation.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                account_id,
                contact_id,
                channel,
                subject,
                state,
                mode,
                normalized_fields_json,
                summary,
                ended_at,
                slack_post_id,
                slack_posted_at,
                revision,
                created_at,
                updated_at
             FROM conversation
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn record_turn(
        &self,
        conversation: &Conversation,
        message: Message,
        finalization: Option<Finalization>,
    ) -> Result<TurnWrite, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE conversation
             SET state = ?,
                 mode = ?,
                 normalized_fields_json = ?,
                 summary = ?,
                 contact_id = COALESCE(contact_id, ?),
                 ended_at = COALESCE(ended_at, ?),
                 updated_at = ?,
                 revision = revision + 1
             WHERE id = ? AND revision = ?",
        )
        .bind(conversation.state.as_str())
        .bind(conversation.mode.as_str())
        .bind(field_map_json(&conversation.fields))
        .bind(conversation.summary.as_deref())
        .bind(conversation.contact_id.as_deref())
        .bind(encode_optional_timestamp(conversation.ended_at))
        .bind(encode_timestamp(conversation.updated_at))
        .bind(&conversation.id)
        .bind(conversation.revision)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(TurnWrite::Stale);
        }

        sqlx::query(
            "INSERT INTO message (
                id,
                conversation_id,
                sender_type,
                sender_contact_id,
                body,
                fields_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.sender_type.as_str())
        .bind(message.sender_contact_id.as_deref())
        .bind(&message.body)
        .bind(field_map_json(&message.fields))
        .bind(encode_timestamp(message.created_at))
        .execute(&mut *tx)
        .await?;

        let brief = match finalization {
            Some(finalization) => Some(write_finalization(&mut *tx, finalization).await?),
            None => None,
        };

        tx.commit().await?;
        Ok(TurnWrite::Applied { brief })
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_type, sender_contact_id, body, fields_json, created_at
             FROM message
             WHERE conversation_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn find_brief(
        &self,
        conversation_id: &str,
    ) -> Result<Option<IntakeBrief>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, conversation_id, summary, goals, constraints, timeline, budget,
                    scheduling_json, created_at
             FROM intake_brief
             WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(brief_from_row).transpose()
    }

    async fn list_attachments(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Attachment>, RepositoryError> {
        list_for_conversation(&self.pool, conversation_id).await
    }

    async fn claim_notification(
        &self,
        conversation_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversation
             SET slack_post_id = ?
             WHERE id = ? AND slack_post_id IS NULL AND slack_posted_at IS NULL",
        )
        .bind(token)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit_notification(
        &self,
        conversation_id: &str,
        token: &str,
        posted_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversation
             SET slack_posted_at = ?
             WHERE id = ? AND slack_post_id = ? AND slack_posted_at IS NULL",
        )
        .bind(encode_timestamp(posted_at))
        .bind(conversation_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_notification(
        &self,
        conversation_id: &str,
        token: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversation
             SET slack_post_id = NULL
             WHERE id = ? AND slack_post_id = ? AND slack_posted_at IS NULL",
        )
        .bind(conversation_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Upserts the brief, links attachments to it and appends the audit row.
async fn write_finalization(
    conn: &mut SqliteConnection,
    finalization: Finalization,
) -> Result<IntakeBrief, RepositoryError> {
    let Finalization { brief, attachments, audit } = finalization;

    sqlx::query(
        "INSERT INTO intake_brief (
            id,
            conversation_id,
            summary,
            goals,
            constraints,
            timeline,
            budget,
            scheduling_json,
            created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(conversation_id) DO UPDATE SET
            summary = excluded.summary,
            goals = excluded.goals,
            constraints = excluded.constraints,
            timeline = excluded.timeline,
            budget = excluded.budget,
            scheduling_json = excluded.scheduling_json",
    )
    .bind(&brief.id)
    .bind(&brief.conversation_id)
    .bind(&brief.summary)
    .bind(brief.goals.as_deref())
    .bind(brief.constraints.as_deref())
    .bind(brief.timeline.as_deref())
    .bind(brief.budget.as_deref())
    .bind(brief.scheduling_json())
    .bind(encode_timestamp(brief.created_at))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT id, conversation_id, summary, goals, constraints, timeline, budget,
                scheduling_json, created_at
         FROM intake_brief
         WHERE conversation_id = ?",
    )
    .bind(&brief.conversation_id)
    .fetch_one(&mut *conn)
    .await?;
    let stored = brief_from_row(row)?;

    for input in attachments {
        let attachment = Attachment::new(
            AttachmentOwner::Conversation {
                conversation_id: stored.conversation_id.clone(),
                brief_id: Some(stored.id.clone()),
            },
            input,
        );
        insert_attachment(&mut *conn, &attachment).await?;
    }

    insert_audit(&mut *conn, &audit).await?;

    Ok(stored)
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = IntakeState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown intake state `{state_raw}`")))?;
    let mode_raw = row.try_get::<String, _>("mode")?;
    let mode = ConversationMode::parse(&mode_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown conversation mode `{mode_raw}`")))?;
    let fields_raw = row.try_get::<String, _>("normalized_fields_json")?;
    let fields = parse_field_map(&fields_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `normalized_fields_json`: {error}"))
    })?;

    Ok(Conversation {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        contact_id: row.try_get("contact_id")?,
        channel: row.try_get("channel")?,
        subject: row.try_get("subject")?,
        state,
        mode,
        fields,
        summary: row.try_get("summary")?,
        ended_at: parse_optional_timestamp("ended_at", row.try_get("ended_at")?)?,
        slack_post_id: row.try_get("slack_post_id")?,
        slack_posted_at: parse_optional_timestamp("slack_posted_at", row.try_get("slack_posted_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        revision: row.try_get("revision")?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let sender_raw = row.try_get::<String, _>("sender_type")?;
    let sender_type = SenderRole::parse(&sender_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sender type `{sender_raw}`")))?;
    let fields_raw = row.try_get::<String, _>("fields_json")?;
    let fields = parse_field_map(&fields_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `fields_json`: {error}"))
    })?;

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_type,
        sender_contact_id: row.try_get("sender_contact_id")?,
        body: row.try_get("body")?,
        fields,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn brief_from_row(row: SqliteRow) -> Result<IntakeBrief, RepositoryError> {
    let scheduling_raw = row.try_get::<String, _>("scheduling_json")?;
    let scheduling: SchedulingPreference = parse_json("scheduling_json", &scheduling_raw)?;

    Ok(IntakeBrief {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        summary: row.try_get("summary")?,
        goals: row.try_get("goals")?,
        constraints: row.try_get("constraints")?,
        timeline: row.try_get("timeline")?,
        budget: row.try_get("budget")?,
        scheduling,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use intake_core::audit::EVENT_INTAKE_SUBMITTED;
    use intake_core::domain::conversation::{AttachmentInput, NotificationStatus};
    use intake_core::{
        AuditEntry, Conversation, FieldMap, FieldValue, IntakeBrief, IntakeState, Message,
        SenderRole,
    };

    use super::SqlConversationRepository;
    use crate::repositories::fixtures::{seed_account, setup_pool};
    use crate::repositories::{
        AuditRepository, ConversationRepository, Finalization, SqlAuditRepository, TurnWrite,
    };

    async fn create_conversation(repo: &SqlConversationRepository, account_id: &str) -> Conversation {
        let conversation =
            Conversation::new(account_id, None, "web", Some("Website refresh".to_string()));
        repo.create(conversation.clone()).await.expect("create conversation");
        conversation
    }

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs.iter().map(|(key, value)| (key.to_string(), FieldValue::text(*value))).collect()
    }

    fn attachment(url: &str) -> AttachmentInput {
        AttachmentInput {
            file_name: "scope.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            size: Some(2048),
            url: url.to_string(),
            key: None,
        }
    }

    fn submission(conversation_id: &str, needs: &str, urls: &[&str]) -> Finalization {
        Finalization {
            brief: IntakeBrief::derive(conversation_id, &fields(&[("needs_summary", needs)])),
            attachments: urls.iter().map(|url| attachment(url)).collect(),
            audit: AuditEntry::new(EVENT_INTAKE_SUBMITTED, "contact").for_conversation(conversation_id),
        }
    }

    #[tokio::test]
    async fn record_turn_persists_state_and_message_together() {
        let pool = setup_pool().await;
        let seeded = seed_account(&pool).await;
        let repo = SqlConversationRepository::new(pool);
        let mut conversation = create_conversation(&repo, &seeded.account.id).await;

        conversation.state = IntakeState::ModeSelect;
        conversation.fields = fields(&[("intent", "redesign")]);
        conversation.updated_at = Utc::now();
        let message = Message::new(
            &conversation.id,
            SenderRole::Contact,
            None,
            "We want a redesign",
            fields(&[("intent", "redesign")]),
        );

        let write = repo.record_turn(&conversation, message, None).await.expect("record turn");
        assert_eq!(write, TurnWrite::Applied { brief: None });

        let stored = repo.find_by_id(&conversation.id).await.expect("find").expect("conversation");
        assert_eq!(stored.state, IntakeState::ModeSelect);
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.fields.get("intent"), Some(&FieldValue::text("redesign")));
        let messages = repo.list_messages(&conversation.id).await.expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_type, SenderRole::Contact);
    }

    #[tokio::test]
    async fn stale_revision_writes_nothing() {
        let pool = setup_pool().await;
        let seeded = seed_account(&pool).await;
        let repo = SqlConversationRepository::new(pool);
        let snapshot = create_conversation(&repo, &seeded.account.id).await;

        let mut first = snapshot.clone();
        first.state = IntakeState::ModeSelect;
        first.fields = fields(&[("intent", "first")]);
        let message = Message::new(&first.id, SenderRole::Contact, None, "first", first.fields.clone());
        assert_eq!(
            repo.record_turn(&first, message, None).await.expect("first"),
            TurnWrite::Applied { brief: None }
        );

        let mut second = snapshot;
        second.state = IntakeState::Submit;
        second.fields = fields(&[("intent", "second")]);
        let message =
            Message::new(&second.id, SenderRole::Contact, None, "second", second.fields.clone());
        let finalization = submission(&second.id, "Lost race", &["https://files.test/a.pdf"]);
        assert_eq!(
            repo.record_turn(&second, message, Some(finalization)).await.expect("second"),
            TurnWrite::Stale
        );

        let stored = repo.find_by_id(&second.id).await.expect("find").expect("conversation");
        assert_eq!(stored.state, IntakeState::ModeSelect);
        assert_eq!(stored.fields.get("intent"), Some(&FieldValue::text("first")));
        assert_eq!(repo.list_messages(&second.id).await.expect("messages").len(), 1);
        assert!(repo.find_brief(&second.id).await.expect("brief").is_none());
        assert!(repo.list_attachments(&second.id).await.expect("attachments").is_empty());
    }

    #[tokio::test]
    async fn ended_at_is_set_only_once() {
        let pool = setup_pool().await;
        let seeded = seed_account(&pool).await;
        let repo = SqlConversationRepository::new(pool);
        let mut conversation = create_conversation(&repo, &seeded.account.id).await;

        let first_end = Utc::now();
        conversation.state = IntakeState::Submit;
        conversation.ended_at = Some(first_end);
        let message = Message::new(&conversation.id, SenderRole::System, None, "end", FieldMap::new());
        repo.record_turn(&conversation, message, None).await.expect("first end");

        conversation.revision += 1;
        conversation.ended_at = Some(first_end + chrono::Duration::minutes(5));
        let message = Message::new(&conversation.id, SenderRole::Staff, None, "note", FieldMap::new());
        repo.record_turn(&conversation, message, None).await.expect("second turn");

        let stored = repo.find_by_id(&conversation.id).await.expect("find").expect("conversation");
        let stored_end = stored.ended_at.expect("ended_at");
        assert_eq!(stored_end.timestamp_micros(), first_end.timestamp_micros());
        assert_eq!(stored.revision, 2);
    }

    #[tokio::test]
    async fn submitting_turn_writes_brief_attachments_and_audit() {
        let pool = setup_pool().await;
        let seeded = seed_account(&pool).await;
        let repo = SqlConversationRepository::new(pool.clone());
        let mut conversation = create_conversation(&repo, &seeded.account.id).await;

        conversation.state = IntakeState::Submit;
        let message = Message::new(&conversation.id, SenderRole::Contact, None, "done", FieldMap::new());
        let finalization = submission(
            &conversation.id,
            "New site",
            &["https://files.test/a.pdf", "https://files.test/b.pdf"],
        );
        let write = repo.record_turn(&conversation, message, Some(finalization)).await.expect("submit");

        let TurnWrite::Applied { brief: Some(brief) } = write else {
            panic!("expected a finalized turn, got {write:?}");
        };
        assert_eq!(brief.summary, "New site");
        assert_eq!(repo.find_brief(&conversation.id).await.expect("brief"), Some(brief.clone()));

        let attachments = repo.list_attachments(&conversation.id).await.expect("attachments");
        assert_eq!(attachments.len(), 2);
        assert!(attachments.iter().all(|attachment| matches!(
            &attachment.owner,
            intake_core::AttachmentOwner::Conversation { brief_id: Some(id), .. } if id == &brief.id
        )));

        let audit = SqlAuditRepository::new(pool)
            .list_for_conversation(&conversation.id)
            .await
            .expect("audit");
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn notification_claim_admits_one_holder_until_released() {
        let pool = setup_pool().await;
        let seeded = seed_account(&pool).await;
        let repo = SqlConversationRepository::new(pool);
        let conversation = create_conversation(&repo, &seeded.account.id).await;

        assert!(repo.claim_notification(&conversation.id, "token-a").await.expect("claim a"));
        assert!(!repo.claim_notification(&conversation.id, "token-b").await.expect("claim b"));

        assert!(!repo.release_notification(&conversation.id, "token-b").await.expect("wrong token"));
        assert!(repo.release_notification(&conversation.id, "token-a").await.expect("release a"));

        assert!(repo.claim_notification(&conversation.id, "token-b").await.expect("reclaim"));
        assert!(repo
            .commit_notification(&conversation.id, "token-b", Utc::now())
            .await
            .expect("commit"));

        assert!(!repo.claim_notification(&conversation.id, "token-c").await.expect("after commit"));
        assert!(!repo.release_notification(&conversation.id, "token-b").await.expect("release sent"));

        let stored = repo.find_by_id(&conversation.id).await.expect("find").expect("conversation");
        assert_eq!(stored.notification_status(), NotificationStatus::Delivered);
        assert_eq!(stored.slack_post_id.as_deref(), Some("token-b"));
    }
}
