use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use intake_core::{OtpChallenge, Session};

use super::{
    encode_optional_timestamp, encode_timestamp, parse_optional_timestamp, parse_timestamp,
    parse_u32, AuthRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlAuthRepository {
    pool: DbPool,
}

impl SqlAuthRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuthRepository for SqlAuthRepository {
    async fn create_challenge(&self, challenge: OtpChallenge) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO otp_challenge (
                id,
                email,
                contact_id,
                code_hash,
                attempts,
                max_attempts,
                expires_at,
                consumed_at,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&challenge.id)
        .bind(&challenge.email)
        .bind(challenge.contact_id.as_deref())
        .bind(&challenge.code_hash)
        .bind(i64::from(challenge.attempts))
        .bind(i64::from(challenge.max_attempts))
        .bind(encode_timestamp(challenge.expires_at))
        .bind(encode_optional_timestamp(challenge.consumed_at))
        .bind(encode_timestamp(challenge.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_challenge(&self, id: &str) -> Result<Option<OtpChallenge>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, contact_id, code_hash, attempts, max_attempts, expires_at,
                    consumed_at, created_at
             FROM otp_challenge
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(challenge_from_row).transpose()
    }

    async fn register_attempt(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE otp_challenge
             SET attempts = attempts + 1
             WHERE id = ?
               AND consumed_at IS NULL
               AND attempts < max_attempts
               AND expires_at > ?",
        )
        .bind(id)
        .bind(encode_timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn consume_challenge(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE otp_challenge
             SET consumed_at = ?
             WHERE id = ? AND consumed_at IS NULL",
        )
        .bind(encode_timestamp(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn create_session(&self, session: Session) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO session (token_hash, account_id, contact_id, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.token_hash)
        .bind(&session.account_id)
        .bind(&session.contact_id)
        .bind(encode_timestamp(session.expires_at))
        .bind(encode_timestamp(session.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT token_hash, account_id, contact_id, expires_at, created_at
             FROM session
             WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let cutoff = encode_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let sessions = sqlx::query("DELETE FROM session WHERE expires_at <= ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;
        let challenges = sqlx::query("DELETE FROM otp_challenge WHERE expires_at <= ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(sessions.rows_affected() + challenges.rows_affected())
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    Ok(Session {
        token_hash: row.try_get("token_hash")?,
        account_id: row.try_get("account_id")?,
        contact_id: row.try_get("contact_id")?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn challenge_from_row(row: SqliteRow) -> Result<OtpChallenge, RepositoryError> {
    Ok(OtpChallenge {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        contact_id: row.try_get("contact_id")?,
        code_hash: row.try_get("code_hash")?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
        consumed_at: parse_optional_timestamp("consumed_at", row.try_get("consumed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
