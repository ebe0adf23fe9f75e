use sqlx::{sqlite::SqliteRow, Row};

use intake_core::domain::account::normalize_email;
use intake_core::{Account, Contact, Project};

use super::{encode_timestamp, parse_json, parse_timestamp, AccountRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAccountRepository {
    pool: DbPool,
}

impl SqlAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AccountRepository for SqlAccountRepository {
    async fn save_account(&self, account: Account) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO account (id, name, billing_email, billing_customer_id, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                billing_email = excluded.billing_email,
                billing_customer_id = COALESCE(account.billing_customer_id, excluded.billing_customer_id)",
        )
        .bind(&account.id)
        .bind(&account.name)
        .bind(account.billing_email.as_deref())
        .bind(account.billing_customer_id.as_deref())
        .bind(encode_timestamp(account.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_account(&self, id: &str) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, billing_email, billing_customer_id, created_at
             FROM account
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn save_project(&self, project: Project) -> Result<(), RepositoryError> {
        let integrations = serde_json::to_string(&project.known_integrations)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO project (id, account_id, name, known_integrations_json, same_day_sla, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                known_integrations_json = excluded.known_integrations_json,
                same_day_sla = excluded.same_day_sla",
        )
        .bind(&project.id)
        .bind(&project.account_id)
        .bind(&project.name)
        .bind(integrations)
        .bind(project.same_day_sla)
        .bind(encode_timestamp(project.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_project(&self, id: &str) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, account_id, name, known_integrations_json, same_day_sla, created_at
             FROM project
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(project_from_row).transpose()
    }

    async fn list_projects(&self, account_id: &str) -> Result<Vec<Project>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, account_id, name, known_integrations_json, same_day_sla, created_at
             FROM project
             WHERE account_id = ?
             ORDER BY name ASC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(project_from_row).collect()
    }

    async fn save_contact(&self, contact: Contact) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO contact (id, account_id, full_name, email, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                email = excluded.email",
        )
        .bind(&contact.id)
        .bind(&contact.account_id)
        .bind(&contact.full_name)
        .bind(normalize_email(&contact.email))
        .bind(encode_timestamp(contact.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_contact(&self, id: &str) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, account_id, full_name, email, created_at FROM contact WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(contact_from_row).transpose()
    }

    async fn find_contact_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, account_id, full_name, email, created_at FROM contact WHERE email = ?",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        row.map(contact_from_row).transpose()
    }

    async fn set_billing_customer_if_absent(
        &self,
        account_id: &str,
        customer_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE account
             SET billing_customer_id = ?
             WHERE id = ? AND billing_customer_id IS NULL",
        )
        .bind(customer_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn account_from_row(row: SqliteRow) -> Result<Account, RepositoryError> {
    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        billing_email: row.try_get("billing_email")?,
        billing_customer_id: row.try_get("billing_customer_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn project_from_row(row: SqliteRow) -> Result<Project, RepositoryError> {
    let integrations_raw = row.try_get::<String, _>("known_integrations_json")?;

    Ok(Project {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        name: row.try_get("name")?,
        known_integrations: parse_json("known_integrations_json", &integrations_raw)?,
        same_day_sla: row.try_get("same_day_sla")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn contact_from_row(row: SqliteRow) -> Result<Contact, RepositoryError> {
    Ok(Contact {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
