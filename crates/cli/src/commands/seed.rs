use chrono::Utc;
use intake_core::config::{AppConfig, LoadOptions};
use intake_core::{Account, Contact, Project};
use intake_db::repositories::{AccountRepository, SqlAccountRepository};
use intake_db::{connect_with_settings, migrations, DbPool};

use crate::commands::CommandResult;

pub const DEMO_ACCOUNT_ID: &str = "acct-demo";
pub const DEMO_PROJECT_ID: &str = "proj-demo";
pub const DEMO_CONTACT_ID: &str = "contact-demo";
pub const DEMO_CONTACT_EMAIL: &str = "demo@intake.example";

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = seed_demo(&pool).await.map_err(|error| ("seed_execution", error, 6u8));
        pool.close().await;
        seeded
    });

    match result {
        Ok(lines) => CommandResult::success(
            "seed",
            format!("demo fixtures upserted:\n{}", lines.join("\n")),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

/// Upserts a fixed account, project and login contact. Safe to re-run.
pub async fn seed_demo(pool: &DbPool) -> Result<Vec<String>, String> {
    let accounts = SqlAccountRepository::new(pool.clone());
    let now = Utc::now();

    let account = Account {
        id: DEMO_ACCOUNT_ID.to_string(),
        name: "Demo Studio".to_string(),
        billing_email: Some("billing@intake.example".to_string()),
        billing_customer_id: None,
        created_at: now,
    };
    let project = Project {
        id: DEMO_PROJECT_ID.to_string(),
        account_id: DEMO_ACCOUNT_ID.to_string(),
        name: "Marketing site".to_string(),
        known_integrations: vec!["Stripe".to_string(), "Mailchimp".to_string()],
        same_day_sla: false,
        created_at: now,
    };
    let contact = Contact {
        id: DEMO_CONTACT_ID.to_string(),
        account_id: DEMO_ACCOUNT_ID.to_string(),
        full_name: "Demo Contact".to_string(),
        email: DEMO_CONTACT_EMAIL.to_string(),
        created_at: now,
    };

    accounts.save_account(account).await.map_err(|error| error.to_string())?;
    accounts.save_project(project).await.map_err(|error| error.to_string())?;
    accounts.save_contact(contact).await.map_err(|error| error.to_string())?;

    Ok(vec![
        format!("  - account: {DEMO_ACCOUNT_ID} (Demo Studio)"),
        format!("  - project: {DEMO_PROJECT_ID} (Marketing site)"),
        format!("  - contact: {DEMO_CONTACT_ID} ({DEMO_CONTACT_EMAIL})"),
    ])
}

#[cfg(test)]
mod tests {
    use intake_db::repositories::{AccountRepository, SqlAccountRepository};
    use intake_db::{connect_with_settings, migrations};

    use super::{seed_demo, DEMO_ACCOUNT_ID, DEMO_CONTACT_EMAIL};

    #[tokio::test]
    async fn seeding_twice_is_a_no_op() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = seed_demo(&pool).await.expect("first seed");
        let second = seed_demo(&pool).await.expect("second seed");
        assert_eq!(first, second);

        let accounts = SqlAccountRepository::new(pool.clone());
        let projects = accounts.list_projects(DEMO_ACCOUNT_ID).await.expect("projects");
        assert_eq!(projects.len(), 1);
        assert!(projects[0].knows_integration("stripe"));

        let contact =
            accounts.find_contact_by_email(DEMO_CONTACT_EMAIL).await.expect("lookup").expect("contact");
        assert_eq!(contact.account_id, DEMO_ACCOUNT_ID);
    }
}
