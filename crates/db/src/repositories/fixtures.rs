use chrono::Utc;
use uuid::Uuid;

use intake_core::{Account, Contact, Project};

use super::{AccountRepository, SqlAccountRepository};
use crate::{connect_with_settings, migrations, DbPool};

pub(crate) struct SeededAccount {
    pub account: Account,
    pub project: Project,
    pub contact: Contact,
}

pub(crate) async fn setup_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    pool
}

pub(crate) async fn seed_account(pool: &DbPool) -> SeededAccount {
    let suffix = Uuid::new_v4().simple().to_string();
    let now = Utc::now();
    let account = Account {
        id: format!("acct-{suffix}"),
        name: "Acme Studio".to_string(),
        billing_email: Some("billing@acme.test".to_string()),
        billing_customer_id: None,
        created_at: now,
    };
    let project = Project {
        id: format!("proj-{suffix}"),
        account_id: account.id.clone(),
        name: "Storefront".to_string(),
        known_integrations: vec!["Stripe".to_string()],
        same_day_sla: false,
        created_at: now,
    };
    let contact = Contact {
        id: format!("contact-{suffix}"),
        account_id: account.id.clone(),
        full_name: "Ada Lovelace".to_string(),
        email: format!("ada+{suffix}@acme.test"),
        created_at: now,
    };

    let repo = SqlAccountRepository::new(pool.clone());
    repo.save_account(account.clone()).await.expect("save account");
    repo.save_project(project.clone()).await.expect("save project");
    repo.save_contact(contact.clone()).await.expect("save contact");

    SeededAccount { account, project, contact }
}
