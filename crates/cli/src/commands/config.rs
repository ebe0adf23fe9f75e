use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use intake_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    render(&config, config_file_doc.as_ref(), config_file_path.as_deref())
}

fn render(config: &AppConfig, config_file_doc: Option<&Value>, config_file_path: Option<&Path>) -> String {
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    for entry in entries(config) {
        let source = field_source(entry.key, entry.env_key, config_file_doc, config_file_path);
        lines.push(render_line(entry.key, &entry.value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let entry = |key, value: String, env_key| Entry { key, value, env_key };

    vec![
        entry("database.url", config.database.url.clone(), "INTAKE_DATABASE_URL"),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            "INTAKE_DATABASE_MAX_CONNECTIONS",
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "INTAKE_DATABASE_TIMEOUT_SECS",
        ),
        entry(
            "slack.webhook_url",
            config.slack.webhook_url().map(redact_url).unwrap_or_else(unset),
            "INTAKE_SLACK_WEBHOOK_URL",
        ),
        entry(
            "slack.bot_token",
            config.slack.bot_token().map(redact_token).unwrap_or_else(unset),
            "INTAKE_SLACK_BOT_TOKEN",
        ),
        entry(
            "slack.request_channel",
            config.slack.request_channel.clone().unwrap_or_else(unset),
            "INTAKE_SLACK_REQUEST_CHANNEL",
        ),
        entry(
            "security.field_encryption_key",
            redact_secret(Some(&config.security.field_encryption_key)),
            "INTAKE_SECURITY_FIELD_ENCRYPTION_KEY",
        ),
        entry(
            "security.otp_pepper",
            redact_secret(Some(&config.security.otp_pepper)),
            "INTAKE_SECURITY_OTP_PEPPER",
        ),
        entry(
            "security.sensitive_fields",
            config.security.sensitive_fields.join(","),
            "INTAKE_SECURITY_SENSITIVE_FIELDS",
        ),
        entry("security.dev_mode", config.security.dev_mode.to_string(), "INTAKE_SECURITY_DEV_MODE"),
        entry(
            "billing.api_key",
            redact_secret(config.billing.api_key.as_ref()),
            "INTAKE_BILLING_API_KEY",
        ),
        entry("billing.currency", config.billing.currency.clone(), "INTAKE_BILLING_CURRENCY"),
        entry(
            "storage.bucket",
            config.storage.bucket.clone().unwrap_or_else(unset),
            "INTAKE_STORAGE_BUCKET",
        ),
        entry("storage.region", config.storage.region.clone(), "INTAKE_STORAGE_REGION"),
        entry(
            "storage.secret_access_key",
            redact_secret(config.storage.secret_access_key.as_ref()),
            "INTAKE_STORAGE_SECRET_ACCESS_KEY",
        ),
        entry("server.bind_address", config.server.bind_address.clone(), "INTAKE_SERVER_BIND_ADDRESS"),
        entry("server.port", config.server.port.to_string(), "INTAKE_SERVER_PORT"),
        entry(
            "server.admin_base_url",
            config.server.admin_base_url.clone(),
            "INTAKE_SERVER_ADMIN_BASE_URL",
        ),
        entry(
            "server.admin_token",
            redact_secret(config.server.admin_token.as_ref()),
            "INTAKE_SERVER_ADMIN_TOKEN",
        ),
        entry("logging.level", config.logging.level.clone(), "INTAKE_LOGGING_LEVEL"),
        entry("logging.format", format!("{:?}", config.logging.format), "INTAKE_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("intake.toml"), PathBuf::from("config/intake.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn unset() -> String {
    "<unset>".to_string()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        Some(secret) if !secret.expose_secret().trim().is_empty() => "<redacted>".to_string(),
        Some(_) => "<empty>".to_string(),
        None => unset(),
    }
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

/// Keeps scheme and host; webhook paths are credentials.
fn redact_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or_default();
            format!("{scheme}://{host}/***")
        }
        None => "<redacted>".to_string(),
    }
}
