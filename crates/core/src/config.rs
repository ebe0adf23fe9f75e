use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on webhook delivery attempts per dispatch.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub security: SecurityConfig,
    pub billing: BillingConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub webhook_url: Option<SecretString>,
    pub bot_token: Option<SecretString>,
    pub request_channel: Option<String>,
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub field_encryption_key: SecretString,
    pub otp_pepper: SecretString,
    pub sensitive_fields: Vec<String>,
    pub otp_ttl_secs: u64,
    pub otp_max_attempts: u32,
    pub session_ttl_secs: u64,
    pub dev_mode: bool,
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub currency: String,
    pub days_until_due: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<SecretString>,
    pub public_base_url: Option<String>,
    pub max_upload_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub url_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub admin_base_url: String,
    pub admin_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_tracked_keys: usize,
    pub conversation_create: u32,
    pub conversation_message: u32,
    pub otp_request: u32,
    pub otp_verify: u32,
    pub request_create: u32,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub urgent_values: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub field_encryption_key: Option<String>,
    pub otp_pepper: Option<String>,
    pub dev_mode: Option<bool>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://intake.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig {
                webhook_url: None,
                bot_token: None,
                request_channel: None,
                api_base_url: "https://slack.com/api".to_string(),
                timeout_secs: 10,
                max_attempts: MAX_DELIVERY_ATTEMPTS,
                base_delay_ms: 500,
                max_delay_ms: 5_000,
            },
            security: SecurityConfig {
                field_encryption_key: String::new().into(),
                otp_pepper: String::new().into(),
                sensitive_fields: vec!["email".to_string(), "phone".to_string()],
                otp_ttl_secs: 600,
                otp_max_attempts: 5,
                session_ttl_secs: 7 * 24 * 60 * 60,
                dev_mode: false,
            },
            billing: BillingConfig {
                api_key: None,
                base_url: "https://api.stripe.com/v1".to_string(),
                currency: "usd".to_string(),
                days_until_due: 14,
                timeout_secs: 15,
            },
            storage: StorageConfig {
                bucket: None,
                region: "us-east-1".to_string(),
                endpoint: None,
                access_key_id: None,
                secret_access_key: None,
                public_base_url: None,
                max_upload_bytes: 25 * 1024 * 1024,
                allowed_content_types: [
                    "image/png",
                    "image/jpeg",
                    "image/gif",
                    "application/pdf",
                    "text/plain",
                    "text/csv",
                ]
                .into_iter()
                .map(str::to_string)
                .collect(),
                url_ttl_secs: 900,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                admin_base_url: "http://localhost:3000".to_string(),
                admin_token: None,
            },
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_tracked_keys: 10_000,
                conversation_create: 10,
                conversation_message: 60,
                otp_request: 5,
                otp_verify: 10,
                request_create: 20,
            },
            pipeline: PipelineConfig {
                urgent_values: vec!["urgent".to_string(), "asap".to_string()],
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("intake.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(webhook_url) = slack.webhook_url {
                self.slack.webhook_url = Some(secret_value(webhook_url));
            }
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = Some(secret_value(bot_token));
            }
            if let Some(request_channel) = slack.request_channel {
                self.slack.request_channel = Some(request_channel);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = slack.timeout_secs {
                self.slack.timeout_secs = timeout_secs;
            }
            if let Some(max_attempts) = slack.max_attempts {
                self.slack.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = slack.base_delay_ms {
                self.slack.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = slack.max_delay_ms {
                self.slack.max_delay_ms = max_delay_ms;
            }
        }

        if let Some(security) = patch.security {
            if let Some(key) = security.field_encryption_key {
                self.security.field_encryption_key = secret_value(key);
            }
            if let Some(pepper) = security.otp_pepper {
                self.security.otp_pepper = secret_value(pepper);
            }
            if let Some(sensitive_fields) = security.sensitive_fields {
                self.security.sensitive_fields = sensitive_fields;
            }
            if let Some(otp_ttl_secs) = security.otp_ttl_secs {
                self.security.otp_ttl_secs = otp_ttl_secs;
            }
            if let Some(otp_max_attempts) = security.otp_max_attempts {
                self.security.otp_max_attempts = otp_max_attempts;
            }
            if let Some(session_ttl_secs) = security.session_ttl_secs {
                self.security.session_ttl_secs = session_ttl_secs;
            }
            if let Some(dev_mode) = security.dev_mode {
                self.security.dev_mode = dev_mode;
            }
        }

        if let Some(billing) = patch.billing {
            if let Some(api_key) = billing.api_key {
                self.billing.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = billing.base_url {
                self.billing.base_url = base_url;
            }
            if let Some(currency) = billing.currency {
                self.billing.currency = currency;
            }
            if let Some(days_until_due) = billing.days_until_due {
                self.billing.days_until_due = days_until_due;
            }
            if let Some(timeout_secs) = billing.timeout_secs {
                self.billing.timeout_secs = timeout_secs;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(bucket) = storage.bucket {
                self.storage.bucket = Some(bucket);
            }
            if let Some(region) = storage.region {
                self.storage.region = region;
            }
            if let Some(endpoint) = storage.endpoint {
                self.storage.endpoint = Some(endpoint);
            }
            if let Some(access_key_id) = storage.access_key_id {
                self.storage.access_key_id = Some(access_key_id);
            }
            if let Some(secret_access_key) = storage.secret_access_key {
                self.storage.secret_access_key = Some(secret_value(secret_access_key));
            }
            if let Some(public_base_url) = storage.public_base_url {
                self.storage.public_base_url = Some(public_base_url);
            }
            if let Some(max_upload_bytes) = storage.max_upload_bytes {
                self.storage.max_upload_bytes = max_upload_bytes;
            }
            if let Some(allowed_content_types) = storage.allowed_content_types {
                self.storage.allowed_content_types = allowed_content_types;
            }
            if let Some(url_ttl_secs) = storage.url_ttl_secs {
                self.storage.url_ttl_secs = url_ttl_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(admin_base_url) = server.admin_base_url {
                self.server.admin_base_url = admin_base_url;
            }
            if let Some(admin_token) = server.admin_token {
                self.server.admin_token = Some(secret_value(admin_token));
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(window_secs) = rate_limit.window_secs {
                self.rate_limit.window_secs = window_secs;
            }
            if let Some(max_tracked_keys) = rate_limit.max_tracked_keys {
                self.rate_limit.max_tracked_keys = max_tracked_keys;
            }
            if let Some(limit) = rate_limit.conversation_create {
                self.rate_limit.conversation_create = limit;
            }
            if let Some(limit) = rate_limit.conversation_message {
                self.rate_limit.conversation_message = limit;
            }
            if let Some(limit) = rate_limit.otp_request {
                self.rate_limit.otp_request = limit;
            }
            if let Some(limit) = rate_limit.otp_verify {
                self.rate_limit.otp_verify = limit;
            }
            if let Some(limit) = rate_limit.request_create {
                self.rate_limit.request_create = limit;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(urgent_values) = pipeline.urgent_values {
                self.pipeline.urgent_values = urgent_values;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("INTAKE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("INTAKE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("INTAKE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("INTAKE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("INTAKE_SLACK_WEBHOOK_URL") {
            self.slack.webhook_url = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTAKE_SLACK_BOT_TOKEN") {
            self.slack.bot_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTAKE_SLACK_REQUEST_CHANNEL") {
            self.slack.request_channel = Some(value);
        }
        if let Some(value) = read_env("INTAKE_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("INTAKE_SLACK_MAX_ATTEMPTS") {
            self.slack.max_attempts = parse_u32("INTAKE_SLACK_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_SLACK_BASE_DELAY_MS") {
            self.slack.base_delay_ms = parse_u64("INTAKE_SLACK_BASE_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("INTAKE_SECURITY_FIELD_ENCRYPTION_KEY") {
            self.security.field_encryption_key = secret_value(value);
        }
        if let Some(value) = read_env("INTAKE_SECURITY_OTP_PEPPER") {
            self.security.otp_pepper = secret_value(value);
        }
        if let Some(value) = read_env("INTAKE_SECURITY_SENSITIVE_FIELDS") {
            self.security.sensitive_fields = parse_list(&value);
        }
        if let Some(value) = read_env("INTAKE_SECURITY_OTP_TTL_SECS") {
            self.security.otp_ttl_secs = parse_u64("INTAKE_SECURITY_OTP_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_SECURITY_OTP_MAX_ATTEMPTS") {
            self.security.otp_max_attempts =
                parse_u32("INTAKE_SECURITY_OTP_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_SECURITY_SESSION_TTL_SECS") {
            self.security.session_ttl_secs =
                parse_u64("INTAKE_SECURITY_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_SECURITY_DEV_MODE") {
            self.security.dev_mode = parse_bool("INTAKE_SECURITY_DEV_MODE", &value)?;
        }

        if let Some(value) = read_env("INTAKE_BILLING_API_KEY") {
            self.billing.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTAKE_BILLING_BASE_URL") {
            self.billing.base_url = value;
        }
        if let Some(value) = read_env("INTAKE_BILLING_CURRENCY") {
            self.billing.currency = value;
        }
        if let Some(value) = read_env("INTAKE_BILLING_DAYS_UNTIL_DUE") {
            self.billing.days_until_due = parse_u32("INTAKE_BILLING_DAYS_UNTIL_DUE", &value)?;
        }

        if let Some(value) = read_env("INTAKE_STORAGE_BUCKET") {
            self.storage.bucket = Some(value);
        }
        if let Some(value) = read_env("INTAKE_STORAGE_REGION") {
            self.storage.region = value;
        }
        if let Some(value) = read_env("INTAKE_STORAGE_ENDPOINT") {
            self.storage.endpoint = Some(value);
        }
        if let Some(value) = read_env("INTAKE_STORAGE_ACCESS_KEY_ID") {
            self.storage.access_key_id = Some(value);
        }
        if let Some(value) = read_env("INTAKE_STORAGE_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTAKE_STORAGE_PUBLIC_BASE_URL") {
            self.storage.public_base_url = Some(value);
        }
        if let Some(value) = read_env("INTAKE_STORAGE_MAX_UPLOAD_BYTES") {
            self.storage.max_upload_bytes = parse_u64("INTAKE_STORAGE_MAX_UPLOAD_BYTES", &value)?;
        }

        if let Some(value) = read_env("INTAKE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("INTAKE_SERVER_PORT") {
            self.server.port = parse_u16("INTAKE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("INTAKE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("INTAKE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_SERVER_ADMIN_BASE_URL") {
            self.server.admin_base_url = value;
        }
        if let Some(value) = read_env("INTAKE_SERVER_ADMIN_TOKEN") {
            self.server.admin_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("INTAKE_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_u64("INTAKE_RATE_LIMIT_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("INTAKE_PIPELINE_URGENT_VALUES") {
            self.pipeline.urgent_values = parse_list(&value);
        }

        let log_level = read_env("INTAKE_LOGGING_LEVEL").or_else(|| read_env("INTAKE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("INTAKE_LOGGING_FORMAT").or_else(|| read_env("INTAKE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(webhook_url) = overrides.slack_webhook_url {
            self.slack.webhook_url = Some(secret_value(webhook_url));
        }
        if let Some(key) = overrides.field_encryption_key {
            self.security.field_encryption_key = secret_value(key);
        }
        if let Some(pepper) = overrides.otp_pepper {
            self.security.otp_pepper = secret_value(pepper);
        }
        if let Some(dev_mode) = overrides.dev_mode {
            self.security.dev_mode = dev_mode;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_security(&self.security)?;
        validate_billing(&self.billing)?;
        validate_storage(&self.storage)?;
        validate_server(&self.server)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

impl SlackConfig {
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url
            .as_ref()
            .map(|value| value.expose_secret())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn bot_token(&self) -> Option<&str> {
        self.bot_token
            .as_ref()
            .map(|value| value.expose_secret())
            .filter(|value| !value.trim().is_empty())
    }
}

impl SecurityConfig {
    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive_fields.iter().any(|candidate| candidate == field)
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("intake.toml"), PathBuf::from("config/intake.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    if let Some(webhook_url) = slack.webhook_url() {
        if !is_http_url(webhook_url) {
            return Err(ConfigError::Validation(
                "slack.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if let Some(bot_token) = slack.bot_token() {
        if !bot_token.starts_with("xoxb-") {
            return Err(ConfigError::Validation(
                "slack.bot_token must start with `xoxb-`. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions".to_string(),
            ));
        }
    }

    if !(1..=MAX_DELIVERY_ATTEMPTS).contains(&slack.max_attempts) {
        return Err(ConfigError::Validation(
            format!("slack.max_attempts must be in range 1..={MAX_DELIVERY_ATTEMPTS}"),
        ));
    }

    if slack.timeout_secs == 0 || slack.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "slack.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_security(security: &SecurityConfig) -> Result<(), ConfigError> {
    if security.field_encryption_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "security.field_encryption_key is required (set INTAKE_SECURITY_FIELD_ENCRYPTION_KEY)"
                .to_string(),
        ));
    }

    if security.otp_pepper.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "security.otp_pepper is required (set INTAKE_SECURITY_OTP_PEPPER)".to_string(),
        ));
    }

    if security.otp_max_attempts == 0 {
        return Err(ConfigError::Validation(
            "security.otp_max_attempts must be greater than zero".to_string(),
        ));
    }

    if security.otp_ttl_secs == 0 || security.session_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "security.otp_ttl_secs and security.session_ttl_secs must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_billing(billing: &BillingConfig) -> Result<(), ConfigError> {
    if !is_http_url(&billing.base_url) {
        return Err(ConfigError::Validation(
            "billing.base_url must start with http:// or https://".to_string(),
        ));
    }

    if billing.days_until_due == 0 {
        return Err(ConfigError::Validation(
            "billing.days_until_due must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.max_upload_bytes == 0 {
        return Err(ConfigError::Validation(
            "storage.max_upload_bytes must be greater than zero".to_string(),
        ));
    }

    if storage.allowed_content_types.is_empty() {
        return Err(ConfigError::Validation(
            "storage.allowed_content_types must not be empty".to_string(),
        ));
    }

    // SigV4 presigned URLs are valid for at most seven days.
    if storage.url_ttl_secs == 0 || storage.url_ttl_secs > 604_800 {
        return Err(ConfigError::Validation(
            "storage.url_ttl_secs must be in range 1..=604800".to_string(),
        ));
    }

    if let Some(endpoint) = &storage.endpoint {
        if !is_http_url(endpoint) {
            return Err(ConfigError::Validation(
                "storage.endpoint must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if !is_http_url(&server.admin_base_url) {
        return Err(ConfigError::Validation(
            "server.admin_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if rate_limit.window_secs == 0 || rate_limit.max_tracked_keys == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.window_secs and rate_limit.max_tracked_keys must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    security: Option<SecurityPatch>,
    billing: Option<BillingPatch>,
    storage: Option<StoragePatch>,
    server: Option<ServerPatch>,
    rate_limit: Option<RateLimitPatch>,
    pipeline: Option<PipelinePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    webhook_url: Option<String>,
    bot_token: Option<String>,
    request_channel: Option<String>,
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    field_encryption_key: Option<String>,
    otp_pepper: Option<String>,
    sensitive_fields: Option<Vec<String>>,
    otp_ttl_secs: Option<u64>,
    otp_max_attempts: Option<u32>,
    session_ttl_secs: Option<u64>,
    dev_mode: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    currency: Option<String>,
    days_until_due: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    bucket: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    public_base_url: Option<String>,
    max_upload_bytes: Option<u64>,
    allowed_content_types: Option<Vec<String>>,
    url_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    admin_base_url: Option<String>,
    admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    window_secs: Option<u64>,
    max_tracked_keys: Option<usize>,
    conversation_create: Option<u32>,
    conversation_message: Option<u32>,
    otp_request: Option<u32>,
    otp_verify: Option<u32>,
    request_create: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    urgent_values: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
