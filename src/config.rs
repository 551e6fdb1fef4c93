use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 5000;
const CONFIG_DIR: &str = "config";
/// Seven days, matching the lifetime of a storefront login session.
const DEFAULT_JWT_EXPIRATION_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_CHAT_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_CHAT_MODEL: &str = "llama-3.3-70b-versatile";
const DEV_DEFAULT_JWT_SECRET: &str =
    "development_only_jwt_secret_for_the_shoe_shop_do_not_deploy_0123456789";

/// Settings for the chat assistant relay.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChatConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_chat_api_url")]
    #[validate(url)]
    pub api_url: String,

    /// Bearer key for the completion provider; the relay answers with the
    /// fallback reply when absent
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_chat_temperature")]
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f32,

    #[serde(default = "default_chat_max_tokens")]
    #[validate(range(min = 1, max = 8192))]
    pub max_tokens: u32,

    #[serde(default = "default_chat_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,

    /// Number of previous conversation turns forwarded upstream
    #[serde(default = "default_chat_history_limit")]
    #[validate(range(min = 0, max = 50))]
    pub history_limit: usize,

    /// Maximum number of catalog matches injected as context
    #[serde(default = "default_chat_search_limit")]
    #[validate(range(min = 1, max = 20))]
    pub search_limit: u64,

    /// Lower-case phrases that mark a message as being about the catalog
    #[serde(default = "default_product_keywords")]
    pub product_keywords: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: default_chat_api_url(),
            api_key: None,
            model: default_chat_model(),
            temperature: default_chat_temperature(),
            max_tokens: default_chat_max_tokens(),
            timeout_secs: default_chat_timeout_secs(),
            history_limit: default_chat_history_limit(),
            search_limit: default_chat_search_limit(),
            product_keywords: default_product_keywords(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT signing secret
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Lifetime of issued bearer tokens in seconds
    #[serde(default = "default_jwt_expiration")]
    #[validate(range(min = 60, max = 2_592_000))]
    pub jwt_expiration: u64,

    /// Issuer embedded in and required from bearer tokens
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Shared secret that unlocks the one-time bootstrap of the first admin.
    /// Bootstrap is disabled when unset.
    #[serde(default)]
    pub admin_secret: Option<String>,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB pool: connect timeout (secs)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// DB pool: idle timeout (secs)
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// DB pool: acquire timeout (secs)
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Directory receiving uploaded images; served under `/uploads`
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Public origin used to build absolute upload URLs. Relative URLs are
    /// returned when unset.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Per-file upload limit in bytes
    #[serde(default = "default_max_upload_bytes")]
    #[validate(range(min = 1024))]
    pub max_upload_bytes: usize,

    /// Chat relay settings
    #[serde(default)]
    #[validate]
    pub chat: ChatConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the
    /// connection, secret and listener settings.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: default_jwt_expiration(),
            auth_issuer: default_auth_issuer(),
            admin_secret: None,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            upload_dir: default_upload_dir(),
            public_base_url: None,
            max_upload_bytes: default_max_upload_bytes(),
            chat: ChatConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Public URL prefix for a stored upload
    pub fn upload_url(&self, file_name: &str) -> String {
        match self.public_base_url.as_deref() {
            Some(base) => format!("{}/uploads/{}", base.trim_end_matches('/'), file_name),
            None => format!("/uploads/{}", file_name),
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development".into(),
            );
            errors.add("jwt_secret", err);
        }

        if let Some(secret) = &self.admin_secret {
            if secret.trim().len() < 8 {
                let mut err = ValidationError::new("admin_secret_too_short");
                err.message = Some("admin_secret must be at least 8 characters".into());
                errors.add("admin_secret", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_jwt_expiration() -> u64 {
    DEFAULT_JWT_EXPIRATION_SECS
}
fn default_auth_issuer() -> String {
    "shoe-shop-api".to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_upload_dir() -> String {
    "uploads".to_string()
}
fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_chat_api_url() -> String {
    DEFAULT_CHAT_API_URL.to_string()
}
fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}
fn default_chat_temperature() -> f32 {
    0.7
}
fn default_chat_max_tokens() -> u32 {
    500
}
fn default_chat_timeout_secs() -> u64 {
    30
}
fn default_chat_history_limit() -> usize {
    10
}
fn default_chat_search_limit() -> u64 {
    5
}
fn default_product_keywords() -> Vec<String> {
    [
        "shoe", "shoes", "sneaker", "sandal", "adidas", "nike", "price", "how much", "buy",
        "available", "in stock", "giày", "giá", "bao nhiêu", "mua", "còn hàng",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = ["your-secret-key", "default-secret-key", "changeme"];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter.
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("shoe_shop_api={},tower_http=info,sqlx=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://shoe_shop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a secure random string.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod cors_validation_tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "super_secure_jwt_secret_that_is_long_enough_123".into(),
            "127.0.0.1".into(),
            5000,
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn dev_secret_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn short_admin_secret_rejected() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.admin_secret = Some("abc".into());
        assert!(cfg.validate_additional_constraints().is_err());
    }
}
