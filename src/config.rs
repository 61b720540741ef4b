//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.
//! Every variable has a development default so a bare checkout boots, and
//! production deployments are refused while known-insecure secrets are
//! still in place.

use std::fmt;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Default secrets that must never reach production.
const INSECURE_PASSWORDS: [&str; 4] = ["password123", "password", "admin", "secret"];
const INSECURE_JWT_SECRET: &str = "dev-secret-key-change-in-production";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    #[error("Insecure default values detected for: {}. Set real secrets before deploying to production.", .fields.join(", "))]
    InsecureDefaults { fields: Vec<String> },
}

/// Deployment environment the service runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl Environment {
    /// Case-insensitive parse. Anything unrecognized falls back to
    /// development rather than refusing to start.
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" => Environment::Development,
            "testing" => Environment::Testing,
            "production" => Environment::Production,
            other => {
                if !other.is_empty() {
                    warn!("Unrecognized APP_ENV '{}', falling back to development", raw);
                }
                Environment::Development
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete application settings.
///
/// Constructed once from the environment and shared read-only for the life
/// of the process; see [`get_settings`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub debug: bool,

    pub backend_host: String,
    pub backend_port: u16,

    pub frontend_port: u16,
    pub frontend_url: String,

    pub typedb_host: String,
    pub typedb_port: u16,
    pub typedb_database_name: String,
    pub typedb_admin_password: String,
    pub typedb_user_name: String,
    pub typedb_user_password: String,
    pub typedb_tls_enabled: bool,

    pub authentik_url: String,
    pub authentik_client_id: String,
    pub authentik_client_secret: String,
    pub authentik_issuer: String,
    pub authentik_app_slug: String,

    pub openai_api_key: Option<String>,
    pub jwt_secret_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            debug: true,
            backend_host: "0.0.0.0".to_string(),
            backend_port: 6616,
            frontend_port: 6166,
            frontend_url: "http://localhost:6166".to_string(),
            typedb_host: "127.0.0.1".to_string(),
            typedb_port: 8000,
            typedb_database_name: "graphwiki".to_string(),
            typedb_admin_password: "password123".to_string(),
            typedb_user_name: "admin".to_string(),
            typedb_user_password: "password123".to_string(),
            typedb_tls_enabled: false,
            authentik_url: "http://localhost:9000".to_string(),
            authentik_client_id: String::new(),
            authentik_client_secret: String::new(),
            authentik_issuer: "http://localhost:9000/application/o/graphwiki/".to_string(),
            authentik_app_slug: "graphwiki".to_string(),
            openai_api_key: None,
            jwt_secret_key: INSECURE_JWT_SECRET.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let defaults = Settings::default();

        let settings = Settings {
            environment: Environment::parse(&env_string("APP_ENV", "development")),
            debug: env_bool("DEBUG", defaults.debug)?,
            backend_host: env_string("BACKEND_HOST", &defaults.backend_host),
            backend_port: env_port("BACKEND_PORT", defaults.backend_port)?,
            frontend_port: env_port("FRONTEND_PORT", defaults.frontend_port)?,
            frontend_url: env_string("FRONTEND_URL", &defaults.frontend_url),
            typedb_host: env_string("TYPEDB_HOST", &defaults.typedb_host),
            typedb_port: env_port("TYPEDB_PORT", defaults.typedb_port)?,
            typedb_database_name: env_string(
                "TYPEDB_DATABASE_NAME",
                &defaults.typedb_database_name,
            ),
            typedb_admin_password: env_string(
                "TYPEDB_ADMIN_PASSWORD",
                &defaults.typedb_admin_password,
            ),
            typedb_user_name: env_string("TYPEDB_USER_NAME", &defaults.typedb_user_name),
            typedb_user_password: env_string(
                "TYPEDB_USER_PASSWORD",
                &defaults.typedb_user_password,
            ),
            typedb_tls_enabled: env_bool("TYPEDB_TLS_ENABLED", defaults.typedb_tls_enabled)?,
            authentik_url: env_string("AUTHENTIK_URL", &defaults.authentik_url),
            authentik_client_id: env_string("AUTHENTIK_CLIENT_ID", ""),
            authentik_client_secret: env_string("AUTHENTIK_CLIENT_SECRET", ""),
            authentik_issuer: env_string("AUTHENTIK_ISSUER", &defaults.authentik_issuer),
            authentik_app_slug: env_string("AUTHENTIK_APP_SLUG", &defaults.authentik_app_slug),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            jwt_secret_key: env_string("JWT_SECRET_KEY", &defaults.jwt_secret_key),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate URL-shaped fields and enforce the insecure-default policy.
    ///
    /// Production aborts while any secret still holds a known default; other
    /// environments log the same findings as a warning and continue.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_url("FRONTEND_URL", &self.frontend_url)?;
        validate_url("AUTHENTIK_URL", &self.authentik_url)?;

        let insecure = self.insecure_defaults();
        if !insecure.is_empty() {
            if self.is_production() {
                return Err(ConfigError::InsecureDefaults {
                    fields: insecure.iter().map(|field| field.to_string()).collect(),
                });
            }
            warn!(
                "Insecure default values in use for: {}. Change these before deploying to production.",
                insecure.join(", ")
            );
        }
        Ok(())
    }

    /// Secret-bearing fields still holding a publicly known default value,
    /// named by their environment variable.
    pub fn insecure_defaults(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if INSECURE_PASSWORDS.contains(&self.typedb_admin_password.as_str()) {
            fields.push("TYPEDB_ADMIN_PASSWORD");
        }
        if INSECURE_PASSWORDS.contains(&self.typedb_user_password.as_str()) {
            fields.push("TYPEDB_USER_PASSWORD");
        }
        if self.jwt_secret_key == INSECURE_JWT_SECRET {
            fields.push("JWT_SECRET_KEY");
        }
        fields
    }

    /// TypeDB server address as `host:port`.
    pub fn typedb_address(&self) -> String {
        format!("{}:{}", self.typedb_host, self.typedb_port)
    }

    /// Bind address for the HTTP server as `host:port`.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }

    /// Allowed CORS origins, deduplicated, with the configured frontend
    /// first. Development additionally allows any port on local loopback
    /// via the `http://127.0.0.1:*` entry.
    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins = vec![self.frontend_url.clone()];
        for origin in [
            format!("http://localhost:{}", self.frontend_port),
            "http://localhost:5173".to_string(), // Vite dev server
            "http://localhost:3000".to_string(),
        ] {
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }
        if self.is_development() {
            origins.push("http://127.0.0.1:*".to_string());
        }
        origins
    }

    /// JWKS endpoint of the Authentik application.
    #[allow(dead_code)]
    pub fn authentik_jwks_url(&self) -> String {
        format!(
            "{}/application/o/{}/jwks/",
            self.authentik_url.trim_end_matches('/'),
            self.authentik_app_slug
        )
    }

    /// OpenID Connect discovery document of the Authentik application.
    #[allow(dead_code)]
    pub fn authentik_openid_config_url(&self) -> String {
        format!(
            "{}/application/o/{}/.well-known/openid-configuration",
            self.authentik_url.trim_end_matches('/'),
            self.authentik_app_slug
        )
    }

    /// Whether the Authentik integration has usable credentials.
    pub fn is_authentik_configured(&self) -> bool {
        !self.authentik_client_id.is_empty() && !self.authentik_client_secret.is_empty()
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    #[allow(dead_code)]
    pub fn is_testing(&self) -> bool {
        self.environment == Environment::Testing
    }
}

fn env_string(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_bool(var: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => parse_bool(var, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            reason: format!("'{}' is not a boolean", raw),
        }),
    }
}

fn env_port(var: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => parse_port(var, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_port(var: &str, raw: &str) -> Result<u16, ConfigError> {
    let port: u32 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        reason: format!("'{}' is not a number", raw),
    })?;
    if !(1..=65535).contains(&port) {
        return Err(ConfigError::InvalidValue {
            var: var.to_string(),
            reason: format!("port {} is outside 1-65535", port),
        });
    }
    Ok(port as u16)
}

fn validate_url(var: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Ok(());
    }
    Url::parse(value).map_err(|error| ConfigError::InvalidValue {
        var: var.to_string(),
        reason: error.to_string(),
    })?;
    Ok(())
}

/// Process-wide settings cache. Construction runs at most once; concurrent
/// first callers serialize on the mutex and observe the same instance.
static SETTINGS: Lazy<Mutex<Option<Arc<Settings>>>> = Lazy::new(|| Mutex::new(None));

/// Shared settings instance, loaded from the environment on first call.
///
/// A failed load caches nothing, so the next caller retries.
pub fn get_settings() -> Result<Arc<Settings>, ConfigError> {
    let mut cache = SETTINGS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(settings) = cache.as_ref() {
        return Ok(Arc::clone(settings));
    }
    let settings = Arc::new(Settings::load()?);
    *cache = Some(Arc::clone(&settings));
    Ok(settings)
}

/// Drop the cached settings so the next [`get_settings`] reloads from the
/// environment. Intended for tests.
#[allow(dead_code)]
pub fn reset_settings_cache() {
    let mut cache = SETTINGS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *cache = None;
}
