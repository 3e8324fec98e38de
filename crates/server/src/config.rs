use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Bearer credential for the `/admin` API.
    pub admin_api_key: String,
    pub oauth2: OAuth2Config,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// Issuer identifier, also the base URL of every endpoint
    pub issuer_url: String,
    /// Audience placed in access tokens. Defaults to `<issuer>/api`.
    #[serde(default)]
    pub resource_audience: Option<String>,
    /// PEM-encoded RSA private key. An ephemeral key is generated when unset.
    #[serde(default)]
    pub signing_key_path: Option<String>,
    #[serde(default = "default_signing_key_id")]
    pub signing_key_id: String,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    #[serde(default = "default_id_token_lifetime")]
    pub id_token_lifetime: i64,
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: i64,
    /// Seconds between sweeps of expired codes, sessions and refresh tokens
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

impl OAuth2Config {
    /// Config with every optional field at its default.
    pub fn new(issuer_url: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            resource_audience: None,
            signing_key_path: None,
            signing_key_id: default_signing_key_id(),
            access_token_lifetime: default_access_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            id_token_lifetime: default_id_token_lifetime(),
            authorization_code_lifetime: default_authorization_code_lifetime(),
            session_lifetime: default_session_lifetime(),
            cleanup_interval: default_cleanup_interval(),
            secure_cookies: default_secure_cookies(),
        }
    }

    pub fn resource_audience(&self) -> String {
        self.resource_audience
            .clone()
            .unwrap_or_else(|| format!("{}/api", self.issuer_url))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = url::Url::parse(&self.issuer_url)
            .map_err(|e| ConfigError::Validation(format!("oauth2.issuer_url is invalid: {e}")))?;
        if !matches!(issuer.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "oauth2.issuer_url must use http or https".into(),
            ));
        }
        if self.issuer_url.ends_with('/') {
            return Err(ConfigError::Validation(
                "oauth2.issuer_url must not end with '/'".into(),
            ));
        }
        for (name, value) in [
            ("access_token_lifetime", self.access_token_lifetime),
            ("refresh_token_lifetime", self.refresh_token_lifetime),
            ("id_token_lifetime", self.id_token_lifetime),
            ("authorization_code_lifetime", self.authorization_code_lifetime),
            ("session_lifetime", self.session_lifetime),
        ] {
            if value <= 0 {
                return Err(ConfigError::Validation(format!(
                    "oauth2.{name} must be > 0"
                )));
            }
        }
        if self.cleanup_interval == 0 {
            return Err(ConfigError::Validation(
                "oauth2.cleanup_interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_signing_key_id() -> String {
    "default".to_string()
}

fn default_access_token_lifetime() -> i64 {
    900 // 15 minutes
}

fn default_refresh_token_lifetime() -> i64 {
    86400 * 30 // 30 days
}

fn default_id_token_lifetime() -> i64 {
    3600 // 1 hour
}

fn default_authorization_code_lifetime() -> i64 {
    60
}

fn default_session_lifetime() -> i64 {
    86400
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_api_key.len() < 32 {
            return Err(ConfigError::Validation(
                "admin_api_key must be at least 32 characters".into(),
            ));
        }
        self.oauth2.validate()
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `OAUTH2__ISSUER_URL`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
