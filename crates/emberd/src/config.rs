//! Configuration file parsing and structures.
//!
//! emberd is configured from a TOML file. Secrets (OAuth client secret,
//! device-credential signing key) may instead be supplied through the
//! `EMBERD_CLIENT_SECRET` and `EMBERD_SIGNING_KEY` environment variables so
//! they can stay out of the file. A missing required key is a startup
//! failure, never a per-request error.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub oauth: OauthConfig,
    pub signing: SigningConfig,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL of this bridge. Used to build the OAuth
    /// redirect target, so it must match what the skill registered.
    pub base_url: String,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

#[derive(Debug, Deserialize)]
pub struct OauthConfig {
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Login-with-Amazon endpoints; overridable for test doubles.
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_profile_url")]
    pub profile_url: String,
}

fn default_authorize_url() -> String {
    "https://www.amazon.com/ap/oa".to_string()
}

fn default_token_url() -> String {
    "https://api.amazon.com/auth/o2/token".to_string()
}

fn default_profile_url() -> String {
    "https://api.amazon.com/user/profile".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SigningConfig {
    /// Key material for minting device-agent credentials.
    #[serde(default)]
    pub key: String,

    /// Versioned key id stamped into each credential header.
    pub key_id: String,

    /// Credential lifetime in seconds.
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl_secs: u64,
}

fn default_credential_ttl() -> u64 {
    60
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let mut config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for secrets.
    fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var("EMBERD_CLIENT_SECRET") {
            self.oauth.client_secret = secret;
        }
        if let Ok(key) = std::env::var("EMBERD_SIGNING_KEY") {
            self.signing.key = key;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("server.base_url", &self.server.base_url),
            ("oauth.client_id", &self.oauth.client_id),
            ("oauth.client_secret", &self.oauth.client_secret),
            ("signing.key", &self.signing.key),
            ("signing.key_id", &self.signing.key_id),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(ConfigError::MissingKey(name));
            }
        }
        Ok(())
    }

    /// The redirect target registered with the identity provider.
    pub fn redirect_uri(&self) -> String {
        format!("{}/v1/link", self.server.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required config key: {0}")]
    MissingKey(&'static str),
}
