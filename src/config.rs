// src/config.rs

//! Manages configuration: loading, resolving `$ENV` indirections, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Selects which concrete shared-store backend the components are built on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redis,
    Memory,
}

/// Connection settings for the Redis-compatible shared store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RedisConfig {
    /// A `redis://` or `rediss://` URL, or `$NAME` to read it from the environment.
    pub url: Option<String>,
    /// Verify the server certificate and host name on `rediss://` connections.
    #[serde(default = "default_ssl_verify_cert")]
    pub ssl_verify_cert: bool,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            ssl_verify_cert: default_ssl_verify_cert(),
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl RedisConfig {
    /// The store URL with a `$NAME` reference looked up once in the
    /// environment. The variable's value is used as is.
    pub fn resolved_url(&self) -> Result<Option<String>> {
        self.url
            .as_deref()
            .map(|url| resolve_env_reference(url.trim()))
            .transpose()
    }
}

fn default_ssl_verify_cert() -> bool {
    true
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Channel names and timing for the engine command request/reply exchange.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageBusConfig {
    #[serde(default = "default_request_channel")]
    pub request_channel: String,
    #[serde(default = "default_response_channel")]
    pub response_channel: String,
    #[serde(with = "humantime_serde", default = "default_reply_timeout")]
    pub reply_timeout: Duration,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            request_channel: default_request_channel(),
            response_channel: default_response_channel(),
            reply_timeout: default_reply_timeout(),
        }
    }
}

fn default_request_channel() -> String {
    "moonship.message.request".to_string()
}
fn default_response_channel() -> String {
    "moonship.message.response".to_string()
}
fn default_reply_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SessionConfig {
    /// Sliding idle expiry. Sessions never expire when unset.
    #[serde(with = "humantime_serde", default)]
    pub idle_expiry: Option<Duration>,
}

/// A raw representation of the config file before resolution and validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    backend: Backend,
    #[serde(default)]
    redis: RedisConfig,
    #[serde(default)]
    message_bus: MessageBusConfig,
    #[serde(default)]
    session: SessionConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, resolved and validated configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub backend: Backend,
    pub redis: RedisConfig,
    pub message_bus: MessageBusConfig,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backend: Backend::default(),
            redis: RedisConfig::default(),
            message_bus: MessageBusConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{}'", path.display()))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            log_level: raw_config.log_level,
            backend: raw_config.backend,
            redis: raw_config.redis,
            message_bus: raw_config.message_bus,
            session: raw_config.session,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration. Address details are checked again, more
    /// strictly, when the store connector is built.
    fn validate(&self) -> Result<()> {
        if self.backend == Backend::Redis {
            match self.redis.resolved_url()? {
                Some(url) if !url.trim().is_empty() => {}
                _ => return Err(anyhow!("redis.url must be set when backend is \"redis\"")),
            }
        }
        if self.message_bus.request_channel.trim().is_empty() {
            return Err(anyhow!("message_bus.request_channel cannot be empty"));
        }
        if self.message_bus.response_channel.trim().is_empty() {
            return Err(anyhow!("message_bus.response_channel cannot be empty"));
        }
        if self.message_bus.request_channel == self.message_bus.response_channel {
            return Err(anyhow!(
                "message_bus.request_channel and message_bus.response_channel must differ"
            ));
        }
        if self.message_bus.reply_timeout.is_zero() {
            return Err(anyhow!("message_bus.reply_timeout cannot be 0"));
        }
        if let Some(expiry) = self.session.idle_expiry {
            if expiry.as_millis() == 0 {
                return Err(anyhow!("session.idle_expiry must be at least 1ms"));
            }
            if expiry < Duration::from_secs(60) {
                warn!(
                    "session.idle_expiry is very short ({:?}); users will be logged out quickly.",
                    expiry
                );
            }
        }
        if !self.redis.ssl_verify_cert {
            warn!("redis.ssl_verify_cert is disabled; TLS peers will not be authenticated.");
        }
        Ok(())
    }
}

/// Resolves a `$NAME` value from the environment, passing other values through.
pub fn resolve_env_reference(value: &str) -> Result<String> {
    match value.strip_prefix('$') {
        Some(name) if !name.is_empty() => {
            std::env::var(name).map_err(|_| anyhow!("No {name} environment variable set"))
        }
        _ => Ok(value.to_string()),
    }
}
