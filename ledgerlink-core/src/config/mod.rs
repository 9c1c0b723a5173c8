//! Configuration management for LedgerLink
//!
//! Everything a client flow needs lives in one explicit [`Config`]: wallet
//! location, identity names, channel and contract, session timeouts, the
//! evaluate retry policy and logging. Values come from defaults, a TOML
//! file, and `LEDGERLINK_<SECTION>_<KEY>` environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::gateway::{DiscoveryOptions, GatewayOptions};
use crate::logging::{LogConfig, LogLevel};
use crate::transport::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wallet: WalletConfig,
    pub identity: IdentityConfig,
    pub gateway: GatewayConfig,
    /// Evaluate retry policy
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
}

/// Credential store location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub path: PathBuf,

    /// Name of the environment variable holding the encryption password.
    /// Records are stored in plain JSON when unset.
    pub password_env: Option<String>,
}

/// Names and credentials used by enrollment and connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub msp_id: String,

    /// Wallet label of the admin identity
    pub admin_label: String,
    pub admin_enrollment_id: String,
    pub admin_secret: String,

    /// Wallet label and enrollment id of the application user
    pub user_id: String,
    pub affiliation: String,
    pub user_role: String,
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Connection profile (JSON)
    pub profile: Option<PathBuf>,
    pub channel: String,
    pub contract: String,
    pub discovery_enabled: bool,
    pub as_localhost: bool,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub endorse_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub submit_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub evaluate_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub commit_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./wallet"),
            password_env: None,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            msp_id: "Org1MSP".to_string(),
            admin_label: "admin".to_string(),
            admin_enrollment_id: "admin".to_string(),
            admin_secret: "adminpw".to_string(),
            user_id: "appUser".to_string(),
            affiliation: "org1.department1".to_string(),
            user_role: "client".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let session = GatewayOptions::default();
        Self {
            profile: None,
            channel: "mychannel".to_string(),
            contract: "voting".to_string(),
            discovery_enabled: session.discovery.enabled,
            as_localhost: session.discovery.as_localhost,
            connect_timeout: session.connect_timeout,
            endorse_timeout: session.endorse_timeout,
            submit_timeout: session.submit_timeout,
            evaluate_timeout: session.evaluate_timeout,
            commit_timeout: session.commit_timeout,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{}={}: {}", key, raw, e)))
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw.trim())
        .map_err(|e| ConfigError::InvalidValue(format!("{}={}: {}", key, raw, e)))
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: LEDGERLINK_<SECTION>_<KEY>
    /// Example: LEDGERLINK_GATEWAY_CHANNEL=mychannel
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEDGERLINK_*` overrides from `lookup` on top of `self`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, slot: &mut String| {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        };

        // Wallet
        if let Some(path) = lookup("LEDGERLINK_WALLET_PATH") {
            self.wallet.path = PathBuf::from(path);
        }
        if let Some(name) = lookup("LEDGERLINK_WALLET_PASSWORD_ENV") {
            self.wallet.password_env = Some(name).filter(|n| !n.is_empty());
        }

        // Identity
        text("LEDGERLINK_IDENTITY_MSP_ID", &mut self.identity.msp_id);
        text("LEDGERLINK_IDENTITY_ADMIN_LABEL", &mut self.identity.admin_label);
        text(
            "LEDGERLINK_IDENTITY_ADMIN_ENROLLMENT_ID",
            &mut self.identity.admin_enrollment_id,
        );
        text("LEDGERLINK_IDENTITY_ADMIN_SECRET", &mut self.identity.admin_secret);
        text("LEDGERLINK_IDENTITY_USER_ID", &mut self.identity.user_id);
        text("LEDGERLINK_IDENTITY_AFFILIATION", &mut self.identity.affiliation);
        text("LEDGERLINK_IDENTITY_USER_ROLE", &mut self.identity.user_role);

        // Gateway
        if let Some(path) = lookup("LEDGERLINK_GATEWAY_PROFILE") {
            self.gateway.profile = Some(PathBuf::from(path));
        }
        text("LEDGERLINK_GATEWAY_CHANNEL", &mut self.gateway.channel);
        text("LEDGERLINK_GATEWAY_CONTRACT", &mut self.gateway.contract);
        if let Some(raw) = lookup("LEDGERLINK_GATEWAY_DISCOVERY_ENABLED") {
            self.gateway.discovery_enabled = parse_value("LEDGERLINK_GATEWAY_DISCOVERY_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("LEDGERLINK_GATEWAY_AS_LOCALHOST") {
            self.gateway.as_localhost = parse_value("LEDGERLINK_GATEWAY_AS_LOCALHOST", &raw)?;
        }
        let timeouts = [
            ("LEDGERLINK_GATEWAY_CONNECT_TIMEOUT", &mut self.gateway.connect_timeout),
            ("LEDGERLINK_GATEWAY_ENDORSE_TIMEOUT", &mut self.gateway.endorse_timeout),
            ("LEDGERLINK_GATEWAY_SUBMIT_TIMEOUT", &mut self.gateway.submit_timeout),
            ("LEDGERLINK_GATEWAY_EVALUATE_TIMEOUT", &mut self.gateway.evaluate_timeout),
            ("LEDGERLINK_GATEWAY_COMMIT_TIMEOUT", &mut self.gateway.commit_timeout),
        ];
        for (key, slot) in timeouts {
            if let Some(raw) = lookup(key) {
                *slot = parse_duration(key, &raw)?;
            }
        }

        // Retry
        if let Some(raw) = lookup("LEDGERLINK_RETRY_MAX_RETRIES") {
            self.retry.max_retries = parse_value("LEDGERLINK_RETRY_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("LEDGERLINK_RETRY_INITIAL_BACKOFF_MS") {
            self.retry.initial_backoff_ms = parse_value("LEDGERLINK_RETRY_INITIAL_BACKOFF_MS", &raw)?;
        }
        if let Some(raw) = lookup("LEDGERLINK_RETRY_MAX_BACKOFF_MS") {
            self.retry.max_backoff_ms = parse_value("LEDGERLINK_RETRY_MAX_BACKOFF_MS", &raw)?;
        }

        // Logging
        text("LEDGERLINK_LOG_LEVEL", &mut self.logging.level);
        if let Some(raw) = lookup("LEDGERLINK_LOG_JSON") {
            self.logging.json_format = parse_value("LEDGERLINK_LOG_JSON", &raw)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("identity.msp_id", &self.identity.msp_id),
            ("identity.admin_label", &self.identity.admin_label),
            ("identity.user_id", &self.identity.user_id),
            ("gateway.channel", &self.gateway.channel),
            ("gateway.contract", &self.gateway.contract),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!("{} must not be empty", name)));
            }
        }

        if self.identity.admin_label == self.identity.user_id {
            return Err(ConfigError::ValidationFailed(
                "identity.user_id must differ from identity.admin_label".to_string(),
            ));
        }

        let timeouts = [
            ("gateway.connect_timeout", self.gateway.connect_timeout),
            ("gateway.endorse_timeout", self.gateway.endorse_timeout),
            ("gateway.submit_timeout", self.gateway.submit_timeout),
            ("gateway.evaluate_timeout", self.gateway.evaluate_timeout),
            ("gateway.commit_timeout", self.gateway.commit_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::ValidationFailed(
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms".to_string(),
            ));
        }

        if LogLevel::parse(&self.logging.level).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }

    /// Session options for [`crate::gateway::Gateway::connect`]
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            discovery: DiscoveryOptions {
                enabled: self.gateway.discovery_enabled,
                as_localhost: self.gateway.as_localhost,
            },
            connect_timeout: self.gateway.connect_timeout,
            endorse_timeout: self.gateway.endorse_timeout,
            submit_timeout: self.gateway.submit_timeout,
            evaluate_timeout: self.gateway.evaluate_timeout,
            commit_timeout: self.gateway.commit_timeout,
            retry: self.retry,
            ..GatewayOptions::default()
        }
    }

    /// Wallet password read from the configured environment variable
    pub fn wallet_password(&self) -> Result<Option<String>, ConfigError> {
        match &self.wallet.password_env {
            None => Ok(None),
            Some(name) => env::var(name).map(Some).map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "wallet password variable {} is not set",
                    name
                ))
            }),
        }
    }
}

impl LoggingConfig {
    pub fn log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::parse(&self.level).ok_or_else(|| {
            ConfigError::InvalidValue(format!("Invalid log level: {}", self.level))
        })?;
        Ok(LogConfig::new(level).json_format(self.json_format))
    }
}
