//! Rollover Configuration
//!
//! Policy tunables and key-management API settings for one invocation.
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `AEGIS_ROLLOVER_*` environment variables. The binary applies command-line
//! overrides last and hands the frozen result to every component.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use super::{DnssecAlgorithm, KeyAlgorithm, KeyType, RolloverError};

pub const ENV_INTERVAL_DAYS: &str = "AEGIS_ROLLOVER_INTERVAL_DAYS";
pub const ENV_HOLD_DAYS: &str = "AEGIS_ROLLOVER_HOLD_DAYS";
pub const ENV_DELETE_GRACE_DAYS: &str = "AEGIS_ROLLOVER_DELETE_GRACE_DAYS";
pub const ENV_DEFAULT_ALGORITHM: &str = "AEGIS_ROLLOVER_DEFAULT_ALGORITHM";
pub const ENV_DEFAULT_KEYTYPE: &str = "AEGIS_ROLLOVER_DEFAULT_KEYTYPE";
pub const ENV_RSA_BITS: &str = "AEGIS_ROLLOVER_RSA_BITS";
pub const ENV_API_URL: &str = "AEGIS_ROLLOVER_API_URL";
pub const ENV_API_KEY: &str = "AEGIS_ROLLOVER_API_KEY";
pub const ENV_SERVER_ID: &str = "AEGIS_ROLLOVER_SERVER_ID";
pub const ENV_API_TIMEOUT_SECS: &str = "AEGIS_ROLLOVER_API_TIMEOUT_SECS";
pub const ENV_DATABASE: &str = "AEGIS_ROLLOVER_DB";

/// Rollover policy tunables, immutable for the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyParameters {
    /// Days between completed rollovers (default: 90)
    pub rollover_interval_days: i64,

    /// Days a new key is published before the old one is deactivated (default: 7)
    pub hold_period_days: i64,

    /// Days a deactivated key is kept before deletion (default: 7)
    pub deletion_grace_days: i64,

    /// Algorithm used when a zone has no key to infer from
    pub default_algorithm: KeyAlgorithm,

    /// Keytype used when a zone has no key to infer from
    pub default_keytype: KeyType,

    /// Key size requested for RSA algorithms
    pub rsa_bits: u32,
}

impl Default for PolicyParameters {
    fn default() -> Self {
        Self {
            rollover_interval_days: 90,
            hold_period_days: 7,
            deletion_grace_days: 7,
            default_algorithm: KeyAlgorithm::Known(DnssecAlgorithm::EcdsaP256Sha256),
            default_keytype: KeyType::Csk,
            rsa_bits: 2048,
        }
    }
}

impl PolicyParameters {
    /// Validate the policy
    pub fn validate(&self) -> Result<(), RolloverError> {
        if self.rollover_interval_days <= 0 {
            return Err(RolloverError::ConfigError(
                "rollover_interval_days must be > 0".to_string(),
            ));
        }

        if self.hold_period_days < 0 {
            return Err(RolloverError::ConfigError(
                "hold_period_days must be >= 0".to_string(),
            ));
        }

        if self.deletion_grace_days < 0 {
            return Err(RolloverError::ConfigError(
                "deletion_grace_days must be >= 0".to_string(),
            ));
        }

        if let KeyAlgorithm::Other(num) = self.default_algorithm {
            return Err(RolloverError::ConfigError(format!(
                "default_algorithm ALG{} is not a supported signing algorithm",
                num
            )));
        }

        if !(1024..=4096).contains(&self.rsa_bits) {
            return Err(RolloverError::ConfigError(
                "rsa_bits must be between 1024 and 4096".to_string(),
            ));
        }

        Ok(())
    }
}

/// Key-management API connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiClientConfig {
    /// Base URL of the DNS server's HTTP API
    pub url: Option<String>,

    /// API key sent in the `X-API-Key` header
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Server id path segment (default: localhost)
    pub server_id: String,

    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            server_id: "localhost".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Complete configuration of one rollover invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloverConfig {
    /// SQLite database holding zones, keys, markers and the audit log
    pub database_path: PathBuf,

    /// Rollover policy
    pub policy: PolicyParameters,

    /// Key-management API
    pub api: ApiClientConfig,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/dns/rollover.db"),
            policy: PolicyParameters::default(),
            api: ApiClientConfig::default(),
        }
    }
}

impl RolloverConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file content
    pub fn from_toml(content: &str) -> Result<Self, RolloverError> {
        toml::from_str(content)
            .map_err(|e| RolloverError::ConfigError(format!("TOML parse error: {}", e)))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, RolloverError> {
        toml::to_string_pretty(self)
            .map_err(|e| RolloverError::ConfigError(format!("TOML serialize error: {}", e)))
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), RolloverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_INTERVAL_DAYS) {
            self.policy.rollover_interval_days = parse_env(ENV_INTERVAL_DAYS, &v)?;
        }
        if let Some(v) = get(ENV_HOLD_DAYS) {
            self.policy.hold_period_days = parse_env(ENV_HOLD_DAYS, &v)?;
        }
        if let Some(v) = get(ENV_DELETE_GRACE_DAYS) {
            self.policy.deletion_grace_days = parse_env(ENV_DELETE_GRACE_DAYS, &v)?;
        }
        if let Some(v) = get(ENV_DEFAULT_ALGORITHM) {
            self.policy.default_algorithm = parse_env(ENV_DEFAULT_ALGORITHM, &v)?;
        }
        if let Some(v) = get(ENV_DEFAULT_KEYTYPE) {
            self.policy.default_keytype = parse_env(ENV_DEFAULT_KEYTYPE, &v)?;
        }
        if let Some(v) = get(ENV_RSA_BITS) {
            self.policy.rsa_bits = parse_env(ENV_RSA_BITS, &v)?;
        }
        if let Some(v) = get(ENV_API_URL) {
            self.api.url = Some(v.trim().to_string());
        }
        if let Some(v) = get(ENV_API_KEY) {
            self.api.api_key = Some(v);
        }
        if let Some(v) = get(ENV_SERVER_ID) {
            self.api.server_id = v.trim().to_string();
        }
        if let Some(v) = get(ENV_API_TIMEOUT_SECS) {
            self.api.timeout_secs = parse_env(ENV_API_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(ENV_DATABASE) {
            self.database_path = PathBuf::from(v.trim());
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RolloverError> {
        self.policy.validate()?;

        if self.api.server_id.is_empty() {
            return Err(RolloverError::ConfigError(
                "api.server_id must not be empty".to_string(),
            ));
        }

        if self.api.timeout_secs == 0 {
            return Err(RolloverError::ConfigError(
                "api.timeout_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, RolloverError>
where
    T: FromStr,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|_| RolloverError::ConfigError(format!("{} has invalid value {:?}", name, value)))
}
