//! Client configuration and its loaders.
//!
//! # Design
//! `ClientConfig` is plain data handed to `ConnectionPool::new` and
//! `Transport::new`; neither reads the environment or the filesystem. The
//! loaders at the bottom of this module are the only place that does, so
//! embedding applications can build the struct however they like.
//!
//! ## Environment variables
//! - `ONEVIEW_HOST` (required): appliance address, with or without scheme
//! - `ONEVIEW_TOKEN`: session token sent in the `Auth` header
//! - `ONEVIEW_API_VERSION`: e.g. `300`
//! - `ONEVIEW_MAX_CONNECTIONS`: pool limit, applied in aggregate and per host
//! - `ONEVIEW_READ_TIMEOUT`: read timeout in seconds
//! - `ONEVIEW_DOWNLOAD_DIR`: directory for octet-stream downloads
//! - `ONEVIEW_POLL_INTERVAL_MS`: task polling interval
//! - `ONEVIEW_WARNING_POLICY`: `fail` or `succeed`

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};
use crate::task::{WarningPolicy, DEFAULT_POLL_INTERVAL};

/// Connect timeout for every call.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// REST API version sent in `X-Api-Version`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ApiVersion {
    V120,
    V200,
    V201,
    #[default]
    V300,
    V500,
    V600,
    V800,
}

impl ApiVersion {
    const ALL: [ApiVersion; 7] = [
        ApiVersion::V120,
        ApiVersion::V200,
        ApiVersion::V201,
        ApiVersion::V300,
        ApiVersion::V500,
        ApiVersion::V600,
        ApiVersion::V800,
    ];

    pub fn value(self) -> u32 {
        match self {
            ApiVersion::V120 => 120,
            ApiVersion::V200 => 200,
            ApiVersion::V201 => 201,
            ApiVersion::V300 => 300,
            ApiVersion::V500 => 500,
            ApiVersion::V600 => 600,
            ApiVersion::V800 => 800,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.value() == value)
    }
}

impl TryFrom<u32> for ApiVersion {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        ApiVersion::from_value(value).ok_or_else(|| format!("unsupported API version {value}"))
    }
}

impl From<ApiVersion> for u32 {
    fn from(version: ApiVersion) -> Self {
        version.value()
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Everything the transport needs to talk to one appliance.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub auth_token: Option<String>,
    pub api_version: ApiVersion,
    pub max_connections: usize,
    pub max_connections_per_host: usize,
    pub read_timeout_secs: u64,
    pub download_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub warning_policy: WarningPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            auth_token: None,
            api_version: ApiVersion::default(),
            max_connections: 20,
            max_connections_per_host: 20,
            read_timeout_secs: 60,
            download_dir: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            warning_policy: WarningPolicy::default(),
        }
    }
}

// Keeps the session token out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("api_version", &self.api_version)
            .field("max_connections", &self.max_connections)
            .field("max_connections_per_host", &self.max_connections_per_host)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("download_dir", &self.download_dir)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("warning_policy", &self.warning_policy)
            .finish()
    }
}

impl ClientConfig {
    pub fn builder(host: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                host: host.into(),
                ..ClientConfig::default()
            },
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SdkError::invalid_argument("host must not be empty"));
        }
        if self.max_connections == 0 || self.max_connections_per_host == 0 {
            return Err(SdkError::invalid_argument("connection limits must be greater than 0"));
        }
        if self.read_timeout_secs == 0 {
            return Err(SdkError::invalid_argument("read timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn api_version(mut self, version: ApiVersion) -> Self {
        self.config.api_version = version;
        self
    }

    /// Sets both the aggregate and the per-host limit.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self.config.max_connections_per_host = max;
        self
    }

    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.config.max_connections_per_host = max;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = Some(dir.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn warning_policy(mut self, policy: WarningPolicy) -> Self {
        self.config.warning_policy = policy;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Load configuration from `ONEVIEW_*` environment variables.
pub fn load_from_env() -> Result<ClientConfig> {
    let config = load_from_vars(|key| std::env::var(key).ok())?;
    tracing::info!(host = %config.host, "configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from a JSON file.
pub fn load_from_file(path: &Path) -> Result<ClientConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SdkError::invalid_argument(format!("cannot read {}: {e}", path.display())))?;
    let config: ClientConfig = serde_json::from_str(&raw)
        .map_err(|e| SdkError::invalid_argument(format!("invalid config {}: {e}", path.display())))?;
    config.validate()?;
    tracing::info!(path = %path.display(), host = %config.host, "configuration loaded from file");
    Ok(config)
}

/// Build a configuration from an arbitrary variable lookup.
pub fn load_from_vars<F>(lookup: F) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("ONEVIEW_HOST")
        .ok_or_else(|| SdkError::invalid_argument("ONEVIEW_HOST is not set"))?;
    let mut builder = ClientConfig::builder(host);

    if let Some(token) = lookup("ONEVIEW_TOKEN") {
        builder = builder.auth_token(token);
    }
    if let Some(version) = lookup("ONEVIEW_API_VERSION") {
        let value = parse_number::<u32>("ONEVIEW_API_VERSION", &version)?;
        let version = ApiVersion::try_from(value).map_err(SdkError::invalid_argument)?;
        builder = builder.api_version(version);
    }
    if let Some(max) = lookup("ONEVIEW_MAX_CONNECTIONS") {
        builder = builder.max_connections(parse_number("ONEVIEW_MAX_CONNECTIONS", &max)?);
    }
    if let Some(secs) = lookup("ONEVIEW_READ_TIMEOUT") {
        let secs = parse_number("ONEVIEW_READ_TIMEOUT", &secs)?;
        builder = builder.read_timeout(Duration::from_secs(secs));
    }
    if let Some(dir) = lookup("ONEVIEW_DOWNLOAD_DIR") {
        builder = builder.download_dir(dir);
    }
    if let Some(ms) = lookup("ONEVIEW_POLL_INTERVAL_MS") {
        let ms = parse_number("ONEVIEW_POLL_INTERVAL_MS", &ms)?;
        builder = builder.poll_interval(Duration::from_millis(ms));
    }
    if let Some(policy) = lookup("ONEVIEW_WARNING_POLICY") {
        let policy = match policy.to_ascii_lowercase().as_str() {
            "fail" => WarningPolicy::Fail,
            "succeed" => WarningPolicy::Succeed,
            other => {
                return Err(SdkError::invalid_argument(format!(
                    "ONEVIEW_WARNING_POLICY must be fail or succeed, got {other}"
                )))
            }
        };
        builder = builder.warning_policy(policy);
    }

    builder.build()
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| SdkError::invalid_argument(format!("invalid {key}: {e}")))
}
