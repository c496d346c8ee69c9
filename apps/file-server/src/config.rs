// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;
use url::Url;

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_job_polling_interval_ms() -> u64 {
    1000
}

const fn default_upload_timeout_secs() -> u64 {
    300
}

const fn default_dial_timeout_secs() -> u64 {
    10
}

const fn default_keep_alive_secs() -> u64 {
    30
}

/// Telemetry and observability configuration (OpenTelemetry).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Enable OpenTelemetry tracing (spans) export.
    ///
    /// Metrics export is controlled separately via `otlp_endpoint`.
    #[serde(default)]
    pub tracing_enable: bool,
    pub otlp_endpoint: Option<String>,
    /// OTLP endpoint for trace export (e.g., `http://localhost:4318/v1/traces`).
    pub otlp_traces_endpoint: Option<String>,
    #[serde(default)]
    pub otlp_headers: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable: true,
            tracing_enable: false,
            otlp_endpoint: None,
            otlp_traces_endpoint: None,
            otlp_headers: HashMap::new(),
        }
    }
}

/// Log file format options.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format
    #[default]
    Text,
    /// JSON format, for log aggregation
    Json,
}

/// Logging configuration for console and file output.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default)]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default)]
    pub file_path: String,
    /// Format for file logging: "text" (default) or "json"
    #[serde(default)]
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: "./file-server.log".to_string(),
            file_format: LogFormat::default(),
        }
    }
}

/// HTTP server configuration including TLS.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
    pub address: String,
    pub tls: bool,
    pub cert_path: String,
    pub key_path: String,
    /// Directory served under `/v1/static/`. Required.
    pub static_directory: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            tls: false,
            cert_path: String::new(),
            key_path: String::new(),
            static_directory: String::new(),
        }
    }
}

/// Cloud controller connection settings.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct UpstreamConfig {
    /// Base URL of the cloud controller, e.g. `https://cc.internal:9022`. Required.
    pub address: String,
    /// Basic auth user for the controller. Required.
    pub username: String,
    /// Basic auth password for the controller. Required.
    pub password: String,
    /// Interval between job status polls, in milliseconds (default: 1000)
    #[serde(default = "default_job_polling_interval_ms")]
    pub job_polling_interval_ms: u64,
    /// Upload timeout when the request has no `timeout` parameter, in seconds (default: 300)
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Accept any TLS certificate from the controller.
    #[serde(default)]
    pub skip_cert_verify: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: String::new(),
            password: String::new(),
            job_polling_interval_ms: default_job_polling_interval_ms(),
            upload_timeout_secs: default_upload_timeout_secs(),
            dial_timeout_secs: default_dial_timeout_secs(),
            keep_alive_secs: default_keep_alive_secs(),
            skip_cert_verify: false,
        }
    }
}

impl UpstreamConfig {
    /// Controller base URL with the configured credentials embedded.
    ///
    /// # Errors
    ///
    /// Returns an error if `address` is not an absolute URL that can carry
    /// credentials.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut url =
            Url::parse(&self.address).map_err(|e| ConfigError::InvalidUpstreamAddress {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        let invalid = || ConfigError::InvalidUpstreamAddress {
            address: self.address.clone(),
            reason: "address cannot carry credentials".to_string(),
        };
        url.set_username(&self.username).map_err(|()| invalid())?;
        url.set_password(Some(&self.password)).map_err(|()| invalid())?;
        Ok(url)
    }

    pub const fn job_polling_interval(&self) -> Duration {
        Duration::from_millis(self.job_polling_interval_ms)
    }

    pub const fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub const fn client_options(&self) -> fileserver_upstream::ClientOptions {
        fileserver_upstream::ClientOptions {
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            skip_cert_verify: self.skip_cert_verify,
        }
    }
}

/// Root configuration for the file server.
#[derive(Deserialize, Serialize, Default, Debug, Clone, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid upstream address '{address}': {reason}")]
    InvalidUpstreamAddress { address: String, reason: String },

    #[error("upstream.job_polling_interval_ms must be greater than zero")]
    ZeroPollingInterval,
}

impl Config {
    /// Checks that every required setting is present and well-formed.
    ///
    /// # Errors
    ///
    /// Lists all missing required settings at once, or reports a zero polling
    /// interval or an unusable upstream address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.server.static_directory.is_empty() {
            missing.push("server.static_directory");
        }
        if self.upstream.address.is_empty() {
            missing.push("upstream.address");
        }
        if self.upstream.username.is_empty() {
            missing.push("upstream.username");
        }
        if self.upstream.password.is_empty() {
            missing.push("upstream.password");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        if self.upstream.job_polling_interval_ms == 0 {
            return Err(ConfigError::ZeroPollingInterval);
        }

        self.upstream.base_url().map(|_| ())
    }
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Loads the application configuration from defaults, a TOML file, and environment variables.
///
/// Environment variables use the `FS_` prefix with `__` separating sections,
/// e.g. `FS_UPSTREAM__PASSWORD`.
///
/// # Errors
///
/// Returns an error if:
/// - The configuration file exists but contains invalid TOML syntax
/// - Environment variables are set but contain invalid values
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment =
        Figment::new().merge(figment::providers::Serialized::defaults(Config::default()));

    let mut file_missing = None;

    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: Config =
        figment.merge(Env::prefixed("FS_").split("__")).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Generates the default configuration as a pretty-printed TOML string.
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized to TOML.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Config {
        let mut config = Config::default();
        config.server.static_directory = "/var/vcap/static".to_string();
        config.upstream.address = "https://cc.example.com:9022".to_string();
        config.upstream.username = "bob".to_string();
        config.upstream.password = "password".to_string();
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert_eq!(config.upstream.job_polling_interval(), Duration::from_secs(1));
        assert_eq!(config.upstream.upload_timeout(), Duration::from_secs(300));
        let options = config.upstream.client_options();
        assert_eq!(options.dial_timeout, Duration::from_secs(10));
        assert_eq!(options.keep_alive, Duration::from_secs(30));
        assert!(!options.skip_cert_verify);
    }

    #[test]
    fn validate_lists_every_missing_field() {
        let err = Config::default().validate().unwrap_err();
        let message = err.to_string();
        for field in
            ["server.static_directory", "upstream.address", "upstream.username", "upstream.password"]
        {
            assert!(message.contains(field), "{message} should mention {field}");
        }
        valid().validate().unwrap();
    }

    #[test]
    fn base_url_embeds_credentials() {
        let url = valid().upstream.base_url().unwrap();
        assert_eq!(url.username(), "bob");
        assert_eq!(url.password(), Some("password"));
        assert_eq!(url.host_str(), Some("cc.example.com"));
        assert_eq!(url.port(), Some(9022));
    }

    #[test]
    fn relative_upstream_address_is_rejected() {
        let mut config = valid();
        config.upstream.address = "cc.example.com".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUpstreamAddress { .. })));
    }

    #[test]
    fn zero_polling_interval_is_rejected() {
        let mut config = valid();
        config.upstream.job_polling_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPollingInterval));
        assert!(err.to_string().contains("job_polling_interval_ms"));
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nstatic_directory = \"/tmp/static\"\n\n[upstream]\naddress = \"http://cc\"\njob_polling_interval_ms = 250\n"
        )
        .unwrap();

        let result = load(file.path().to_str().unwrap()).unwrap();
        assert!(result.file_missing.is_none());
        assert_eq!(result.config.server.static_directory, "/tmp/static");
        assert_eq!(result.config.upstream.address, "http://cc");
        assert_eq!(result.config.upstream.job_polling_interval_ms, 250);
        assert_eq!(result.config.upstream.upload_timeout_secs, 300);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let result = load("/nonexistent/file-server.toml").unwrap();
        assert_eq!(result.file_missing.as_deref(), Some("/nonexistent/file-server.toml"));
        assert_eq!(result.config.server.address, "0.0.0.0:8080");
    }

    #[test]
    fn default_config_serializes() {
        let toml = generate_default().unwrap();
        assert!(toml.contains("[upstream]"));
        assert!(toml.contains("job_polling_interval_ms = 1000"));
    }
}
