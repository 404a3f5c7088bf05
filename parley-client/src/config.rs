//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PARLEY_CONFIG)
//! 3. Environment variables

use crate::connection::ConnectionConfig;
use crate::tls::TlsClientConfig;
use parley_protocol::{UnknownFields, COMPRESSION_THRESHOLD, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Socket read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Send an `Identification` packet on connect.
    pub identify: bool,
    /// Policy for entity fields this client does not model.
    pub unknown_fields: UnknownFields,
    pub compression: CompressionConfig,
    pub tls: TlsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            read_buffer_size: crate::connection::DEFAULT_READ_BUFFER_SIZE,
            identify: true,
            unknown_fields: UnknownFields::default(),
            compression: CompressionConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("PARLEY_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    /// Applies `PARLEY_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("PARLEY_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PARLEY_PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PARLEY_PORT: bad port {:?}", port)))?;
        }
        if let Some(timeout) = lookup("PARLEY_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.request_timeout_secs = secs;
            }
        }
        if let Some(enabled) = lookup("PARLEY_COMPRESSION") {
            self.compression.enabled = parse_flag(&enabled);
        }
        if let Some(policy) = lookup("PARLEY_UNKNOWN_FIELDS") {
            self.unknown_fields = policy
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("PARLEY_UNKNOWN_FIELDS: {}", e)))?;
        }
        if let Some(enabled) = lookup("PARLEY_TLS") {
            self.tls.enabled = parse_flag(&enabled);
        }
        if let Some(path) = lookup("PARLEY_CA_CERT") {
            self.tls.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(name) = lookup("PARLEY_TLS_SERVER_NAME") {
            self.tls.server_name = Some(name);
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be non-zero".to_string(),
            ));
        }
        if !self.tls.enabled && (self.tls.ca_cert_path.is_some() || self.tls.server_name.is_some())
        {
            tracing::warn!("TLS settings present but TLS is disabled");
        }
        Ok(())
    }

    /// Builds the connection settings this configuration describes.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.host.clone(), self.port)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_read_buffer_size(self.read_buffer_size)
            .with_compression(self.compression.enabled)
            .with_compression_threshold(self.compression.threshold)
            .with_unknown_fields(self.unknown_fields)
            .with_identify(self.identify);

        if self.tls.enabled {
            let mut tls = TlsClientConfig::new();
            tls.ca_cert_path = self.tls.ca_cert_path.clone();
            tls.server_name = self.tls.server_name.clone();
            config = config.with_tls(tls);
        }
        config
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Outbound compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Payloads at least this long are compressed.
    pub threshold: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: COMPRESSION_THRESHOLD,
        }
    }
}

/// TLS settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// PEM bundle of CA certificates; the webpki roots are used when unset.
    pub ca_cert_path: Option<PathBuf>,
    /// Name to verify the server certificate against.
    pub server_name: Option<String>,
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file {0:?}: {1}")]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
