//! Server configuration.
//!
//! Values resolve in order: defaults, then the TOML file, then env vars
//! and CLI flags (applied in `main`). Every field has a default, so a
//! config file only needs to name what it changes.

use std::path::Path;

use dbrelay_core::Credentials;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of instances talked to at once, across all requests.
pub const DEFAULT_CONCURRENCY: usize = 200;

/// Default cap on a request body.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Operator credentials, one set per backend family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendCredentials {
    pub mysql: Credentials,
    pub proxy: Credentials,
    pub columnar: Credentials,
    /// `user` may stay empty for password-only AUTH. A request may bring
    /// its own password.
    pub redis: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbRelayConfig {
    pub bind: String,
    pub port: u16,
    /// Global cap on concurrently open backend connections.
    pub concurrency: usize,
    pub max_request_bytes: usize,
    /// Serve prometheus metrics on `/metrics`.
    pub metrics: bool,

    /// Port for a TLS listener next to the plain one. 0 disables it.
    pub tls_port: u16,
    pub tls_cert_file: String,
    pub tls_key_file: String,
    pub tls_ca_cert_file: String,
    /// "yes" or "no"
    pub tls_auth_clients: String,

    pub credentials: BackendCredentials,
}

impl Default for DbRelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            concurrency: DEFAULT_CONCURRENCY,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            metrics: true,
            tls_port: 0,
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
            tls_ca_cert_file: String::new(),
            tls_auth_clients: "no".into(),
            credentials: BackendCredentials::default(),
        }
    }
}

impl DbRelayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The TLS port, if TLS is enabled.
    pub fn tls_port(&self) -> Option<u16> {
        (self.tls_port != 0).then_some(self.tls_port)
    }

    pub fn tls_auth_clients(&self) -> Result<bool, ConfigError> {
        match self.tls_auth_clients.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(true),
            "no" | "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid(
                "tls-auth-clients must be 'yes' or 'no'".into(),
            )),
        }
    }

    /// Checks values that would only fail later, at bind or dispatch time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        // the semaphore counts in u32 when draining
        if self.concurrency > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "concurrency must be at most {}",
                u32::MAX
            )));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max-request-bytes must be greater than zero".into(),
            ));
        }
        if self.tls_port().is_some() {
            if self.tls_cert_file.is_empty() || self.tls_key_file.is_empty() {
                return Err(ConfigError::Invalid(
                    "tls-port requires tls-cert-file and tls-key-file".into(),
                ));
            }
            if self.tls_port == self.port {
                return Err(ConfigError::Invalid(format!(
                    "tls-port {} collides with port",
                    self.tls_port
                )));
            }
        }
        self.tls_auth_clients()?;
        Ok(())
    }
}
