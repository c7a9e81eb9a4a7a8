//! Server configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! plain HTTP listener on `0.0.0.0:80`. TLS is enabled by adding a `[tls]`
//! table with the PEM certificate chain and private key paths.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8080
//!
//! [tls]
//! port = 8443
//! cert_path = "certs/server.crt"
//! key_path = "certs/server.key"
//!
//! [cors]
//! allowed_origins = ["https://app.example"]
//!
//! [timeouts]
//! idle_secs = 30
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address or hostname to listen on.
    pub host: String,
    /// Plain HTTP port.
    pub port: u16,
    /// HTTPS listener; absent means plain HTTP only.
    pub tls: Option<TlsConfig>,
    pub cors: CorsConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            tls: None,
            cors: CorsConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_tls_port")]
    pub port: u16,
    /// PEM file with the certificate chain, leaf first.
    pub cert_path: PathBuf,
    /// PEM file with the private key (PKCS#8, PKCS#1 or SEC1).
    pub key_path: PathBuf,
}

fn default_tls_port() -> u16 {
    443
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins that receive `access-control-allow-credentials: true`;
    /// `*` allows every origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Seconds a connection may sit idle between requests.
    pub idle_secs: u64,
    /// Seconds allowed for a TLS handshake.
    pub handshake_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            handshake_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }
}

impl ServerConfig {
    /// Loads and validates a configuration file. Files ending in `.json` are
    /// read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: Self = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that cannot produce a working listener.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.timeouts.idle_secs == 0 {
            return Err(ConfigError::Invalid("timeouts.idle_secs must be positive".into()));
        }
        if self.timeouts.handshake_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.handshake_secs must be positive".into(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.port == self.port && self.port != 0 {
                return Err(ConfigError::Invalid(format!(
                    "tls.port and port are both {}",
                    self.port
                )));
            }
        }
        Ok(())
    }
}
