//! Server settings
//!
//! Settings start from built-in defaults, may be loaded from a TOML file and
//! are finally overridden by command line flags or environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

/// Default bind address (all interfaces)
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Default maximum size of an inbound message (64 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;

/// Default time to wait for open connections during shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Errors that can occur while loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Deployment mode of the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    #[default]
    Development,
    Production,
}

/// Certificate and private key used to terminate TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    /// PEM encoded PKCS#8 private key
    pub key: PathBuf,
    /// PEM encoded certificate chain
    pub cert: PathBuf,
}

/// Resolved server settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Deployment mode
    pub mode: RuntimeMode,
    /// TLS private key path
    pub ssl_key: Option<PathBuf>,
    /// TLS certificate path
    pub ssl_cert: Option<PathBuf>,
    /// Largest accepted inbound message, in bytes
    pub max_message_size: usize,
    /// Grace period for open connections on shutdown, in seconds
    pub shutdown_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            mode: RuntimeMode::default(),
            ssl_key: None,
            ssl_cert: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

/// Values supplied on the command line or through the environment
///
/// `None` leaves the underlying setting untouched.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub mode: Option<RuntimeMode>,
    pub ssl_key: Option<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
    pub max_message_size: Option<usize>,
    pub shutdown_timeout_secs: Option<u64>,
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// Keys missing from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply command line and environment overrides
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if overrides.ssl_key.is_some() {
            self.ssl_key = overrides.ssl_key;
        }
        if overrides.ssl_cert.is_some() {
            self.ssl_cert = overrides.ssl_cert;
        }
        if let Some(size) = overrides.max_message_size {
            self.max_message_size = size;
        }
        if let Some(secs) = overrides.shutdown_timeout_secs {
            self.shutdown_timeout_secs = secs;
        }
        self
    }

    /// TLS material to use, if the server should terminate TLS itself
    ///
    /// Only production mode with both a key and a certificate enables TLS.
    pub fn tls_paths(&self) -> Option<TlsPaths> {
        if self.mode != RuntimeMode::Production {
            return None;
        }
        match (&self.ssl_key, &self.ssl_cert) {
            (Some(key), Some(cert)) => Some(TlsPaths {
                key: key.clone(),
                cert: cert.clone(),
            }),
            _ => None,
        }
    }

    /// Grace period for open connections on shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.bind, "0.0.0.0");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.mode, RuntimeMode::Development);
        assert!(settings.tls_paths().is_none());
        assert_eq!(settings.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "port = 9001\nmode = \"production\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.port, 9001);
        assert_eq!(settings.mode, RuntimeMode::Production);
        assert_eq!(settings.bind, DEFAULT_BIND);
        assert_eq!(settings.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = Settings::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "prot = 9001\n").unwrap();

        let result = Settings::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "port = = 1").unwrap();

        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let base = Settings {
            port: 9001,
            bind: "127.0.0.1".to_string(),
            ..Default::default()
        };

        let settings = base.with_overrides(Overrides {
            port: Some(7000),
            shutdown_timeout_secs: Some(1),
            ..Default::default()
        });

        assert_eq!(settings.port, 7000);
        assert_eq!(settings.bind, "127.0.0.1");
        assert_eq!(settings.shutdown_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_tls_requires_production_and_both_paths() {
        let with_paths = Settings {
            ssl_key: Some("key.pem".into()),
            ssl_cert: Some("cert.pem".into()),
            ..Default::default()
        };
        assert!(with_paths.tls_paths().is_none());

        let production = Settings {
            mode: RuntimeMode::Production,
            ..with_paths
        };
        assert_eq!(
            production.tls_paths(),
            Some(TlsPaths {
                key: "key.pem".into(),
                cert: "cert.pem".into(),
            })
        );

        let key_only = Settings {
            ssl_cert: None,
            ..production
        };
        assert!(key_only.tls_paths().is_none());
    }
}
