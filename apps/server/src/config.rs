//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, `HELIX__SECTION__KEY` environment variables, then command-line
//! overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// File read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "helix.toml";
pub const ENV_PREFIX: &str = "HELIX";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: SocketAddr,
    /// Allowed CORS origins. `*` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest accepted dataset upload.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            cors_origins: default_cors_origins(),
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Root directory of the `local` backend.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_storage_timeout_secs() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: default_backend(), root: default_storage_root(), timeout_secs: default_storage_timeout_secs() }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "helix_server=debug,helix_training=info,tower_http=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_filter(), json: false }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Values given on the command line. Each one that is set wins over every
/// other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub address: Option<String>,
    pub log_filter: Option<String>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `path` (or `helix.toml` if present), the
    /// environment and `overrides`.
    ///
    /// # Errors
    ///
    /// Fails if an explicitly named file is missing, a file does not parse,
    /// or a value has the wrong type.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).format(config::FileFormat::Toml).required(false),
        };
        config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .set_override_option("server.address", overrides.address.clone())?
            .set_override_option("logging.filter", overrides.log_filter.clone())?
            .build()?
            .try_deserialize()
    }

    /// Parse a TOML document on top of the defaults.
    ///
    /// # Errors
    ///
    /// Fails if the document does not parse or a value has the wrong type.
    pub fn from_toml(document: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:8000".parse().unwrap());
        assert_eq!(config.server.cors_origins, vec!["*"]);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.storage.timeout(), Duration::from_secs(30));
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            address = "0.0.0.0:9000"

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.address.port(), 9000);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Config::from_toml("[storage]\nbackend = \"s3\"\n").is_err());
    }

    #[test]
    fn test_load_file_with_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\naddress = \"127.0.0.1:7000\"\nmax_upload_bytes = 1024").unwrap();

        let overrides =
            Overrides { address: Some("127.0.0.1:7100".to_string()), log_filter: Some("debug".to_string()) };
        let config = Config::load(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.server.address.port(), 7100);
        assert_eq!(config.server.max_upload_bytes, 1024);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::load(Some(&missing), &Overrides::default()).is_err());
    }
}
