//! Configuration module for the order-desk server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::connection::ConnectionLimits;
use crate::framing::DEFAULT_MAX_FRAME_SIZE;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the order server
#[derive(Parser, Debug, Default)]
#[command(name = "order-desk")]
#[command(author = "order-desk authors")]
#[command(version = "0.1.0")]
#[command(about = "An order counter server speaking a length-prefixed JSON protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:5050)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// SQLite database path (":memory:" for a throwaway database)
    #[arg(short = 'd', long)]
    pub database: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Idle seconds allowed between requests (0 = no timeout)
    #[arg(short = 't', long)]
    pub read_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Staff accounts ensured at startup
    #[serde(default)]
    pub staff: Vec<StaffAccount>,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds while waiting for a request
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            read_timeout: default_read_timeout(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "default_database")]
    pub path: String,
    /// Populate an empty menu with demonstration items
    #[serde(default = "default_true")]
    pub seed_menu: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_database(),
            seed_menu: true,
        }
    }
}

/// Payment link configuration
#[derive(Debug, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_payment_url")]
    pub base_url: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            base_url: default_payment_url(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A staff login
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StaffAccount {
    pub email: String,
    pub password: String,
}

fn default_listen() -> String {
    "127.0.0.1:5050".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_read_timeout() -> u64 {
    300 // 5 minutes
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_database() -> String {
    "orders.sqlite".to_string()
}

fn default_true() -> bool {
    true
}

fn default_payment_url() -> String {
    "https://pay.example.com/checkout".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_connections: usize,
    pub read_timeout: u64,
    pub max_frame_size: usize,
    pub database: String,
    pub seed_menu: bool,
    pub payment_base_url: String,
    pub staff: Vec<StaffAccount>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref config_path) => {
                let contents = std::fs::read_to_string(config_path)
                    .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
                toml::from_str(&contents)
                    .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
            }
            None => TomlConfig::default(),
        };

        Self::merge(cli, toml_config).validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("max_connections must be at least 1"));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidValue("max_frame_size must be at least 1"));
        }
        Ok(self)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            read_timeout: cli.read_timeout.unwrap_or(toml_config.server.read_timeout),
            max_frame_size: toml_config.server.max_frame_size,
            database: cli.database.unwrap_or(toml_config.storage.path),
            seed_menu: toml_config.storage.seed_menu,
            payment_base_url: toml_config.payment.base_url,
            staff: toml_config.staff,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            read_timeout: (self.read_timeout > 0).then(|| Duration::from_secs(self.read_timeout)),
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "127.0.0.1:5050");
        assert_eq!(config.database, "orders.sqlite");
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.seed_menu);
        assert!(config.staff.is_empty());
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.connection_limits().read_timeout,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:6000"
            max_connections = 16
            read_timeout = 0

            [storage]
            path = ":memory:"
            seed_menu = false

            [payment]
            base_url = "https://pay.test/go"

            [logging]
            level = "debug"

            [[staff]]
            email = "manager@shop"
            password = "hunter2"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:6000");
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.storage.path, ":memory:");
        assert!(!config.storage.seed_menu);
        assert_eq!(config.payment.base_url, "https://pay.test/go");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.staff,
            vec![StaffAccount {
                email: "manager@shop".to_string(),
                password: "hunter2".to_string()
            }]
        );

        let merged = Config::merge(CliArgs::default(), config);
        assert_eq!(merged.connection_limits().read_timeout, None);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nlisten = \"0.0.0.0:6000\"\n[logging]\nlevel = \"warn\""
        )
        .unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            listen: Some("127.0.0.1:7000".to_string()),
            ..CliArgs::default()
        };
        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7000");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_zero_limits_rejected() {
        let cli = CliArgs {
            max_connections: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::InvalidValue(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nmax_frame_size = 0").unwrap();
        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/order-desk.toml")),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }
}
