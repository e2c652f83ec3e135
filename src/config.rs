//! Configuration for the xtcp echo server binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::buffer::DEFAULT_READ_CHUNK;
use crate::options::{DEFAULT_BACKLOG, DEFAULT_SEND_BUF_LEN};
use crate::stop::StopMode;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "xtcp")]
#[command(version)]
#[command(about = "Framed TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:9000 or :9000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Wire framing
    #[arg(short = 'p', long, value_enum)]
    pub protocol: Option<ProtocolKind>,

    /// Outbound queue capacity per connection
    #[arg(long)]
    pub send_buf_len: Option<usize>,

    /// Bytes requested from the socket per read
    #[arg(long)]
    pub read_buf_size: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Shutdown mode on Ctrl-C (immediate, graceful_no_wait, graceful_wait)
    #[arg(long)]
    pub stop_mode: Option<StopMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Framing used by the echo server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// CRLF-terminated text lines
    #[default]
    Line,
    /// 4-byte big-endian length header
    Length,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub protocol: ProtocolKind,
    #[serde(default = "default_send_buf_len")]
    pub send_buf_len: usize,
    #[serde(default = "default_read_buf_size")]
    pub read_buf_size: usize,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            protocol: ProtocolKind::default(),
            send_buf_len: default_send_buf_len(),
            read_buf_size: default_read_buf_size(),
            backlog: default_backlog(),
        }
    }
}

/// Shutdown behavior
#[derive(Debug, Deserialize, Default)]
pub struct ShutdownConfig {
    #[serde(default)]
    pub mode: StopMode,
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

fn default_listen() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_send_buf_len() -> usize {
    DEFAULT_SEND_BUF_LEN
}

fn default_read_buf_size() -> usize {
    DEFAULT_READ_CHUNK
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub protocol: ProtocolKind,
    pub send_buf_len: usize,
    pub read_buf_size: usize,
    pub backlog: u32,
    pub stop_mode: StopMode,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point to, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            protocol: cli.protocol.unwrap_or(toml_config.server.protocol),
            send_buf_len: cli.send_buf_len.unwrap_or(toml_config.server.send_buf_len),
            read_buf_size: cli
                .read_buf_size
                .unwrap_or(toml_config.server.read_buf_size),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            stop_mode: cli.stop_mode.unwrap_or(toml_config.shutdown.mode),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("listen address is empty".to_string()));
        }
        if self.read_buf_size == 0 {
            return Err(ConfigError::Invalid("read_buf_size must be positive".to_string()));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
