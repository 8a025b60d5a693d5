//! Configuration module for the clientecho server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::exchange::{ExchangeSettings, WriteErrorPolicy};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the smoke-test server
#[derive(Parser, Debug)]
#[command(name = "clientecho")]
#[command(author = "clientecho authors")]
#[command(version = "0.1.0")]
#[command(
    about = "WebSocket smoke-test server: sends a burst of messages and waits for the client to send as many back",
    long_about = None
)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP service address (e.g., 0.0.0.0:8080)
    #[arg(long)]
    pub addr: Option<String>,

    /// Number of messages to send, and to wait for
    #[arg(short = 'n', long)]
    pub messages: Option<usize>,

    /// Seconds to wait for all messages once the client is ready
    #[arg(short = 't', long = "timeout")]
    pub timeout_secs: Option<u64>,

    /// Text payload of every message sent to the client
    #[arg(long)]
    pub payload: Option<String>,

    /// What the sender does when a write fails
    #[arg(long, value_enum)]
    pub on_write_error: Option<WriteErrorPolicy>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            workers: None,
        }
    }
}

/// Exchange-related configuration
#[derive(Debug, Deserialize)]
pub struct ExchangeConfig {
    /// Messages sent to, and expected back from, the client
    #[serde(default = "default_messages")]
    pub messages: usize,
    /// Deadline for the whole exchange in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Payload of each sent message
    #[serde(default = "default_payload")]
    pub payload: String,
    #[serde(default)]
    pub on_write_error: WriteErrorPolicy,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            messages: default_messages(),
            timeout_secs: default_timeout_secs(),
            payload: default_payload(),
            on_write_error: WriteErrorPolicy::default(),
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

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_messages() -> usize {
    100_000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_payload() -> String {
    "Hello".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Accept the single-dash `-addr` spelling used by existing harnesses.
///
/// Rewrites `-addr` and `-addr=...` to their `--addr` form; arguments after
/// a `--` separator are left alone.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut separator_seen = false;
    args.into_iter()
        .map(|arg| {
            if separator_seen {
                return arg;
            }
            if arg == "--" {
                separator_seen = true;
                return arg;
            }
            if arg == "-addr" || arg.starts_with("-addr=") {
                format!("-{arg}")
            } else {
                arg
            }
        })
        .collect()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub workers: Option<usize>,
    pub exchange: ExchangeSettings,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse_from(normalize_args(std::env::args())))
    }

    /// Resolve configuration from already parsed CLI args, reading the
    /// TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let messages = cli.messages.unwrap_or(toml_config.exchange.messages);
        if messages == 0 {
            return Err(ConfigError::Invalid(
                "messages must be at least 1".to_string(),
            ));
        }

        let timeout_secs = cli
            .timeout_secs
            .unwrap_or(toml_config.exchange.timeout_secs);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout must be at least 1 second".to_string(),
            ));
        }

        if cli.workers.or(toml_config.server.workers) == Some(0) {
            return Err(ConfigError::Invalid(
                "workers must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            addr: cli.addr.unwrap_or(toml_config.server.addr),
            workers: cli.workers.or(toml_config.server.workers),
            exchange: ExchangeSettings {
                messages,
                deadline: Duration::from_secs(timeout_secs),
                payload: cli.payload.unwrap_or(toml_config.exchange.payload),
                on_write_error: cli
                    .on_write_error
                    .unwrap_or(toml_config.exchange.on_write_error),
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileRead(_, e) => Some(e),
            ConfigError::TomlParse(_, e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}
