//! Configuration module for replay-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{ArgAction, Parser};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ReplayError;
use crate::protocol::DEFAULT_MAX_PAYLOAD;
use crate::session::{SessionOptions, DEFAULT_READ_CHUNK};

/// Command-line arguments for the replay tool
#[derive(Parser, Debug)]
#[command(name = "replay-bench")]
#[command(author = "replay-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "Replay a recorded byte stream against a server and measure throughput", long_about = None)]
pub struct CliArgs {
    /// Recorded source file to replay
    pub file: PathBuf,

    /// Server address (host[:port]); a local discard server is used when omitted
    pub server: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of replay iterations
    #[arg(short = 'n', long)]
    pub iterations: Option<usize>,

    /// Maximum number of simultaneous connections
    #[arg(short = 'j', long)]
    pub max_concurrency: Option<usize>,

    /// Print every frame sent and received
    #[arg(short = 'd', long)]
    pub debug_protocol: bool,

    /// Print per-iteration results and the final report
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub verbose: bool,

    /// Quiet period after which the server is considered done, in milliseconds
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// Port used when the server address has none
    #[arg(long)]
    pub default_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Replay-related configuration
#[derive(Debug, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Largest blob in one outbound frame
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    /// Size of one source file read
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            max_concurrency: default_max_concurrency(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_payload: default_max_payload(),
            read_chunk: default_read_chunk(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Server address; a local discard server is used when absent
    pub address: Option<String>,
    /// Port used when the address has none
    #[serde(default = "default_port")]
    pub default_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            default_port: default_port(),
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

fn default_iterations() -> usize {
    1
}

fn default_max_concurrency() -> usize {
    1
}

fn default_idle_timeout_ms() -> u64 {
    500
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

fn default_read_chunk() -> usize {
    DEFAULT_READ_CHUNK
}

fn default_port() -> u16 {
    7480
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub file: PathBuf,
    pub server: Option<String>,
    pub default_port: u16,
    pub iterations: usize,
    pub max_concurrency: usize,
    pub debug_protocol: bool,
    pub verbose: bool,
    pub idle_timeout: Duration,
    pub max_payload: usize,
    pub read_chunk: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ReplayError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ReplayError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path).map_err(|e| {
                ReplayError::Config(format!(
                    "failed to read config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?;
            toml::from_str(&contents).map_err(|e| {
                ReplayError::Config(format!(
                    "failed to parse config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ReplayError> {
        let config = Config {
            file: cli.file,
            server: cli.server.or(toml_config.server.address),
            default_port: cli
                .default_port
                .unwrap_or(toml_config.server.default_port),
            iterations: cli.iterations.unwrap_or(toml_config.replay.iterations),
            max_concurrency: cli
                .max_concurrency
                .unwrap_or(toml_config.replay.max_concurrency),
            debug_protocol: cli.debug_protocol,
            verbose: cli.verbose,
            idle_timeout: Duration::from_millis(
                cli.idle_timeout_ms
                    .unwrap_or(toml_config.replay.idle_timeout_ms),
            ),
            max_payload: toml_config.replay.max_payload,
            read_chunk: toml_config.replay.read_chunk,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        if config.max_concurrency == 0 {
            return Err(ReplayError::Config(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        if config.max_payload == 0 || config.read_chunk == 0 {
            return Err(ReplayError::Config(
                "max_payload and read_chunk must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    /// Check that the source file exists and is a regular file.
    pub fn validate_source(&self) -> Result<u64, ReplayError> {
        let metadata = std::fs::metadata(&self.file).map_err(|e| {
            ReplayError::Config(format!(
                "source file '{}' is not readable: {}",
                self.file.display(),
                e
            ))
        })?;
        if !metadata.is_file() {
            return Err(ReplayError::Config(format!(
                "source '{}' is not a regular file",
                self.file.display()
            )));
        }
        Ok(metadata.len())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            idle_timeout: self.idle_timeout,
            max_payload: self.max_payload,
            read_chunk: self.read_chunk,
            debug_protocol: self.debug_protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("replay-bench").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.replay.iterations, 1);
        assert_eq!(config.replay.max_concurrency, 1);
        assert_eq!(config.replay.idle_timeout_ms, 500);
        assert_eq!(config.server.address, None);
        assert_eq!(config.server.default_port, 7480);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [replay]
            iterations = 8
            max_concurrency = 4
            idle_timeout_ms = 250
            max_payload = 4096

            [server]
            address = "10.0.0.1:9000"
            default_port = 9100

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.replay.iterations, 8);
        assert_eq!(config.replay.max_concurrency, 4);
        assert_eq!(config.replay.idle_timeout_ms, 250);
        assert_eq!(config.replay.max_payload, 4096);
        assert_eq!(config.replay.read_chunk, DEFAULT_READ_CHUNK);
        assert_eq!(config.server.address.as_deref(), Some("10.0.0.1:9000"));
        assert_eq!(config.server.default_port, 9100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_defaults() {
        let config = Config::merge(cli(&["capture.bin"]), TomlConfig::default()).unwrap();
        assert_eq!(config.file, PathBuf::from("capture.bin"));
        assert_eq!(config.server, None);
        assert_eq!(config.iterations, 1);
        assert_eq!(config.max_concurrency, 1);
        assert!(!config.debug_protocol);
        assert!(config.verbose);
        assert_eq!(config.idle_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [replay]
            iterations = 8
            max_concurrency = 4

            [server]
            address = "10.0.0.1"
            "#,
        )
        .unwrap();

        let args = cli(&[
            "capture.bin",
            "example.com:9000",
            "-n",
            "3",
            "--debug-protocol",
            "--verbose",
            "false",
        ]);
        let config = Config::merge(args, toml_config).unwrap();
        assert_eq!(config.server.as_deref(), Some("example.com:9000"));
        assert_eq!(config.iterations, 3);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.debug_protocol);
        assert!(!config.verbose);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = Config::merge(cli(&["capture.bin", "-j", "0"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Config(_)));
    }

    #[test]
    fn test_validate_source() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"abc").unwrap();

        let mut config = Config::merge(cli(&["unused"]), TomlConfig::default()).unwrap();
        config.file = file.path().to_path_buf();
        assert_eq!(config.validate_source().unwrap(), 3);

        config.file = std::env::temp_dir();
        assert!(matches!(config.validate_source(), Err(ReplayError::Config(_))));

        config.file = PathBuf::from("/nonexistent/replay-bench/capture.bin");
        assert!(matches!(config.validate_source(), Err(ReplayError::Config(_))));
    }
}
