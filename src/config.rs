//! Configuration module for the reverb echo server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values. Listen
//! addresses are positional: `addr:port` with an optional `/ipv6only`
//! suffix to disable dual-stack binding on an IPv6 address.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable selecting the readiness-poller backend.
pub const POLLER_ENV: &str = "REVERB_POLLER";

const IPV6_ONLY_OPT: &str = "ipv6only";

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "reverb")]
#[command(version = "0.1.0")]
#[command(about = "A multi-threaded TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Addresses to listen on (e.g. 127.0.0.1:7007 or [::1]:7007/ipv6only)
    pub listen: Vec<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ServerConfig {
    /// Addresses to listen on
    #[serde(default)]
    pub listen: Vec<String>,
    /// Number of worker threads
    pub workers: Option<usize>,
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

fn default_log_level() -> String {
    "info".to_string()
}

/// One parsed listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenSpec {
    pub addr: SocketAddr,
    /// Bind IPv6-only instead of dual-stack.
    pub ipv6_only: bool,
}

impl FromStr for ListenSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        let (addr_part, ipv6_only) = match s.split_once('/') {
            Some((addr, opt)) if opt == IPV6_ONLY_OPT => (addr, true),
            Some((_, opt)) => {
                return Err(ConfigError::BadListenSpec(
                    s.to_string(),
                    format!("unknown option '{opt}'"),
                ))
            }
            None => (s, false),
        };

        let addr: SocketAddr = addr_part.parse().map_err(|_| {
            ConfigError::BadListenSpec(s.to_string(), "not an address:port".to_string())
        })?;

        if ipv6_only && addr.is_ipv4() {
            return Err(ConfigError::BadListenSpec(
                s.to_string(),
                "ipv6only requires an IPv6 address".to_string(),
            ));
        }

        Ok(Self { addr, ipv6_only })
    }
}

/// Readiness-poller backend. Only mio (epoll/kqueue) is built on this
/// tree, but the selector is still validated so a bad value fails at
/// startup instead of being silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerKind {
    Mio,
}

pub(crate) fn parse_poller(value: Option<&str>) -> Result<PollerKind, ConfigError> {
    match value {
        None | Some("mio") => Ok(PollerKind::Mio),
        Some(other) => Err(ConfigError::UnknownPoller(other.to_string())),
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listens: Vec<ListenSpec>,
    /// 0 means one worker per detected core.
    pub workers: usize,
    pub log_level: String,
    pub poller: PollerKind,
}

impl Config {
    /// Load configuration from CLI args, the optional TOML file, and the
    /// environment. CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let raw_listens = if cli.listen.is_empty() {
            toml_config.server.listen
        } else {
            cli.listen
        };
        if raw_listens.is_empty() {
            return Err(ConfigError::NoListenAddr);
        }
        let listens = raw_listens
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<ListenSpec>, ConfigError>>()?;

        let poller = parse_poller(std::env::var(POLLER_ENV).ok().as_deref())?;

        Ok(Config {
            listens,
            workers: cli.workers.or(toml_config.server.workers).unwrap_or(0),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            poller,
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    NoListenAddr,
    BadListenSpec(String, String),
    UnknownPoller(String),
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
            ConfigError::NoListenAddr => {
                write!(f, "No listen address given (expected address:port ...)")
            }
            ConfigError::BadListenSpec(spec, reason) => {
                write!(f, "Bad listen address '{spec}': {reason}")
            }
            ConfigError::UnknownPoller(value) => {
                write!(f, "Unknown {POLLER_ENV} value '{value}' (expected 'mio')")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_spec_v4() {
        let spec: ListenSpec = "127.0.0.1:7007".parse().unwrap();
        assert_eq!(spec.addr, "127.0.0.1:7007".parse().unwrap());
        assert!(!spec.ipv6_only);
    }

    #[test]
    fn test_listen_spec_v6_only() {
        let spec: ListenSpec = "[::1]:7007/ipv6only".parse().unwrap();
        assert!(spec.addr.is_ipv6());
        assert!(spec.ipv6_only);
    }

    #[test]
    fn test_listen_spec_rejects_unknown_option() {
        let err = "127.0.0.1:7007/bogus".parse::<ListenSpec>().unwrap_err();
        assert!(matches!(err, ConfigError::BadListenSpec(_, _)));
    }

    #[test]
    fn test_listen_spec_rejects_ipv6only_on_v4() {
        let err = "127.0.0.1:7007/ipv6only".parse::<ListenSpec>().unwrap_err();
        assert!(matches!(err, ConfigError::BadListenSpec(_, _)));
    }

    #[test]
    fn test_listen_spec_rejects_garbage() {
        assert!("not-an-address".parse::<ListenSpec>().is_err());
    }

    #[test]
    fn test_poller_selector() {
        assert_eq!(parse_poller(None).unwrap(), PollerKind::Mio);
        assert_eq!(parse_poller(Some("mio")).unwrap(), PollerKind::Mio);
        assert!(matches!(
            parse_poller(Some("io_uring")),
            Err(ConfigError::UnknownPoller(_))
        ));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = ["0.0.0.0:7007", "[::]:7008/ipv6only"]
            workers = 4

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.len(), 2);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_addresses_is_an_error() {
        let cli = CliArgs {
            listen: vec![],
            config: None,
            workers: None,
            log_level: "info".to_string(),
        };
        assert!(matches!(
            Config::resolve(cli),
            Err(ConfigError::NoListenAddr)
        ));
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = CliArgs {
            listen: vec!["127.0.0.1:7007".to_string()],
            config: None,
            workers: Some(2),
            log_level: "info".to_string(),
        };
        let config = Config::resolve(cli).unwrap();
        assert_eq!(config.listens.len(), 1);
        assert_eq!(config.workers, 2);
        assert_eq!(config.log_level, "info");
    }
}
