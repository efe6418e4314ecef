//! Server configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (`config/wlm_scpi.toml` unless another path is given)
//! 3. environment variables prefixed with `WLM_`, nested keys split on `__`
//! 4. the legacy variables `APPLICATION_LOG_LEVEL`, `CONNECTION_TYPE` and
//!    `WAVEMETERS`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! WLM_APPLICATION__LOG_LEVEL=debug
//! WLM_SERVER__DEVICE_TIMEOUT_MS=5000
//! WAVEMETERS='[[4711, "192.168.1.240", 5000], [536, null, 5001]]'
//! ```
//!
//! `WAVEMETERS` is a JSON list of `[product_id, interfaces, port]` triples
//! where `interfaces` is an IP address, a list of IP addresses or `null` for
//! all interfaces. Host names are not accepted.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::ProductId;

/// Configuration file used when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/wlm_scpi.toml";

/// Prefix of the structured environment overrides.
pub const ENV_PREFIX: &str = "WLM_";

/// Legacy wavemeter list variable.
pub const WAVEMETERS_VAR: &str = "WAVEMETERS";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Invalid {WAVEMETERS_VAR} value: {0}")]
    WavemetersError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// One SCPI server per entry
    #[serde(default)]
    pub wavemeters: Vec<WavemeterEndpoint>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Level name (trace, debug, info, warn, error) or numeric level (10-50)
    #[serde(
        default = "default_log_level",
        deserialize_with = "string_or_number"
    )]
    pub log_level: String,
    /// How the wlmData library reaches the wavemeter servers
    #[serde(default)]
    pub connection_type: ConnectionType,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            connection_type: ConnectionType::default(),
        }
    }
}

/// Whether the wavemeter servers run on this machine or are reached over
/// the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    #[serde(alias = "REMOTE")]
    Remote,
    /// Only possible on Windows
    #[serde(alias = "LOCAL")]
    Local,
}

/// Connection handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Upper bound for a single request, including the driver call
    #[serde(default = "default_device_timeout")]
    pub device_timeout_ms: u64,
    /// Lines buffered between the socket reader and the dispatcher
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Time allowed for flushing replies when a connection closes
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Longest accepted input line in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device_timeout_ms: default_device_timeout(),
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl ServerConfig {
    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// A wavemeter and the addresses its SCPI server listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavemeterEndpoint {
    pub product_id: ProductId,
    /// Interfaces to bind; empty binds all IPv4 interfaces
    #[serde(default)]
    pub interfaces: Vec<IpAddr>,
    pub port: u16,
}

impl WavemeterEndpoint {
    /// Socket addresses the server binds to.
    pub fn bind_addrs(&self) -> Vec<SocketAddr> {
        if self.interfaces.is_empty() {
            return vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)];
        }
        self.interfaces
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_timeout() -> u64 {
    2000
}

fn default_queue_capacity() -> usize {
    5
}

fn default_drain_timeout() -> u64 {
    1000
}

fn default_max_line_length() -> usize {
    4096
}

/// Environment variables may carry numeric log levels.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

impl Settings {
    /// Load configuration from the default file plus environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path plus environment
    ///
    /// A missing file is not an error; the environment may carry the whole
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if a source cannot be parsed or the result is
    /// invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let wavemeters = std::env::var(WAVEMETERS_VAR).ok();
        let config: Self = Self::figment(path.as_ref(), wavemeters.as_deref())?
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Assemble all configuration sources.
    ///
    /// `wavemeters` is the raw value of the legacy `WAVEMETERS` variable.
    pub fn figment(path: &Path, wavemeters: Option<&str>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&["APPLICATION_LOG_LEVEL", "CONNECTION_TYPE"])
                    .map(|key| {
                        if key == "APPLICATION_LOG_LEVEL" {
                            "application.log_level".into()
                        } else {
                            "application.connection_type".into()
                        }
                    }),
            );

        if let Some(json) = wavemeters {
            let endpoints = parse_wavemeters(json)?;
            figment = figment.merge(Serialized::default("wavemeters", endpoints));
        }
        Ok(figment)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is known
    /// - Local connections are only requested on Windows
    /// - At least one wavemeter is configured
    /// - Product ids and bind addresses are unique
    /// - Ports and queue capacity are non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if parse_log_level(&self.application.log_level).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: trace, debug, info, warn, error, \
                 or a numeric level",
                self.application.log_level
            )));
        }

        if self.application.connection_type == ConnectionType::Local && !cfg!(windows) {
            return Err(ConfigError::ValidationError(
                "connection_type 'local' is only supported on Windows".to_string(),
            ));
        }

        if self.server.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.wavemeters.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "No wavemeters defined. Add a [[wavemeters]] table or set {WAVEMETERS_VAR}"
            )));
        }

        let mut ids = HashSet::new();
        let mut addrs = HashSet::new();
        for endpoint in &self.wavemeters {
            if !ids.insert(endpoint.product_id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate wavemeter product_id: {}",
                    endpoint.product_id
                )));
            }
            if endpoint.port == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Wavemeter {} has port 0",
                    endpoint.product_id
                )));
            }
            for addr in endpoint.bind_addrs() {
                if !addrs.insert(addr) {
                    return Err(ConfigError::ValidationError(format!(
                        "Duplicate bind address {} (wavemeter {})",
                        addr, endpoint.product_id
                    )));
                }
            }
        }

        Ok(())
    }

    /// The configured log level as a filter.
    pub fn log_level(&self) -> LevelFilter {
        parse_log_level(&self.application.log_level).unwrap_or(LevelFilter::INFO)
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.wavemeters.iter().map(|endpoint| endpoint.product_id).collect()
    }
}

/// Parse a level name or a numeric level
/// (10 = debug, 20 = info, 30 = warning, 40 = error, 50 = critical).
pub fn parse_log_level(text: &str) -> Option<LevelFilter> {
    let text = text.trim();
    if let Ok(number) = text.parse::<i64>() {
        return Some(match number {
            i64::MIN..=0 => LevelFilter::TRACE,
            1..=10 => LevelFilter::DEBUG,
            11..=20 => LevelFilter::INFO,
            21..=30 => LevelFilter::WARN,
            31..=50 => LevelFilter::ERROR,
            _ => LevelFilter::OFF,
        });
    }

    match text.to_ascii_lowercase().as_str() {
        "trace" | "notset" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "error" | "critical" | "fatal" => Some(LevelFilter::ERROR),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}

/// Parse the legacy `WAVEMETERS` JSON list.
pub fn parse_wavemeters(json: &str) -> Result<Vec<WavemeterEndpoint>, ConfigError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Interfaces {
        One(String),
        Many(Vec<String>),
    }

    let entries: Vec<(ProductId, Option<Interfaces>, u16)> = serde_json::from_str(json)
        .map_err(|err| ConfigError::WavemetersError(err.to_string()))?;

    entries
        .into_iter()
        .map(|(product_id, interfaces, port)| {
            let interfaces = match interfaces {
                None => Vec::new(),
                Some(Interfaces::One(interface)) => vec![parse_interface(&interface)?],
                Some(Interfaces::Many(list)) => list
                    .iter()
                    .map(|interface| parse_interface(interface))
                    .collect::<Result<_, _>>()?,
            };
            Ok(WavemeterEndpoint {
                product_id,
                interfaces,
                port,
            })
        })
        .collect()
}

/// An IP address, optionally with a network prefix (`192.168.1.5/24`).
fn parse_interface(text: &str) -> Result<IpAddr, ConfigError> {
    let address = text.split_once('/').map_or(text, |(address, _)| address);
    address.parse().map_err(|_| {
        ConfigError::WavemetersError(format!("'{text}' is not an IP address"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn endpoint(product_id: ProductId, port: u16) -> WavemeterEndpoint {
        WavemeterEndpoint {
            product_id,
            interfaces: vec![],
            port,
        }
    }

    fn settings(wavemeters: Vec<WavemeterEndpoint>) -> Settings {
        Settings {
            wavemeters,
            ..Settings::default()
        }
    }

    #[test]
    fn test_config_validation_valid() {
        let config = settings(vec![endpoint(4711, 5000), endpoint(536, 5001)]);
        assert!(config.validate().is_ok());
        assert_eq!(config.product_ids(), vec![4711, 536]);
        assert_eq!(config.server.device_timeout(), Duration::from_secs(2));
        assert_eq!(config.server.queue_capacity, 5);
    }

    #[test]
    fn test_no_wavemeters() {
        let result = settings(vec![]).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("No wavemeters defined"));
    }

    #[test]
    fn test_duplicate_product_ids() {
        let result = settings(vec![endpoint(1, 5000), endpoint(1, 5001)]).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate wavemeter product_id"));
    }

    #[test]
    fn test_duplicate_bind_address() {
        let result = settings(vec![endpoint(1, 5000), endpoint(2, 5000)]).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate bind address"));

        // Same port on distinct interfaces is fine
        let mut first = endpoint(1, 5000);
        first.interfaces = vec!["127.0.0.1".parse().unwrap()];
        let mut second = endpoint(2, 5000);
        second.interfaces = vec!["127.0.0.2".parse().unwrap()];
        assert!(settings(vec![first, second]).validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = settings(vec![endpoint(1, 5000)]);
        config.application.log_level = "chatty".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_zero_port_and_capacity() {
        assert!(settings(vec![endpoint(1, 0)]).validate().is_err());

        let mut config = settings(vec![endpoint(1, 5000)]);
        config.server.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_log_level("warning"), Some(LevelFilter::WARN));
        assert_eq!(parse_log_level("10"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_log_level("20"), Some(LevelFilter::INFO));
        assert_eq!(parse_log_level("50"), Some(LevelFilter::ERROR));
        assert_eq!(parse_log_level("verbose"), None);
    }

    #[test]
    fn test_parse_wavemeters() {
        assert_eq!(
            parse_wavemeters(r#"[[1000,"127.0.0.1",5555]]"#).unwrap(),
            vec![WavemeterEndpoint {
                product_id: 1000,
                interfaces: vec!["127.0.0.1".parse().unwrap()],
                port: 5555,
            }]
        );
        assert_eq!(
            parse_wavemeters("[[1000,null,5555], [1001,null,5556]]").unwrap(),
            vec![endpoint(1000, 5555), endpoint(1001, 5556)]
        );
        assert_eq!(
            parse_wavemeters(r#"[[7,["10.0.0.1/24","::1"],80]]"#)
                .unwrap()[0]
                .interfaces
                .len(),
            2
        );

        assert!(parse_wavemeters("[[abc,null,5555]]").is_err());
        assert!(parse_wavemeters(r#"[[1000,"localhost",5555]]"#).is_err());
        assert!(parse_wavemeters(r#"[[1000,"192.168.1.5",abc]]"#).is_err());
        assert!(parse_wavemeters(r#"[[1000,"192.168.1.5",70000]]"#).is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[application]
log_level = "debug"

[server]
device_timeout_ms = 500

[[wavemeters]]
product_id = 4711
interfaces = ["127.0.0.1"]
port = 5000

[[wavemeters]]
product_id = 536
port = 5001
"#
        )
        .unwrap();

        let config: Settings = Settings::figment(file.path(), None)
            .unwrap()
            .extract()
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.log_level(), LevelFilter::DEBUG);
        assert_eq!(config.server.device_timeout_ms, 500);
        assert_eq!(config.server.drain_timeout_ms, 1000);
        assert_eq!(config.wavemeters.len(), 2);
        assert!(config.wavemeters[1].interfaces.is_empty());
    }

    #[test]
    fn test_wavemeters_variable_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            "[[wavemeters]]\nproduct_id = 1\nport = 5000\n"
        )
        .unwrap();

        let config: Settings = Settings::figment(file.path(), Some("[[2,null,6000]]"))
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(config.wavemeters, vec![endpoint(2, 6000)]);
    }
}
