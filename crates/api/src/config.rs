use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub broker: BrokerConfig,
    pub topics: TopicsConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Full broker URL; when empty the address is assembled from protocol, host and port.
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_broker_protocol")]
    pub protocol: String,

    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_period")]
    pub reconnect_period_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Capacity of the raw message handoff channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_badges_topic")]
    pub badges: String,

    #[serde(default = "default_geofence_topic")]
    pub geofence: String,

    /// Prefix of the outbound `{prefix}/assets/{mac}/location` topic.
    #[serde(default = "default_publish_prefix")]
    pub publish_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

/// Where the geofence catalog is persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `file` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

/// Settings for the in-process mirror viewer.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_popup_ttl")]
    pub popup_ttl_ms: i64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            popup_ttl_ms: default_popup_ttl(),
            sweep_interval_ms: default_sweep_interval(),
            command_capacity: default_command_capacity(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3001
}
fn default_request_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_broker_protocol() -> String {
    "mqtt".to_string()
}
fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_client_id_prefix() -> String {
    "geofence-visualizer".to_string()
}
fn default_keep_alive() -> u64 {
    60
}
fn default_reconnect_period() -> u64 {
    5000
}
fn default_connect_timeout() -> u64 {
    30000
}
fn default_channel_capacity() -> usize {
    256
}
fn default_badges_topic() -> String {
    "old/assets/+/location".to_string()
}
fn default_geofence_topic() -> String {
    "geofence/+".to_string()
}
fn default_publish_prefix() -> String {
    "old".to_string()
}
fn default_bus_capacity() -> usize {
    crate::bus::DEFAULT_CAPACITY
}
fn default_storage_backend() -> String {
    "file".to_string()
}
fn default_storage_path() -> String {
    "data".to_string()
}
fn default_popup_ttl() -> i64 {
    8000
}
fn default_sweep_interval() -> u64 {
    1000
}
fn default_command_capacity() -> usize {
    64
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parsed broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub tls: bool,
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parses `mqtt://host[:port]` or `mqtts://host[:port]`.
    ///
    /// `tcp://` and `ssl://` are accepted as aliases. A missing port defaults to
    /// 1883 (plain) or 8883 (TLS).
    pub fn parse(url: &str) -> Result<Self, ConfigValidationError> {
        let invalid =
            || ConfigValidationError::InvalidValue(format!("Invalid broker URL: {}", url));

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        let tls = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(invalid()),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, if tls { 8883 } else { 1883 }),
        };
        if host.is_empty() || port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            tls,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

impl BrokerConfig {
    /// Resolves the broker address from `url`, or from protocol/host/port.
    pub fn address(&self) -> Result<BrokerAddress, ConfigValidationError> {
        if self.url.is_empty() {
            BrokerAddress::parse(&format!("{}://{}:{}", self.protocol, self.host, self.port))
        } else {
            BrokerAddress::parse(&self.url)
        }
    }

    /// Username and password, only when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with RELAY__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// This method creates a config entirely from defaults and overrides,
    /// without relying on config files (which may not be accessible during tests).
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        // Embed defaults directly to avoid file system dependency in tests
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 3001
            request_timeout_secs = 30

            [logging]
            level = "info"
            format = "json"

            [broker]
            protocol = "mqtt"
            host = "localhost"
            port = 1883
            client_id_prefix = "geofence-visualizer"

            [topics]
            badges = "old/assets/+/location"
            geofence = "geofence/+"
            publish_prefix = "old"

            [bus]
            capacity = 1024

            [storage]
            backend = "memory"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        self.socket_addr().map_err(|e| {
            ConfigValidationError::InvalidValue(format!("Invalid server address: {}", e))
        })?;

        self.broker.address()?;

        if self.broker.reconnect_period_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "broker.reconnect_period_ms cannot be 0".to_string(),
            ));
        }

        if self.topics.badges.is_empty() || self.topics.geofence.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "topics.badges and topics.geofence must be set".to_string(),
            ));
        }

        if self.bus.capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "bus.capacity cannot be 0".to_string(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "file" | "memory") {
            return Err(ConfigValidationError::InvalidValue(format!(
                "Unknown storage backend: {}",
                self.storage.backend
            )));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load_with_defaults() {
        let config = Config::load_for_test(&[]).expect("Failed to load config");

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.broker.reconnect_period_ms, 5000);
        assert_eq!(config.broker.connect_timeout_ms, 30000);
        assert_eq!(config.topics.badges, "old/assets/+/location");
        assert_eq!(config.topics.geofence, "geofence/+");
        assert_eq!(config.viewer.popup_ttl_ms, 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_env_override() {
        let config = Config::load_for_test(&[
            ("server.port", "9000"),
            ("logging.level", "debug"),
            ("broker.url", "mqtts://broker.example.com"),
        ])
        .expect("Failed to load config");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.broker.address().unwrap(),
            BrokerAddress {
                tls: true,
                host: "broker.example.com".to_string(),
                port: 8883,
            }
        );
    }

    #[test]
    fn test_address_from_parts() {
        let config = Config::load_for_test(&[
            ("broker.protocol", "mqtt"),
            ("broker.host", "10.0.0.5"),
            ("broker.port", "1884"),
        ])
        .expect("Failed to load config");

        assert_eq!(config.broker.address().unwrap().to_string(), "mqtt://10.0.0.5:1884");
    }

    #[test]
    fn test_broker_address_parse_errors() {
        assert!(BrokerAddress::parse("http://host:1883").is_err());
        assert!(BrokerAddress::parse("host:1883").is_err());
        assert!(BrokerAddress::parse("mqtt://:1883").is_err());
        assert!(BrokerAddress::parse("mqtt://host:notaport").is_err());
        assert!(BrokerAddress::parse("mqtt://host:0").is_err());
    }

    #[test]
    fn test_credentials_require_both() {
        let config = Config::load_for_test(&[("broker.username", "user")])
            .expect("Failed to load config");
        assert!(config.broker.credentials().is_none());

        let config = Config::load_for_test(&[
            ("broker.username", "user"),
            ("broker.password", "secret"),
        ])
        .expect("Failed to load config");
        assert_eq!(config.broker.credentials(), Some(("user", "secret")));
    }

    #[test]
    fn test_config_validation_rejects_zero_values() {
        let config = Config::load_for_test(&[("bus.capacity", "0")]).unwrap();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("bus.capacity"));

        let config = Config::load_for_test(&[("broker.reconnect_period_ms", "0")]).unwrap();
        assert!(config.validate().is_err());

        let config = Config::load_for_test(&[("server.port", "0")]).unwrap();
        assert!(config.validate().is_err());

        let config = Config::load_for_test(&[("topics.badges", "")]).unwrap();
        assert!(config.validate().is_err());

        let config = Config::load_for_test(&[("storage.backend", "s3")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::load_for_test(&[
            ("server.host", "127.0.0.1"),
            ("server.port", "3000"),
        ])
        .expect("Failed to load config");

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }
}
