//! Daemon configuration.
//!
//! Values come from three layers, later ones winning:
//! 1. An optional TOML file
//! 2. `MICROBRIDGE_PORT` / `MICROBRIDGE_HOST` environment variables
//! 3. Command-line flags
//!
//! ```toml
//! [server]
//! port = 4568
//! host = "0.0.0.0"
//!
//! [connection]
//! read_timeout_secs = 30
//! write_timeout_ms = 10000
//! read_buffer_size = 1024
//! keepalive = true
//! nodelay = true
//!
//! [sensor]
//! framing = "chunk"
//!
//! [logging]
//! level = "info"
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use microbridge_protocol::FrameMode;

use crate::hub::{HubOptions, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_TIMEOUT};

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "MICROBRIDGE_PORT";

/// Environment variable overriding the bind address.
pub const HOST_ENV: &str = "MICROBRIDGE_HOST";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub sensor: SensorConfig,
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port boards connect to
    pub port: u16,
    /// Address to bind on
    pub host: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: HubOptions::default().host,
        }
    }
}

/// Per-connection socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Idle read timeout in seconds (absent or 0 = never)
    pub read_timeout_secs: Option<u64>,
    /// Upper bound for one send, in milliseconds
    pub write_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub keepalive: bool,
    pub nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: None,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            keepalive: true,
            nodelay: true,
        }
    }
}

/// Sensor decoding settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub framing: FrameMode,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the microbridge crates; `RUST_LOG` still wins
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub host: Option<IpAddr>,
    pub framing: Option<FrameMode>,
}

impl BridgeConfig {
    /// Reads a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::FileRead` or `ConfigError::TomlParse`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the final configuration from all three layers, reading the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// layer supplies an invalid value.
    pub fn load(path: Option<&Path>, cli: &CliOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(PORT_ENV) {
            self.server.port = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: PORT_ENV.to_string(),
                value: raw.clone(),
                reason: "expected a port number (0-65535)".to_string(),
            })?;
        }
        if let Some(raw) = lookup(HOST_ENV) {
            self.server.host = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: HOST_ENV.to_string(),
                value: raw.clone(),
                reason: "expected an IP address".to_string(),
            })?;
        }
        Ok(())
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(host) = cli.host {
            self.server.host = host;
        }
        if let Some(framing) = cli.framing {
            self.sensor.framing = framing;
        }
    }

    /// Converts the connection settings into hub options.
    pub fn hub_options(&self) -> HubOptions {
        let connection = &self.connection;
        HubOptions {
            host: self.server.host,
            read_timeout: connection
                .read_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            write_timeout: Duration::from_millis(connection.write_timeout_ms),
            read_buffer_size: connection.read_buffer_size,
            keepalive: connection.keepalive,
            nodelay: connection.nodelay,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.write_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "connection.write_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.connection.read_buffer_size < 2 {
            return Err(ConfigError::InvalidValue {
                key: "connection.read_buffer_size".to_string(),
                value: self.connection.read_buffer_size.to_string(),
                reason: "must hold at least one sensor frame (2 bytes)".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}
