//! Configuration types for the MeshCore gateway
//!
//! This module provides configuration structures for the radio interface,
//! the TCP fan-out server, reconnection behavior and event logging.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Sync marker that starts every TCP frame
pub const FRAME_SYNC: u8 = 0x3C;

/// Size of the TCP frame header (sync + little-endian u16 length)
pub const FRAME_HEADER_LEN: usize = 3;

/// Largest payload representable by the 16-bit length field
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Default baud rate for MeshCore serial companions
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default BLE pairing PIN
pub const DEFAULT_BLE_PIN: &str = "123456";

/// Default TCP bind host
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default TCP port
pub const DEFAULT_PORT: u16 = 5000;

/// Default connection timeout for transports
pub const DEFAULT_TIMEOUT_MS: u64 = 10000;

/// Main configuration for the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Radio interface configuration (serial or BLE)
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// TCP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnection settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Event log settings
    #[serde(default)]
    pub events: EventLogConfig,
}

/// Interface type for connecting to the radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InterfaceConfig {
    /// Serial port connection
    Serial {
        /// Path to serial port (e.g., /dev/ttyUSB0, COM3)
        port: PathBuf,
        /// Baud rate (default: 115200)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// Bluetooth Low Energy connection
    Ble {
        /// Device MAC address
        address: String,
        /// Pairing PIN
        #[serde(default = "default_ble_pin")]
        pin: String,
    },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_ble_pin() -> String {
    DEFAULT_BLE_PIN.to_string()
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        InterfaceConfig::Serial {
            port: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl InterfaceConfig {
    /// Short kind label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InterfaceConfig::Serial { .. } => "serial",
            InterfaceConfig::Ble { .. } => "BLE",
        }
    }

    /// Connection target (port path or MAC address) for logging
    pub fn target(&self) -> String {
        match self {
            InterfaceConfig::Serial { port, .. } => port.display().to_string(),
            InterfaceConfig::Ble { address, .. } => address.clone(),
        }
    }
}

/// TCP fan-out server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind (0 lets the OS choose)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Size of a single socket read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Upper bound for a single broadcast write to one client
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,

    /// Upper bound for closing a client socket
    #[serde(with = "humantime_serde", default = "default_close_timeout")]
    pub close_timeout: Duration,

    /// Upper bound for the radio link to stop during shutdown
    #[serde(with = "humantime_serde", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    /// Capacity of the inbound radio payload queue
    #[serde(default = "default_queue_size")]
    pub inbound_queue_size: usize,
}

fn default_host() -> IpAddr {
    DEFAULT_HOST
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_queue_size() -> usize {
    256
}

impl ServerConfig {
    /// Socket address the listener binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            read_buffer_size: 4096,
            write_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
            inbound_queue_size: 256,
        }
    }
}

/// Reconnection behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt, doubled per consecutive failure
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Maximum delay between reconnection attempts
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Maximum number of consecutive failed attempts (0 = infinite)
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

impl ReconnectConfig {
    /// Delay to wait after `failures` consecutive failed attempts
    ///
    /// `initial_delay * 2^(failures - 1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: 0, // Infinite
        }
    }
}

/// Verbosity of the packet event log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLogLevel {
    /// No event output
    #[default]
    Off,
    /// One line per packet with decoded fields
    Summary,
    /// Summary plus payload length and hex dump
    Verbose,
}

/// Rendering of event log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFormat {
    /// `key=value | key=value` lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Event log configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Verbosity
    #[serde(default)]
    pub level: EventLogLevel,
    /// Output format
    #[serde(default)]
    pub format: EventFormat,
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set serial port path
    pub fn serial_port(mut self, port: impl Into<PathBuf>) -> Self {
        self.config.interface = InterfaceConfig::Serial {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        };
        self
    }

    /// Set serial port with baud rate
    pub fn serial_port_with_baud(mut self, port: impl Into<PathBuf>, baud_rate: u32) -> Self {
        self.config.interface = InterfaceConfig::Serial {
            port: port.into(),
            baud_rate,
        };
        self
    }

    /// Set BLE device address and pairing PIN
    pub fn ble_device(mut self, address: impl Into<String>, pin: impl Into<String>) -> Self {
        self.config.interface = InterfaceConfig::Ble {
            address: address.into(),
            pin: pin.into(),
        };
        self
    }

    /// Set TCP bind host
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.server.host = host;
        self
    }

    /// Set TCP bind port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set initial and maximum reconnect delays
    pub fn reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect.initial_delay = initial;
        self.config.reconnect.max_delay = max.max(initial);
        self
    }

    /// Set event log verbosity
    pub fn event_log_level(mut self, level: EventLogLevel) -> Self {
        self.config.events.level = level;
        self
    }

    /// Set event log format
    pub fn event_format(mut self, format: EventFormat) -> Self {
        self.config.events.format = format;
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
