//! Error types for gateway operations
//!
//! Errors fall into four groups: radio link errors (recovered by the
//! reconnect loop), client I/O errors (recovered by evicting one session),
//! framing errors, and fatal startup errors.

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Radio Transport Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port path
        port: String,
        /// Failure reason
        reason: String,
    },

    /// Radio read error
    #[error("Radio read error: {0}")]
    ReadError(String),

    /// Radio write error
    #[error("Radio write error: {0}")]
    WriteError(String),

    /// The transport reported that the radio went away
    #[error("Radio disconnected")]
    Disconnected,

    /// A send was attempted while the radio link is down
    #[error("Radio not connected")]
    NotConnected,

    /// Connection attempt failed for a transport-specific reason
    #[error("Failed to connect to radio: {0}")]
    ConnectFailed(String),

    /// Bluetooth stack error
    #[error("BLE error: {0}")]
    Ble(String),

    /// BLE peripheral with the configured address was not found
    #[error("BLE device not found: {0}")]
    DeviceNotFound(String),

    // ===== Framing Errors =====
    /// Payload does not fit in a 16-bit length field
    #[error("Payload too large: {size} bytes exceeds frame maximum of {max} bytes")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Invalid frame received from the radio
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    // ===== Server Errors =====
    /// Could not bind the TCP listener
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Check if this error is recoverable by reconnecting the radio
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::PortNotFound(_)
                | GatewayError::PortOpenFailed { .. }
                | GatewayError::ReadError(_)
                | GatewayError::WriteError(_)
                | GatewayError::Disconnected
                | GatewayError::NotConnected
                | GatewayError::ConnectFailed(_)
                | GatewayError::Ble(_)
                | GatewayError::DeviceNotFound(_)
        )
    }

    /// Check if this error must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Bind { .. } | GatewayError::InvalidConfig(_))
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::PortNotFound(_) => "PORT_NOT_FOUND",
            GatewayError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            GatewayError::ReadError(_) => "READ_ERROR",
            GatewayError::WriteError(_) => "WRITE_ERROR",
            GatewayError::Disconnected => "DISCONNECTED",
            GatewayError::NotConnected => "NOT_CONNECTED",
            GatewayError::ConnectFailed(_) => "CONNECT_FAILED",
            GatewayError::Ble(_) => "BLE_ERROR",
            GatewayError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::InvalidFrame(_) => "INVALID_FRAME",
            GatewayError::Bind { .. } => "BIND_FAILED",
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::ChannelClosed => "CHANNEL_CLOSED",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(feature = "ble")]
impl From<btleplug::Error> for GatewayError {
    fn from(err: btleplug::Error) -> Self {
        let message = err.to_string();
        match err {
            btleplug::Error::DeviceNotFound => GatewayError::DeviceNotFound(message),
            btleplug::Error::NotConnected => GatewayError::Disconnected,
            _ => GatewayError::Ble(message),
        }
    }
}
