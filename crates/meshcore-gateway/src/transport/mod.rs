//! Radio transports for MeshCore companion devices
//!
//! This module provides the transports the gateway can use to reach the
//! radio:
//!
//! - [`SerialTransport`] - USB/UART serial link (requires `serial` feature)
//! - [`BleTransport`] - Bluetooth LE via the Nordic UART service (requires `ble` feature)
//!
//! # Feature Requirements
//!
//! - `serial`: built without udev enumeration, so no system libraries are
//!   needed beyond a POSIX tty or a Windows COM port.
//!
//! - `ble`: Requires BlueZ development files on Linux
//!   ```bash
//!   apt install libdbus-1-dev
//!   ```

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "ble")]
mod ble;
#[cfg(feature = "ble")]
pub use ble::BleTransport;

use crate::config::InterfaceConfig;
#[cfg(not(all(feature = "serial", feature = "ble")))]
use crate::error::GatewayError;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Byte-level link to one MeshCore radio
///
/// Implementations own whatever framing the physical link needs and hand out
/// complete companion-protocol payloads.
#[async_trait]
pub trait RadioTransport: Send {
    /// Open the link to the radio
    async fn connect(&mut self) -> Result<()>;

    /// Close the link; safe to call when already disconnected
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Read one payload from the radio
    ///
    /// Returns `None` if no complete payload is available yet and `Err` when
    /// the link dropped. Must be cancel-safe: dropping the future before it
    /// completes loses no received bytes.
    async fn read_packet(&mut self) -> Result<Option<Bytes>>;

    /// Write one payload to the radio
    async fn write_packet(&mut self, payload: &[u8]) -> Result<()>;

    /// Get the transport name (for logging)
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: RadioTransport + ?Sized> RadioTransport for Box<T> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        (**self).read_packet().await
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        (**self).write_packet(payload).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// State of the radio link as seen by the rest of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Successfully connected
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Build the transport selected by `config`
///
/// Fails with [`GatewayError::InvalidConfig`] when the matching cargo feature
/// was not compiled in.
pub fn from_config(config: &InterfaceConfig) -> Result<Box<dyn RadioTransport>> {
    match config {
        #[cfg(feature = "serial")]
        InterfaceConfig::Serial { port, baud_rate } => {
            Ok(Box::new(SerialTransport::new(port).with_baud_rate(*baud_rate)))
        }
        #[cfg(not(feature = "serial"))]
        InterfaceConfig::Serial { .. } => Err(GatewayError::InvalidConfig(
            "serial support not compiled in (enable the `serial` feature)".to_string(),
        )),
        #[cfg(feature = "ble")]
        InterfaceConfig::Ble { address, pin } => Ok(Box::new(BleTransport::new(address, pin))),
        #[cfg(not(feature = "ble"))]
        InterfaceConfig::Ble { .. } => Err(GatewayError::InvalidConfig(
            "BLE support not compiled in (enable the `ble` feature)".to_string(),
        )),
    }
}
