//! Bluetooth Low Energy transport for MeshCore companion radios
//!
//! MeshCore companions expose the Nordic UART service. Each write to the RX
//! characteristic carries one command payload and each notification on the
//! TX characteristic carries one response payload, so no extra framing is
//! needed on this link.
//!
//! # Requirements
//!
//! Enable the `ble` feature in Cargo.toml to use this transport.
//!
//! On Linux, you'll also need:
//! ```bash
//! apt install libdbus-1-dev
//! ```
//!
//! Pairing is handled by the operating system's Bluetooth agent. The
//! configured PIN must match the one shown by the radio.

use crate::config::DEFAULT_TIMEOUT_MS;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{LinkState, RadioTransport};

/// Nordic UART service
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the host writes commands to
pub const NUS_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the radio notifies responses on
pub const NUS_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Interval between peripheral list polls while scanning
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Open GATT session with the radio
struct Session {
    peripheral: Peripheral,
    rx_char: Characteristic,
    notifications: NotificationStream,
}

/// BLE transport for connecting to MeshCore radios over Bluetooth
pub struct BleTransport {
    address: String,
    pin: String,
    scan_timeout: Duration,
    session: Option<Session>,
    state: LinkState,
    name: String,
}

impl BleTransport {
    /// Create a new BLE transport
    ///
    /// # Arguments
    ///
    /// * `address` - The peripheral MAC address
    /// * `pin` - Pairing PIN configured on the radio
    pub fn new(address: impl Into<String>, pin: impl Into<String>) -> Self {
        let address = address.into();
        let name = format!("ble:{}", address);
        Self {
            address,
            pin: pin.into(),
            scan_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            session: None,
            state: LinkState::Disconnected,
            name,
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> LinkState {
        self.state
    }
}

/// Scan until the peripheral with `address` shows up
async fn find_peripheral(address: &str, scan_timeout: Duration) -> Result<Peripheral> {
    let manager = Manager::new().await?;
    let central = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::Ble("no Bluetooth adapter found".to_string()))?;

    central
        .start_scan(ScanFilter {
            services: vec![NUS_SERVICE_UUID],
        })
        .await?;

    let deadline = Instant::now() + scan_timeout;
    let found = loop {
        let peripherals = central.peripherals().await?;
        if let Some(p) = peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
        {
            break Some(p);
        }
        if Instant::now() >= deadline {
            break None;
        }
        sleep(SCAN_POLL_INTERVAL).await;
    };

    if let Err(e) = central.stop_scan().await {
        debug!(error = %e, "Failed to stop BLE scan");
    }

    found.ok_or_else(|| GatewayError::DeviceNotFound(address.to_string()))
}

/// Connect, locate the UART characteristics and subscribe to notifications
async fn open_session(peripheral: Peripheral) -> Result<Session> {
    peripheral.connect().await?;
    peripheral.discover_services().await?;

    let characteristics = peripheral.characteristics();
    let find = |uuid: Uuid| {
        characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| GatewayError::Ble(format!("characteristic {} not found", uuid)))
    };
    let rx_char = find(NUS_RX_CHAR_UUID)?;
    let tx_char = find(NUS_TX_CHAR_UUID)?;

    peripheral.subscribe(&tx_char).await?;
    let notifications = peripheral.notifications().await?;

    Ok(Session {
        peripheral,
        rx_char,
        notifications,
    })
}

#[async_trait]
impl RadioTransport for BleTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.state == LinkState::Connected {
            return Ok(());
        }

        self.state = LinkState::Connecting;
        info!(address = %self.address, "Connecting to BLE device");
        debug!(pin = %self.pin, "Pairing is delegated to the system Bluetooth agent");

        let address = self.address.clone();
        let scan_timeout = self.scan_timeout;
        let result = async move {
            let peripheral = find_peripheral(&address, scan_timeout).await?;
            open_session(peripheral).await
        }
        .await;

        match result {
            Ok(session) => {
                self.session = Some(session);
                self.state = LinkState::Connected;
                info!(address = %self.address, "Connected to MeshCore radio");
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.peripheral.disconnect().await {
                debug!(error = %e, "BLE disconnect failed");
            }
        }
        self.state = LinkState::Disconnected;
        info!(address = %self.address, "Disconnected from BLE device");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.session.is_some()
    }

    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        let session = self.session.as_mut().ok_or(GatewayError::Disconnected)?;

        match session.notifications.next().await {
            Some(notification) if notification.uuid == NUS_TX_CHAR_UUID => {
                debug!(size = notification.value.len(), "Received notification");
                Ok(Some(Bytes::from(notification.value)))
            }
            Some(notification) => {
                debug!(uuid = %notification.uuid, "Ignoring notification");
                Ok(None)
            }
            None => {
                warn!(address = %self.address, "BLE notification stream ended");
                self.state = LinkState::Disconnected;
                Err(GatewayError::Disconnected)
            }
        }
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let session = self.session.as_mut().ok_or(GatewayError::Disconnected)?;

        debug!(size = payload.len(), "Writing BLE payload");
        if let Err(e) = session
            .peripheral
            .write(&session.rx_char, payload, WriteType::WithResponse)
            .await
        {
            self.state = LinkState::Disconnected;
            return Err(GatewayError::WriteError(e.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nordic_uart_uuids() {
        assert_eq!(
            NUS_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            NUS_RX_CHAR_UUID.to_string(),
            "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            NUS_TX_CHAR_UUID.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[test]
    fn test_new_transport_is_disconnected() {
        let transport = BleTransport::new("AA:BB:CC:DD:EE:FF", "123456");
        assert_eq!(transport.state(), LinkState::Disconnected);
        assert!(!transport.is_connected());
        assert_eq!(transport.name(), "ble:AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn test_read_without_session_is_disconnected() {
        let mut transport = BleTransport::new("AA:BB:CC:DD:EE:FF", "123456");
        let err = transport.read_packet().await.unwrap_err();
        assert!(matches!(err, GatewayError::Disconnected));
    }
}
