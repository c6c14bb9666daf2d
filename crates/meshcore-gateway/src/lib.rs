//! MeshCore TCP Gateway
//!
//! This crate shares one MeshCore companion radio, reachable over a serial
//! or Bluetooth LE link, with any number of TCP clients. Each client sees a
//! private length-framed byte stream to the radio: its frames are forwarded
//! to the radio and every frame the radio emits is broadcast to all clients.
//!
//! # Architecture
//!
//! The gateway is built from four layers:
//!
//! 1. **Radio Transport** - Serial/BLE link to the companion radio
//! 2. **Radio Link** - Reconnect state machine owning the transport
//! 3. **Fan-out Server** - TCP accept loop, framing and broadcast
//! 4. **Event Log** - Optional decoded packet log on stdout
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Enable the `serial` feature to use SerialTransport
//! // Cargo.toml: meshcore-gateway = { version = "0.1", features = ["serial"] }
//!
//! use meshcore_gateway::{transport, EventLogLevel, Gateway, GatewayConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfigBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .port(5000)
//!         .event_log_level(EventLogLevel::Summary)
//!         .build();
//!
//!     let radio = transport::from_config(&config.interface)?;
//!     let gateway = Gateway::bind(config, radio).await?;
//!
//!     gateway
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port transport (`tokio-serial`)
//! - `ble` - Bluetooth Low Energy transport (`btleplug`)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod transport;

// Wire format and observability
pub mod codec;
pub mod decoder;
pub mod events;

// Runtime services
pub mod gateway;
pub mod link;
pub mod server;

// Testing utilities
pub mod test_utils;

pub use config::{
    EventFormat, EventLogConfig, EventLogLevel, GatewayConfig, GatewayConfigBuilder,
    InterfaceConfig, ReconnectConfig, ServerConfig,
};
pub use error::{GatewayError, Result};
pub use transport::{LinkState, RadioTransport};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

#[cfg(feature = "ble")]
pub use transport::BleTransport;

pub use codec::{encode_frame, FrameDecoder};
pub use decoder::{decode, decode_command, decode_response, DecodedFields, Direction, FieldValue};
pub use events::EventLogger;

pub use gateway::Gateway;
pub use link::{LinkHandle, LinkStats, RadioLink};
pub use server::{FanoutServer, ServerHandle};

pub use test_utils::{MockTransport, MockTransportHandle};

// Protocol constants re-exports
pub use config::{
    DEFAULT_BAUD_RATE, DEFAULT_BLE_PIN, DEFAULT_PORT, FRAME_HEADER_LEN, FRAME_SYNC,
    MAX_FRAME_PAYLOAD,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
