//! Serial transport for MeshCore companion radios
//!
//! This module provides async serial communication using tokio-serial. The
//! companion firmware frames each payload with a one-byte direction marker
//! and a little-endian length:
//!
//! - host to radio: `0x3C | len (LE u16) | payload`
//! - radio to host: `0x3E | len (LE u16) | payload`

use crate::config::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, FRAME_HEADER_LEN, FRAME_SYNC};
use crate::error::{GatewayError, Result};
use crate::transport::{LinkState, RadioTransport};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace, warn};

/// Marker starting every frame sent by the radio
const RADIO_FRAME_MARKER: u8 = 0x3E;

/// Buffer size for reading from serial port
const READ_BUFFER_SIZE: usize = 512;

/// Largest frame the companion firmware emits; anything above is corruption
const MAX_SERIAL_PAYLOAD: usize = 300;

/// Serial transport for MeshCore radios
pub struct SerialTransport {
    /// Serial port path
    port_path: PathBuf,

    /// Baud rate
    baud_rate: u32,

    /// Connection timeout
    timeout: Duration,

    /// Serial stream (when connected)
    stream: Option<SerialStream>,

    /// Current connection state
    state: LinkState,

    /// Read buffer for accumulating partial frames
    read_buffer: BytesMut,

    /// Transport name for logging
    name: String,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());

        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stream: None,
            state: LinkState::Disconnected,
            read_buffer: BytesMut::with_capacity(READ_BUFFER_SIZE * 2),
            name,
        }
    }

    /// Create with custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    /// Get the current connection state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Try to parse a complete radio frame from the read buffer
    fn try_parse_frame(&mut self) -> Result<Option<Bytes>> {
        if self.read_buffer.is_empty() {
            return Ok(None);
        }

        if self.read_buffer[0] != RADIO_FRAME_MARKER {
            match self.read_buffer.iter().position(|&b| b == RADIO_FRAME_MARKER) {
                Some(pos) => {
                    warn!(discarded = pos, "Discarding bytes before frame marker");
                    self.read_buffer.advance(pos);
                }
                None => {
                    warn!(discarded = self.read_buffer.len(), "Discarding buffer without frame marker");
                    self.read_buffer.clear();
                    return Ok(None);
                }
            }
        }

        if self.read_buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let length = u16::from_le_bytes([self.read_buffer[1], self.read_buffer[2]]) as usize;

        // Sanity check length
        if length > MAX_SERIAL_PAYLOAD {
            warn!(length, "Frame length too large, likely corrupt");
            // Skip this marker so the next scan finds the following one
            self.read_buffer.advance(1);
            return Err(GatewayError::InvalidFrame(format!(
                "Frame length {} exceeds maximum of {}",
                length, MAX_SERIAL_PAYLOAD
            )));
        }

        let total_size = FRAME_HEADER_LEN + length;
        if self.read_buffer.len() < total_size {
            trace!(
                have = self.read_buffer.len(),
                need = total_size,
                "Waiting for complete frame"
            );
            return Ok(None);
        }

        let mut frame = self.read_buffer.split_to(total_size);
        frame.advance(FRAME_HEADER_LEN);
        let payload = frame.freeze();

        debug!(size = payload.len(), "Received complete frame");
        Ok(Some(payload))
    }

    /// Frame a payload for the radio
    fn frame_packet(payload: &[u8]) -> Result<Bytes> {
        let length = u16::try_from(payload.len()).map_err(|_| GatewayError::PayloadTooLarge {
            size: payload.len(),
            max: u16::MAX as usize,
        })?;

        let mut packet = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        packet.put_u8(FRAME_SYNC);
        packet.put_u16_le(length);
        packet.put_slice(payload);
        Ok(packet.freeze())
    }
}

#[async_trait]
impl RadioTransport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.state == LinkState::Connected {
            return Ok(());
        }

        self.state = LinkState::Connecting;
        info!(port = %self.port_path.display(), baud = self.baud_rate, "Connecting to serial port");

        // Check if port exists
        if !self.port_path.exists() {
            self.state = LinkState::Disconnected;
            return Err(GatewayError::PortNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| {
                self.state = LinkState::Disconnected;
                GatewayError::PortOpenFailed {
                    port: self.port_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

        self.stream = Some(stream);
        self.state = LinkState::Connected;
        self.read_buffer.clear();

        info!(port = %self.port_path.display(), "Connected to MeshCore radio");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Serial shutdown failed");
            }
        }

        self.state = LinkState::Disconnected;
        self.read_buffer.clear();

        info!(port = %self.port_path.display(), "Disconnected from serial port");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.stream.is_some()
    }

    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        if self.stream.is_none() {
            return Err(GatewayError::Disconnected);
        }

        // First, try to parse from existing buffer
        if let Some(frame) = self.try_parse_frame()? {
            return Ok(Some(frame));
        }

        let stream = self.stream.as_mut().ok_or(GatewayError::Disconnected)?;
        let mut buf = [0u8; READ_BUFFER_SIZE];

        match stream.read(&mut buf).await {
            Ok(0) => {
                // EOF - device unplugged
                self.state = LinkState::Disconnected;
                Err(GatewayError::Disconnected)
            }
            Ok(n) => {
                trace!(bytes = n, "Read from serial port");
                self.read_buffer.extend_from_slice(&buf[..n]);
                self.try_parse_frame()
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                error!(error = %e, "Serial read error");
                self.state = LinkState::Disconnected;
                Err(GatewayError::ReadError(e.to_string()))
            }
        }
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let packet = Self::frame_packet(payload)?;
        let stream = self.stream.as_mut().ok_or(GatewayError::Disconnected)?;

        debug!(
            size = packet.len(),
            payload_size = payload.len(),
            "Writing frame"
        );

        if let Err(e) = stream.write_all(&packet).await {
            error!(error = %e, "Serial write error");
            self.state = LinkState::Disconnected;
            return Err(GatewayError::WriteError(e.to_string()));
        }

        stream
            .flush()
            .await
            .map_err(|e| GatewayError::WriteError(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state)
            .field("buffer_len", &self.read_buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![RADIO_FRAME_MARKER];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_frame_packet() {
        let framed = SerialTransport::frame_packet(b"hello").unwrap();
        assert_eq!(framed[0], 0x3C);
        assert_eq!(u16::from_le_bytes([framed[1], framed[2]]), 5);
        assert_eq!(&framed[3..], b"hello");
    }

    #[test]
    fn test_parse_complete_frame() {
        let mut transport = SerialTransport::new("/dev/null");
        transport.read_buffer.extend_from_slice(&radio_frame(&[0x05, 0x01]));

        let frame = transport.try_parse_frame().unwrap();
        assert_eq!(frame.unwrap().as_ref(), &[0x05, 0x01]);
        assert!(transport.read_buffer.is_empty());
    }

    #[test]
    fn test_parse_partial_frame() {
        let mut transport = SerialTransport::new("/dev/null");
        transport.read_buffer.extend_from_slice(&[0x3E, 0x05, 0x00, 0x01]);

        assert!(transport.try_parse_frame().unwrap().is_none());
        assert_eq!(transport.read_buffer.len(), 4);
    }

    #[test]
    fn test_skip_garbage_before_marker() {
        let mut transport = SerialTransport::new("/dev/null");
        transport.read_buffer.extend_from_slice(b"boot log\r\n");
        transport.read_buffer.extend_from_slice(&radio_frame(b"\x0atest"));

        let frame = transport.try_parse_frame().unwrap();
        assert_eq!(frame.unwrap().as_ref(), b"\x0atest");
    }

    #[test]
    fn test_buffer_without_marker_is_dropped() {
        let mut transport = SerialTransport::new("/dev/null");
        transport.read_buffer.extend_from_slice(b"noise");
        assert!(transport.try_parse_frame().unwrap().is_none());
        assert!(transport.read_buffer.is_empty());
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut transport = SerialTransport::new("/dev/null");
        transport.read_buffer.extend_from_slice(&[0x3E, 0xFF, 0xFF]);
        transport.read_buffer.extend_from_slice(&radio_frame(b"\x00"));

        let err = transport.try_parse_frame().unwrap_err();
        assert!(matches!(err, GatewayError::InvalidFrame(_)));

        // The next call resynchronizes on the following marker
        let frame = transport.try_parse_frame().unwrap();
        assert_eq!(frame.unwrap().as_ref(), b"\x00");
    }

    #[test]
    fn test_transport_state() {
        let transport = SerialTransport::new("/dev/ttyUSB0").with_baud_rate(9600);
        assert_eq!(transport.state(), LinkState::Disconnected);
        assert!(!transport.is_connected());
        assert_eq!(transport.name(), "serial:/dev/ttyUSB0");
        assert_eq!(transport.port_path(), Path::new("/dev/ttyUSB0"));
    }

    #[tokio::test]
    async fn test_connect_missing_port() {
        let mut transport = SerialTransport::new("/dev/does-not-exist-meshcore");
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::PortNotFound(_)));
        assert!(err.is_retriable());
        assert_eq!(transport.state(), LinkState::Disconnected);
    }
}
