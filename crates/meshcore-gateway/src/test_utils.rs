//! Test utilities for exercising the gateway without radio hardware
//!
//! [`MockTransport`] implements [`RadioTransport`] and is driven from the
//! test through a cloneable [`MockTransportHandle`]: inject inbound payloads,
//! simulate link drops, fail connects or writes, and inspect what was sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshcore_gateway::test_utils::MockTransport;
//!
//! let (transport, radio) = MockTransport::new();
//! radio.fail_next_connects(2);
//! // hand `transport` to a Gateway, then:
//! radio.inject(vec![0x83]);
//! radio.drop_link();
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{GatewayError, Result};
use crate::transport::RadioTransport;

/// Scripted event delivered through `read_packet`
#[derive(Debug)]
enum MockEvent {
    Packet(Bytes),
    Drop,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_failures: u32,
    fail_sends: bool,
    connect_attempts: Vec<Instant>,
    disconnects: u32,
    sent: Vec<Bytes>,
}

/// Scriptable in-memory radio
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedReceiver<MockEvent>,
}

/// Test-side control of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    shared: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<MockEvent>,
}

impl MockTransport {
    /// Create a mock radio and its control handle
    pub fn new() -> (Self, MockTransportHandle) {
        let shared = Arc::new(Mutex::new(MockState::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: shared.clone(),
                events: rx,
            },
            MockTransportHandle { shared, events: tx },
        )
    }
}

#[async_trait]
impl RadioTransport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connect_attempts.push(Instant::now());
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(GatewayError::ConnectFailed("mock radio unavailable".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        if !self.is_connected() {
            return Err(GatewayError::Disconnected);
        }

        match self.events.recv().await {
            Some(MockEvent::Packet(payload)) => Ok(Some(payload)),
            Some(MockEvent::Drop) => {
                self.shared.lock().connected = false;
                Err(GatewayError::Disconnected)
            }
            None => {
                // Handle gone: nothing will ever arrive
                futures::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(GatewayError::Disconnected);
        }
        if state.fail_sends {
            return Err(GatewayError::WriteError("mock write failure".to_string()));
        }
        state.sent.push(Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

impl MockTransportHandle {
    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.lock().connect_failures = count;
    }

    /// Make every write fail until turned off again
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.lock().fail_sends = fail;
    }

    /// Deliver a payload from the radio
    pub fn inject(&self, payload: impl Into<Bytes>) {
        let _ = self.events.send(MockEvent::Packet(payload.into()));
    }

    /// Simulate the radio going away (power cycle, cable pulled)
    pub fn drop_link(&self) {
        let _ = self.events.send(MockEvent::Drop);
    }

    /// Whether the transport is currently connected
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Times at which connect was attempted
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.shared.lock().connect_attempts.clone()
    }

    /// Number of disconnect calls
    pub fn disconnect_count(&self) -> u32 {
        self.shared.lock().disconnects
    }

    /// Payloads written to the radio so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.shared.lock().sent.clone()
    }

    /// Wait until at least `count` payloads were written
    ///
    /// Returns `None` if `timeout` elapses first.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Option<Vec<Bytes>> {
        let deadline = Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count {
                return Some(sent);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
