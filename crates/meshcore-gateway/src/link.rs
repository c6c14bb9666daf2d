//! RadioLink - radio connection manager
//!
//! The link task exclusively owns the radio transport. It connects, forwards
//! every inbound payload to the server, serializes outbound writes and, when
//! the radio goes away, reconnects with bounded exponential backoff. The rest
//! of the gateway talks to it through a cloneable [`LinkHandle`].
//!
//! ```text
//! Disconnected --attempt--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      |<------ backoff --------+                  |
//!      +--------------- drop / write failure ------+
//! ```

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::ReconnectConfig;
use crate::error::{GatewayError, Result};
use crate::transport::{LinkState, RadioTransport};

/// Capacity of the link command queue
const COMMAND_QUEUE_SIZE: usize = 256;

/// Commands that can be sent to the link task
#[derive(Debug)]
enum LinkCommand {
    /// Write a payload to the radio
    Send {
        payload: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Get link statistics
    GetStats(oneshot::Sender<LinkStats>),
    /// Stop the link and disconnect the transport
    Shutdown,
}

/// Link statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Payloads received from the radio
    pub packets_received: u64,
    /// Payloads written to the radio
    pub packets_sent: u64,
    /// Sends rejected or failed
    pub send_failures: u64,
    /// Connect attempts made
    pub connect_attempts: u64,
    /// Times the link dropped after being connected
    pub link_drops: u64,
}

/// Handle for talking to the link task
#[derive(Debug, Clone)]
pub struct LinkHandle {
    command_tx: mpsc::Sender<LinkCommand>,
    state_rx: watch::Receiver<LinkState>,
}

impl LinkHandle {
    /// Write a payload to the radio
    ///
    /// Fails immediately with [`GatewayError::NotConnected`] while the link is
    /// down; nothing is queued for later delivery.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(GatewayError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(LinkCommand::Send { payload, reply: tx })
            .await
            .map_err(|_| GatewayError::ChannelClosed)?;
        rx.await.map_err(|_| GatewayError::ChannelClosed)?
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Check if the radio is connected
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Watch channel following the link state
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Wait until the link reaches `state`
    pub async fn wait_for_state(&self, state: LinkState) -> Result<()> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| GatewayError::ChannelClosed)
    }

    /// Get link statistics
    pub async fn stats(&self) -> Result<LinkStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(LinkCommand::GetStats(tx))
            .await
            .map_err(|_| GatewayError::ChannelClosed)?;
        rx.await.map_err(|_| GatewayError::ChannelClosed)
    }

    /// Ask the link task to stop
    ///
    /// The task disconnects the transport before it finishes. Calling this on
    /// a link that already stopped is a no-op.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(LinkCommand::Shutdown).await;
    }
}

/// How a connected session ended
enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Radio connection manager owning the transport
pub struct RadioLink<T: RadioTransport> {
    /// Radio transport
    transport: T,
    /// Backoff settings
    config: ReconnectConfig,
    /// Command receiver
    command_rx: mpsc::Receiver<LinkCommand>,
    /// Published link state
    state_tx: watch::Sender<LinkState>,
    /// Inbound payloads for the server
    inbound_tx: mpsc::Sender<Bytes>,
    /// Link statistics
    stats: LinkStats,
}

impl<T: RadioTransport + 'static> RadioLink<T> {
    /// Create a link around `transport`; inbound payloads go to `inbound_tx`
    pub fn new(
        transport: T,
        config: ReconnectConfig,
        inbound_tx: mpsc::Sender<Bytes>,
    ) -> (Self, LinkHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);

        let link = Self {
            transport,
            config,
            command_rx,
            state_tx,
            inbound_tx,
            stats: LinkStats::default(),
        };

        (link, LinkHandle { command_tx, state_rx })
    }

    /// Create the link and run it on a new task
    pub fn spawn(
        transport: T,
        config: ReconnectConfig,
        inbound_tx: mpsc::Sender<Bytes>,
    ) -> (LinkHandle, JoinHandle<()>) {
        let (link, handle) = Self::new(transport, config, inbound_tx);
        (handle, tokio::spawn(link.run()))
    }

    /// Run the connect/read/reconnect loop until shutdown
    pub async fn run(mut self) {
        info!(transport = self.transport.name(), "Starting radio link");
        let mut failures: u32 = 0;

        loop {
            self.set_state(LinkState::Connecting);
            self.stats.connect_attempts += 1;
            debug!(transport = self.transport.name(), attempt = failures + 1, "Connecting to radio");

            let connected = match self.connect().await {
                Some(result) => result,
                None => break,
            };

            match connected {
                Ok(()) => {
                    failures = 0;
                    self.set_state(LinkState::Connected);
                    info!(transport = self.transport.name(), "Radio connected");

                    match self.serve().await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped => {
                            self.stats.link_drops += 1;
                            if let Err(e) = self.transport.disconnect().await {
                                debug!(error = %e, "Error disconnecting dropped transport");
                            }
                            self.set_state(LinkState::Disconnected);

                            // The drop counts as the first failure of a fresh sequence
                            failures = 1;
                            let delay = self.config.backoff_delay(failures);
                            warn!(delay = ?delay, "Radio link lost, reconnecting");
                            if !self.wait(delay).await {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    self.set_state(LinkState::Disconnected);

                    if self.config.max_attempts > 0 && failures >= self.config.max_attempts {
                        error!(
                            error = %e,
                            attempts = failures,
                            "Giving up on radio after repeated connect failures"
                        );
                        return;
                    }

                    let delay = self.config.backoff_delay(failures);
                    warn!(
                        error = %e,
                        failures,
                        delay = ?delay,
                        "Radio connect failed, retrying"
                    );
                    if !self.wait(delay).await {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Error disconnecting from radio");
        }
        self.set_state(LinkState::Disconnected);
        debug!(stats = ?self.stats, "Final radio link statistics");
        info!("Radio link stopped");
    }

    /// Attempt one connect while still answering commands
    ///
    /// Returns `None` when shutdown was requested during the attempt.
    async fn connect(&mut self) -> Option<Result<()>> {
        let connect = self.transport.connect();
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => return Some(result),
                cmd = self.command_rx.recv() => {
                    if !Self::handle_offline(cmd, &mut self.stats) {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for `delay` while answering commands
    ///
    /// Returns `false` when shutdown was requested.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.command_rx.recv() => {
                    if !Self::handle_offline(cmd, &mut self.stats) {
                        return false;
                    }
                }
            }
        }
    }

    /// Answer a command while not connected; `false` means stop
    fn handle_offline(cmd: Option<LinkCommand>, stats: &mut LinkStats) -> bool {
        match cmd {
            Some(LinkCommand::Send { reply, .. }) => {
                stats.send_failures += 1;
                let _ = reply.send(Err(GatewayError::NotConnected));
                true
            }
            Some(LinkCommand::GetStats(tx)) => {
                let _ = tx.send(stats.clone());
                true
            }
            Some(LinkCommand::Shutdown) => {
                info!("Radio link shutdown requested");
                false
            }
            None => false,
        }
    }

    /// Pump inbound payloads and outbound sends until the link drops
    async fn serve(&mut self) -> SessionEnd {
        loop {
            tokio::select! {
                packet = self.transport.read_packet() => {
                    match packet {
                        Ok(Some(payload)) if payload.is_empty() => {
                            trace!("Ignoring empty radio payload");
                        }
                        Ok(Some(payload)) => {
                            self.stats.packets_received += 1;
                            trace!(size = payload.len(), "Radio payload received");
                            if self.inbound_tx.send(payload).await.is_err() {
                                debug!("Inbound receiver closed");
                                return SessionEnd::Shutdown;
                            }
                        }
                        Ok(None) => {}
                        Err(GatewayError::InvalidFrame(reason)) => {
                            debug!(reason = %reason, "Skipping corrupt radio frame");
                        }
                        Err(e) => {
                            warn!(error = %e, "Radio read failed");
                            return SessionEnd::Dropped;
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(LinkCommand::Send { payload, reply }) => {
                            match self.transport.write_packet(&payload).await {
                                Ok(()) => {
                                    self.stats.packets_sent += 1;
                                    let _ = reply.send(Ok(()));
                                }
                                Err(e) => {
                                    self.stats.send_failures += 1;
                                    warn!(error = %e, "Radio write failed");
                                    let _ = reply.send(Err(e));
                                    return SessionEnd::Dropped;
                                }
                            }
                        }
                        Some(LinkCommand::GetStats(tx)) => {
                            let _ = tx.send(self.stats.clone());
                        }
                        Some(LinkCommand::Shutdown) => {
                            info!("Radio link shutdown requested");
                            return SessionEnd::Shutdown;
                        }
                        None => return SessionEnd::Shutdown,
                    }
                }
            }
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }
}
