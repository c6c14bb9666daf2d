//! Gateway - wires the radio link and the fan-out server together
//!
//! # Example
//!
//! ```rust,ignore
//! use meshcore_gateway::{transport, Gateway, GatewayConfigBuilder};
//!
//! let config = GatewayConfigBuilder::new().serial_port("/dev/ttyUSB0").build();
//! let radio = transport::from_config(&config.interface)?;
//! let gateway = Gateway::bind(config, radio).await?;
//! gateway.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::events::EventLogger;
use crate::link::{LinkHandle, RadioLink};
use crate::server::{FanoutServer, ServerHandle};
use crate::transport::RadioTransport;

/// A bound, not yet running gateway
pub struct Gateway<T: RadioTransport> {
    config: GatewayConfig,
    listener: TcpListener,
    link: RadioLink<T>,
    link_handle: LinkHandle,
    server: FanoutServer,
    server_handle: ServerHandle,
}

impl<T: RadioTransport + 'static> Gateway<T> {
    /// Bind the TCP listener and assemble the gateway around `transport`
    ///
    /// Fails with [`GatewayError::Bind`] if the address is unavailable. The
    /// radio is not contacted until [`Gateway::run`].
    pub async fn bind(config: GatewayConfig, transport: T) -> Result<Self> {
        let addr = config.server.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let (inbound_tx, inbound_rx) = mpsc::channel(config.server.inbound_queue_size.max(1));
        let (link, link_handle) = RadioLink::new(transport, config.reconnect.clone(), inbound_tx);
        let (server, server_handle) = FanoutServer::new(
            config.server.clone(),
            link_handle.clone(),
            EventLogger::new(config.events),
            inbound_rx,
        );

        Ok(Self {
            config,
            listener,
            link,
            link_handle,
            server,
            server_handle,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the radio link
    pub fn link_handle(&self) -> LinkHandle {
        self.link_handle.clone()
    }

    /// Handle to the fan-out server
    pub fn server_handle(&self) -> ServerHandle {
        self.server_handle.clone()
    }

    /// Run until `shutdown` completes, then shut down in order
    ///
    /// Shutdown stops accepting clients, closes every client connection,
    /// stops the reconnect loop and disconnects the radio.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            listener,
            link,
            link_handle,
            server,
            ..
        } = self;

        info!(
            interface = config.interface.kind(),
            target = %config.interface.target(),
            "Starting MeshCore gateway"
        );
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "TCP server listening");
        }

        let mut link_task = tokio::spawn(link.run());

        server.run(listener, shutdown).await;

        link_handle.shutdown().await;
        match timeout(config.server.shutdown_timeout, &mut link_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Radio link task failed"),
            Err(_) => {
                warn!(
                    timeout = ?config.server.shutdown_timeout,
                    "Radio link did not stop in time, aborting"
                );
                link_task.abort();
            }
        }

        info!("MeshCore gateway stopped");
        Ok(())
    }
}
