//! TCP fan-out server
//!
//! One event loop owns the session registry. It accepts clients, broadcasts
//! every radio payload to all of them and evicts sessions whose sockets fail.
//! Each client gets a reader task that decodes frames and forwards them to
//! the radio link.
//!
//! ```text
//!  client A --frames--> reader A --+
//!  client B --frames--> reader B --+--> LinkHandle::send --> radio
//!
//!  radio --> inbound channel --> event loop --encode once--> A, B, ...
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{encode_frame, FrameDecoder};
use crate::config::ServerConfig;
use crate::decoder::Direction;
use crate::error::{GatewayError, Result};
use crate::events::EventLogger;
use crate::link::LinkHandle;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Notifications from reader tasks to the event loop
#[derive(Debug)]
enum ServerEvent {
    /// A client's reader finished (EOF or read error)
    ClientClosed { addr: SocketAddr, id: u64 },
}

/// One connected TCP client as held by the event loop
struct ClientSession {
    id: u64,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

/// Observer for a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    clients_rx: watch::Receiver<usize>,
}

impl ServerHandle {
    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        *self.clients_rx.borrow()
    }

    /// Wait until exactly `count` clients are connected
    pub async fn wait_for_clients(&self, count: usize) -> Result<()> {
        let mut rx = self.clients_rx.clone();
        rx.wait_for(|n| *n == count)
            .await
            .map(|_| ())
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

/// Fan-out server between TCP clients and the radio link
pub struct FanoutServer {
    config: ServerConfig,
    link: LinkHandle,
    events: EventLogger,
    inbound_rx: mpsc::Receiver<Bytes>,
    sessions: HashMap<SocketAddr, ClientSession>,
    next_id: u64,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    clients_tx: watch::Sender<usize>,
}

impl FanoutServer {
    /// Create a server forwarding to `link` and broadcasting `inbound_rx`
    pub fn new(
        config: ServerConfig,
        link: LinkHandle,
        events: EventLogger,
        inbound_rx: mpsc::Receiver<Bytes>,
    ) -> (Self, ServerHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (clients_tx, clients_rx) = watch::channel(0);

        let server = Self {
            config,
            link,
            events,
            inbound_rx,
            sessions: HashMap::new(),
            next_id: 0,
            event_tx,
            event_rx,
            clients_tx,
        };

        (server, ServerHandle { clients_rx })
    }

    /// Serve clients on `listener` until `shutdown` completes
    ///
    /// On shutdown the listener is closed first, then every client is
    /// evicted.
    pub async fn run<F>(mut self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutdown requested");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.register(stream, addr),
                    Err(e) => {
                        // Usually fd exhaustion; retrying at once would spin
                        warn!(error = %e, "Failed to accept client");
                        sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },

                Some(payload) = self.inbound_rx.recv() => {
                    self.broadcast(payload).await;
                }

                Some(event) = self.event_rx.recv() => match event {
                    ServerEvent::ClientClosed { addr, id } => self.evict(addr, Some(id)).await,
                },
            }
        }

        // Stop accepting before tearing down the sessions
        drop(listener);

        let addrs: Vec<SocketAddr> = self.sessions.keys().copied().collect();
        for addr in addrs {
            self.evict(addr, None).await;
        }
        info!("TCP server stopped");
    }

    fn register(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = self.next_id;
        self.next_id += 1;

        let (read_half, writer) = stream.into_split();
        let reader = tokio::spawn(client_reader(
            addr,
            id,
            read_half,
            self.link.clone(),
            self.events,
            self.event_tx.clone(),
            self.config.read_buffer_size,
        ));

        // A reused address means the old session is gone
        if let Some(stale) = self.sessions.insert(addr, ClientSession { id, writer, reader }) {
            stale.reader.abort();
        }
        self.publish_count();
        info!(client = %addr, clients = self.sessions.len(), "Client connected");
    }

    /// Log, frame once and write a radio payload to every client
    async fn broadcast(&mut self, payload: Bytes) {
        self.events.log(Direction::FromRadio, &payload);

        let frame = match encode_frame(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Dropping radio payload that cannot be framed");
                return;
            }
        };

        let mut failed = Vec::new();
        for (addr, session) in self.sessions.iter_mut() {
            match timeout(self.config.write_timeout, session.writer.write_all(&frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(client = %addr, error = %e, "Failed to forward to client");
                    failed.push(*addr);
                }
                Err(_) => {
                    warn!(client = %addr, "Timed out forwarding to client");
                    failed.push(*addr);
                }
            }
        }
        trace!(
            size = payload.len(),
            clients = self.sessions.len() - failed.len(),
            "Broadcast radio payload"
        );

        for addr in failed {
            self.evict(addr, None).await;
        }
    }

    /// Remove a session and close its socket
    ///
    /// With `id` set, only the session with that id is removed. Evicting an
    /// unknown client is a no-op.
    async fn evict(&mut self, addr: SocketAddr, id: Option<u64>) {
        match (self.sessions.get(&addr), id) {
            (None, _) => return,
            (Some(session), Some(id)) if session.id != id => return,
            _ => {}
        }
        let Some(mut session) = self.sessions.remove(&addr) else {
            return;
        };

        session.reader.abort();
        match timeout(self.config.close_timeout, session.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(client = %addr, error = %e, "Error closing client socket"),
            Err(_) => debug!(client = %addr, "Timed out closing client socket"),
        }

        self.publish_count();
        info!(client = %addr, clients = self.sessions.len(), "Client disconnected");
    }

    fn publish_count(&self) {
        self.clients_tx.send_replace(self.sessions.len());
    }
}

/// Per-client receive loop
async fn client_reader(
    addr: SocketAddr,
    id: u64,
    mut reader: OwnedReadHalf,
    link: LinkHandle,
    events: EventLogger,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    read_buffer_size: usize,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; read_buffer_size.max(1)];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(client = %addr, "Client closed connection");
                break;
            }
            Ok(n) => {
                for payload in decoder.push(&buf[..n]) {
                    events.log(Direction::ToRadio, &payload);
                    if let Err(e) = link.send(payload).await {
                        warn!(client = %addr, error = %e, "Failed to forward frame to radio");
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %addr, "Client connection reset");
                break;
            }
            Err(e) => {
                warn!(client = %addr, error = %e, "Error reading from client");
                break;
            }
        }
    }

    if !decoder.is_idle() {
        debug!(client = %addr, buffered = decoder.buffered(), "Discarding partial frame");
    }
    let _ = event_tx.send(ServerEvent::ClientClosed { addr, id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventLogConfig, ReconnectConfig};
    use crate::link::RadioLink;
    use crate::test_utils::{MockTransport, MockTransportHandle};
    use crate::transport::LinkState;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        addr: SocketAddr,
        server: ServerHandle,
        radio: MockTransportHandle,
        link: LinkHandle,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    }

    async fn start() -> Harness {
        let (transport, radio) = MockTransport::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (link, _link_task) = RadioLink::spawn(transport, ReconnectConfig::default(), inbound_tx);
        link.wait_for_state(LinkState::Connected).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (fanout, server) = FanoutServer::new(
            ServerConfig::default(),
            link.clone(),
            EventLogger::new(EventLogConfig::default()),
            inbound_rx,
        );
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(fanout.run(listener, async {
            let _ = stop_rx.await;
        }));

        Harness {
            addr,
            server,
            radio,
            link,
            stop,
            task,
        }
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 3];
        timeout(WAIT, stream.read_exact(&mut header))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header[0], 0x3C);
        let len = u16::from_le_bytes([header[1], header[2]]) as usize;
        let mut payload = vec![0u8; len];
        timeout(WAIT, stream.read_exact(&mut payload))
            .await
            .unwrap()
            .unwrap();
        payload
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let h = start().await;
        let mut a = TcpStream::connect(h.addr).await.unwrap();
        let mut b = TcpStream::connect(h.addr).await.unwrap();
        timeout(WAIT, h.server.wait_for_clients(2)).await.unwrap().unwrap();

        h.radio.inject(vec![0x83]);
        h.radio.inject(vec![0x0C, 0x04, 0x10]);

        for client in [&mut a, &mut b] {
            assert_eq!(read_frame(client).await, vec![0x83]);
            assert_eq!(read_frame(client).await, vec![0x0C, 0x04, 0x10]);
        }
    }

    #[tokio::test]
    async fn test_split_frames_reach_radio() {
        let h = start().await;
        let mut client = TcpStream::connect(h.addr).await.unwrap();

        let mut wire = encode_frame(&[0x08, b'A', b'l', b'i', b'c', b'e']).unwrap().to_vec();
        wire.extend_from_slice(&encode_frame(&[0x16, 0x03]).unwrap());
        for chunk in wire.chunks(2) {
            client.write_all(chunk).await.unwrap();
            client.flush().await.unwrap();
        }

        let sent = h.radio.wait_for_sent(2, WAIT).await.unwrap();
        assert_eq!(sent[0].as_ref(), b"\x08Alice");
        assert_eq!(sent[1].as_ref(), &[0x16, 0x03]);
    }

    #[tokio::test]
    async fn test_closed_client_is_evicted() {
        let h = start().await;
        let a = TcpStream::connect(h.addr).await.unwrap();
        let mut b = TcpStream::connect(h.addr).await.unwrap();
        timeout(WAIT, h.server.wait_for_clients(2)).await.unwrap().unwrap();

        drop(a);
        timeout(WAIT, h.server.wait_for_clients(1)).await.unwrap().unwrap();

        h.radio.inject(vec![0x82]);
        assert_eq!(read_frame(&mut b).await, vec![0x82]);
        assert_eq!(h.server.client_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let h = start().await;
        let mut client = TcpStream::connect(h.addr).await.unwrap();
        timeout(WAIT, h.server.wait_for_clients(1)).await.unwrap().unwrap();

        h.stop.send(()).unwrap();
        timeout(WAIT, h.task).await.unwrap().unwrap();

        let mut buf = [0u8; 1];
        let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap_or(0);
        assert_eq!(n, 0);
        assert!(TcpStream::connect(h.addr).await.is_err());
        assert!(h.link.is_connected());
    }
}
