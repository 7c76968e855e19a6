//! UDP Transport
//!
//! One socket, no per-client state. Each datagram is one complete frame:
//! decode it, run the handler to completion, answer with a single packet.
//! Receive buffers come from a pool and go back when the guard drops, after
//! the handler has finished with the borrowed payload.
//!
//! Framing errors are answered with the error byte and logged; the socket
//! always stays open.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::handlers::{ConnectionContext, HandlerRegistry};
use crate::protocol::{decode, ACK_ERR};
use crate::transport::pool::BufferPool;
use crate::transport::{Transport, TransportError, TransportKind, TransportState, DRAIN_GRACE};

/// Receive buffer size. Covers the largest UDP payload, so oversized
/// datagrams cannot arrive truncated unnoticed.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Buffers retained by the pool between datagrams.
const POOLED_BUFFERS: usize = 32;

pub struct UdpTransport {
    listen_addr: String,
    registry: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: Mutex<TransportState>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl UdpTransport {
    pub fn new(
        listen_addr: impl Into<String>,
        registry: Arc<HandlerRegistry>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            registry,
            shutdown: parent.child_token(),
            tracker: TaskTracker::new(),
            state: Mutex::new(TransportState::Unbound),
            bound_addr: Mutex::new(None),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: TransportState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn addr(&self) -> String {
        self.local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| self.listen_addr.clone())
    }

    async fn start(&self) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != TransportState::Unbound {
                return Err(TransportError::AlreadyStarted);
            }
            *state = TransportState::Bound;
        }

        let socket = match UdpSocket::bind(&self.listen_addr).await {
            Ok(s) => Arc::new(s),
            Err(source) => {
                self.set_state(TransportState::Unbound);
                return Err(TransportError::BindFailed {
                    addr: self.listen_addr.clone(),
                    source,
                });
            }
        };

        if let Ok(local) = socket.local_addr() {
            *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local);
        }
        self.set_state(TransportState::Listening);
        info!(addr = %self.addr(), "UDP transport listening");

        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let pool = BufferPool::new(RECV_BUFFER_SIZE, POOLED_BUFFERS);
        self.tracker.spawn(async move {
            loop {
                // One owner at a time; the guard returns the buffer at the
                // end of each iteration, after the handler has completed.
                let mut buf = pool.acquire();

                let (len, peer) = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    res = socket.recv_from(&mut buf) => match res {
                        Ok(received) => received,
                        Err(e) => {
                            error!(error = %TransportError::ReadFailed(e), "UDP receive failed");
                            continue;
                        }
                    },
                };

                if len >= buf.len() {
                    warn!(client = %peer, len, "Datagram exceeds receive buffer, dropped");
                    continue;
                }

                match decode(&buf[..len]) {
                    Ok(request) => {
                        let mut ctx = ConnectionContext::datagram(&socket, peer);
                        if let Err(e) = registry.dispatch(&mut ctx, request).await {
                            debug!(client = %peer, error = %e, "Datagram handler failed");
                        }
                    }
                    Err(e) => {
                        // Log and answer; never close the socket over framing.
                        warn!(client = %peer, error = %e, "Malformed datagram");
                        let _ = socket.send_to(&[ACK_ERR], peer).await;
                    }
                }
            }
            debug!("UDP receive loop exited");
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != TransportState::Listening {
                return Ok(());
            }
            *state = TransportState::Draining;
        }
        info!(addr = %self.addr(), "UDP transport draining");

        self.shutdown.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(DRAIN_GRACE, self.tracker.wait()).await;
        self.set_state(TransportState::Stopped);

        match drained {
            Ok(()) => {
                info!(addr = %self.addr(), "UDP transport stopped");
                Ok(())
            }
            Err(_) => Err(TransportError::StopTimeout(DRAIN_GRACE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{ReadHandler, WriteHandler};
    use crate::protocol::{encode, HandlerKind, Request, ACK_OK, KEY_LEN, MISS_MARKER};
    use crate::storage::{BatchWriter, KvStore, SledStore, WriterConfig};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn start_transport() -> (Arc<UdpTransport>, Arc<BatchWriter>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store: Arc<dyn KvStore> = Arc::new(SledStore::open(dir.path()).unwrap());
        let writer = Arc::new(BatchWriter::new(
            Arc::clone(&store),
            WriterConfig {
                flush_interval: Duration::from_millis(20),
                worker_count: 2,
                ..WriterConfig::default()
            },
        ));

        let mut registry = HandlerRegistry::new();
        registry
            .register(HandlerKind::Write, Arc::new(WriteHandler::new(writer.clone())))
            .unwrap();
        registry
            .register(HandlerKind::Read, Arc::new(ReadHandler::new(store)))
            .unwrap();

        let root = CancellationToken::new();
        let transport = Arc::new(UdpTransport::new("127.0.0.1:0", Arc::new(registry), &root));
        transport.start().await.unwrap();
        (transport, writer, dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_then_read_over_datagrams() {
        let (transport, writer, _dir) = start_transport().await;
        let addr = transport.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();

        let key = [0u8; KEY_LEN];
        client
            .send(&encode(&Request::write(key, b"benchmark test data")))
            .await
            .unwrap();
        let mut reply = [0u8; 1024];
        let n = client.recv(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], &[ACK_OK]);

        // Wait past the flush interval before reading back.
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.send(&encode(&Request::read(key))).await.unwrap();
        let n = client.recv(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"benchmark test data");

        transport.stop().await.unwrap();
        writer.flush_and_stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_short_datagram_keeps_socket_open() {
        let (transport, writer, _dir) = start_transport().await;
        let addr = transport.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();

        client.send(&[0x57; 20]).await.unwrap();
        let mut reply = [0u8; 1024];
        let n = client.recv(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], &[ACK_ERR]);

        // The loop survives the framing error; a valid request still works.
        let key = [1u8; KEY_LEN];
        client
            .send(&encode(&Request::write(key, b"still alive")))
            .await
            .unwrap();
        let n = client.recv(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], &[ACK_OK]);

        transport.stop().await.unwrap();
        writer.flush_and_stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_read_miss_over_datagram() {
        let (transport, writer, _dir) = start_transport().await;
        let addr = transport.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();

        client
            .send(&encode(&Request::read([0xCC; KEY_LEN])))
            .await
            .unwrap();
        let mut reply = [0u8; 1024];
        let n = client.recv(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], MISS_MARKER);

        transport.stop().await.unwrap();
        writer.flush_and_stop().await.unwrap();
    }
}
