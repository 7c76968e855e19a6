//! QUIC Transport
//!
//! TLS-terminated transport carrying many bidirectional streams per
//! connection. Every accepted stream runs the same frame pipeline as a TCP
//! connection and stays open for further requests: a stream is a session,
//! not a one-shot exchange.
//!
//! Normal connection close and "server is closing" are expected events, not
//! errors; only genuine faults are logged above debug.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quinn::crypto::rustls::QuicServerConfig;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::handlers::HandlerRegistry;
use crate::transport::conn::{log_stream_end, serve_stream, ReadFraming};
use crate::transport::tls::{self, TlsSettings};
use crate::transport::{Transport, TransportError, TransportKind, TransportState, DRAIN_GRACE};

/// Application close code for an orderly server shutdown.
const CLOSE_SERVER_SHUTDOWN: u32 = 0;

pub struct QuicTransport {
    listen_addr: String,
    tls: TlsSettings,
    registry: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: Mutex<TransportState>,
    endpoint: Mutex<Option<quinn::Endpoint>>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl QuicTransport {
    pub fn new(
        listen_addr: impl Into<String>,
        tls: TlsSettings,
        registry: Arc<HandlerRegistry>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            tls,
            registry,
            shutdown: parent.child_token(),
            tracker: TaskTracker::new(),
            state: Mutex::new(TransportState::Unbound),
            endpoint: Mutex::new(None),
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
impl Transport for QuicTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Quic
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

        let result = self.bind_endpoint();
        let endpoint = match result {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.set_state(TransportState::Unbound);
                return Err(e);
            }
        };

        if let Ok(local) = endpoint.local_addr() {
            *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local);
        }
        *self.endpoint.lock().unwrap_or_else(|e| e.into_inner()) = Some(endpoint.clone());
        self.set_state(TransportState::Listening);
        info!(addr = %self.addr(), "QUIC transport listening");

        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        self.tracker.spawn(async move {
            loop {
                let incoming = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    incoming = endpoint.accept() => match incoming {
                        Some(incoming) => incoming,
                        // Endpoint closed.
                        None => break,
                    },
                };

                let registry = Arc::clone(&registry);
                let shutdown = shutdown.clone();
                let conn_tracker = tracker.clone();
                tracker.spawn(async move {
                    handle_connection(incoming, registry, shutdown, conn_tracker).await;
                });
            }
            debug!("QUIC accept loop exited");
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
        info!(addr = %self.addr(), "QUIC transport draining");

        self.shutdown.cancel();
        if let Some(endpoint) = self
            .endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            endpoint.close(CLOSE_SERVER_SHUTDOWN.into(), b"server closing");
        }

        self.tracker.close();
        let drained = tokio::time::timeout(DRAIN_GRACE, self.tracker.wait()).await;
        self.set_state(TransportState::Stopped);

        match drained {
            Ok(()) => {
                info!(addr = %self.addr(), "QUIC transport stopped");
                Ok(())
            }
            Err(_) => Err(TransportError::StopTimeout(DRAIN_GRACE)),
        }
    }
}

impl QuicTransport {
    fn bind_endpoint(&self) -> Result<quinn::Endpoint, TransportError> {
        let rustls_config = tls::build_server_config(&self.tls)?;
        let crypto = QuicServerConfig::try_from(rustls_config)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));

        let addr: SocketAddr = self.listen_addr.parse().map_err(|e| {
            TransportError::BindFailed {
                addr: self.listen_addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            }
        })?;

        quinn::Endpoint::server(server_config, addr).map_err(|source| TransportError::BindFailed {
            addr: self.listen_addr.clone(),
            source,
        })
    }
}

/// Completes the handshake, then accepts streams until the connection ends.
async fn handle_connection(
    incoming: quinn::Incoming,
    registry: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let connection = match incoming.await {
        Ok(connection) => connection,
        // Failed handshakes are expected events (probes, mismatched ALPN).
        Err(e) => {
            let err = TransportError::TlsHandshakeFailed(e.to_string());
            debug!(error = %err, "QUIC handshake did not complete");
            return;
        }
    };

    let peer = connection.remote_address().to_string();
    debug!(client = %peer, "QUIC connection established");

    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => {
                connection.close(CLOSE_SERVER_SHUTDOWN.into(), b"server closing");
                return;
            }
            res = connection.accept_bi() => match res {
                Ok(stream) => stream,
                Err(
                    quinn::ConnectionError::LocallyClosed
                    | quinn::ConnectionError::ApplicationClosed(_)
                    | quinn::ConnectionError::ConnectionClosed(_),
                ) => {
                    debug!(client = %peer, "QUIC connection closed");
                    return;
                }
                Err(e) => {
                    warn!(client = %peer, error = %e, "QUIC connection lost");
                    return;
                }
            },
        };

        let (send, recv) = stream;
        let registry = Arc::clone(&registry);
        let shutdown = shutdown.clone();
        let peer = peer.clone();
        tracker.spawn(async move {
            // Each stream is its own request pipeline and stays open for
            // further frames.
            let result = serve_stream(
                tokio::io::join(recv, send),
                &peer,
                &registry,
                &shutdown,
                ReadFraming::LengthPrefixed,
            )
            .await;
            log_stream_end(&peer, result);
        });
    }
}
