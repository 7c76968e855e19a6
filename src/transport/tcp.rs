//! TCP Transport
//!
//! Accept loop plus one task per connection. Connections stay open across
//! frames; read replies carry the big-endian length prefix so clients can
//! frame them.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::handlers::HandlerRegistry;
use crate::transport::conn::{log_stream_end, serve_stream, ReadFraming};
use crate::transport::{Transport, TransportError, TransportKind, TransportState, DRAIN_GRACE};

pub struct TcpTransport {
    listen_addr: String,
    registry: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: Mutex<TransportState>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    /// Builds a transport that will listen on `listen_addr`.
    ///
    /// `parent` is the server-wide cancellation token; this transport derives
    /// a child so it can also be stopped individually.
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

    /// The actually bound socket address, once Listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: TransportState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
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

        let listener = match TcpListener::bind(&self.listen_addr).await {
            Ok(l) => l,
            Err(source) => {
                self.set_state(TransportState::Unbound);
                return Err(TransportError::BindFailed {
                    addr: self.listen_addr.clone(),
                    source,
                });
            }
        };

        if let Ok(local) = listener.local_addr() {
            *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local);
        }
        self.set_state(TransportState::Listening);
        info!(addr = %self.addr(), "TCP transport listening");

        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    res = listener.accept() => match res {
                        Ok((stream, peer)) => {
                            debug!(client = %peer, "Accepted TCP connection");
                            let _ = stream.set_nodelay(true);
                            let registry = Arc::clone(&registry);
                            let shutdown = shutdown.clone();
                            tracker.spawn(async move {
                                let peer = peer.to_string();
                                let result = serve_stream(
                                    stream,
                                    &peer,
                                    &registry,
                                    &shutdown,
                                    ReadFraming::LengthPrefixed,
                                )
                                .await;
                                log_stream_end(&peer, result);
                            });
                        }
                        Err(e) => {
                            error!(error = %TransportError::AcceptFailed(e), "TCP accept failed");
                        }
                    }
                }
            }
            debug!("TCP accept loop exited");
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
        info!(addr = %self.addr(), "TCP transport draining");

        self.shutdown.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(DRAIN_GRACE, self.tracker.wait()).await;
        self.set_state(TransportState::Stopped);

        match drained {
            Ok(()) => {
                info!(addr = %self.addr(), "TCP transport stopped");
                Ok(())
            }
            Err(_) => Err(TransportError::StopTimeout(DRAIN_GRACE)),
        }
    }
}
