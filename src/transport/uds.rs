//! Unix Domain Socket Transport
//!
//! The same frame pipeline as TCP over a filesystem socket path. Read replies
//! are raw value bytes (the datagram-style reply contract). A stale socket
//! file at the path is removed on start; the file is removed again on stop.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::handlers::HandlerRegistry;
use crate::transport::conn::{log_stream_end, serve_stream, ReadFraming};
use crate::transport::{Transport, TransportError, TransportKind, TransportState, DRAIN_GRACE};

pub struct UdsTransport {
    path: PathBuf,
    registry: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: Mutex<TransportState>,
}

impl UdsTransport {
    pub fn new(
        path: impl Into<PathBuf>,
        registry: Arc<HandlerRegistry>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            registry,
            shutdown: parent.child_token(),
            tracker: TaskTracker::new(),
            state: Mutex::new(TransportState::Unbound),
        }
    }

    fn set_state(&self, next: TransportState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn remove_socket_file(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

#[async_trait]
impl Transport for UdsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Uds
    }

    fn addr(&self) -> String {
        self.path.display().to_string()
    }

    async fn start(&self) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != TransportState::Unbound {
                return Err(TransportError::AlreadyStarted);
            }
            *state = TransportState::Bound;
        }

        // A previous process may have left its socket file behind.
        self.remove_socket_file();

        let listener = match UnixListener::bind(&self.path) {
            Ok(l) => l,
            Err(source) => {
                self.set_state(TransportState::Unbound);
                return Err(TransportError::BindFailed {
                    addr: self.addr(),
                    source,
                });
            }
        };

        self.set_state(TransportState::Listening);
        info!(path = %self.path.display(), "UDS transport listening");

        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();
        let path = self.addr();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    res = listener.accept() => match res {
                        Ok((stream, _addr)) => {
                            debug!(path = %path, "Accepted UDS connection");
                            let registry = Arc::clone(&registry);
                            let shutdown = shutdown.clone();
                            let path = path.clone();
                            tracker.spawn(async move {
                                let result =
                                    serve_stream(stream, &path, &registry, &shutdown, ReadFraming::Raw)
                                        .await;
                                log_stream_end(&path, result);
                            });
                        }
                        Err(e) => {
                            error!(error = %TransportError::AcceptFailed(e), "UDS accept failed");
                        }
                    }
                }
            }
            debug!("UDS accept loop exited");
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
        info!(path = %self.path.display(), "UDS transport draining");

        self.shutdown.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(DRAIN_GRACE, self.tracker.wait()).await;
        self.set_state(TransportState::Stopped);
        self.remove_socket_file();

        match drained {
            Ok(()) => {
                info!(path = %self.path.display(), "UDS transport stopped");
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    async fn start_transport(
        socket_dir: &std::path::Path,
    ) -> (Arc<UdsTransport>, Arc<BatchWriter>, tempfile::TempDir) {
        let store_dir = tempdir().unwrap();
        let store: Arc<dyn KvStore> = Arc::new(SledStore::open(store_dir.path()).unwrap());
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
        let transport = Arc::new(UdsTransport::new(
            socket_dir.join("fluxkv.sock"),
            Arc::new(registry),
            &root,
        ));
        transport.start().await.unwrap();
        (transport, writer, store_dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_then_read_raw_reply() {
        let socket_dir = tempdir().unwrap();
        let (transport, writer, _store_dir) = start_transport(socket_dir.path()).await;

        let mut client = UnixStream::connect(socket_dir.path().join("fluxkv.sock"))
            .await
            .unwrap();
        let key = [0x11u8; KEY_LEN];

        client
            .write_all(&encode(&Request::write(key, b"local value")))
            .await
            .unwrap();
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack[0], ACK_OK);

        tokio::time::sleep(Duration::from_millis(100)).await;

        client.write_all(&encode(&Request::read(key))).await.unwrap();
        // UDS read replies are unframed value bytes.
        let mut value = vec![0u8; 11];
        client.read_exact(&mut value).await.unwrap();
        assert_eq!(&value, b"local value");

        transport.stop().await.unwrap();
        writer.flush_and_stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_miss_marker_on_uds() {
        let socket_dir = tempdir().unwrap();
        let (transport, writer, _store_dir) = start_transport(socket_dir.path()).await;

        let mut client = UnixStream::connect(socket_dir.path().join("fluxkv.sock"))
            .await
            .unwrap();
        client
            .write_all(&encode(&Request::read([0xBB; KEY_LEN])))
            .await
            .unwrap();

        let mut reply = vec![0u8; MISS_MARKER.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, MISS_MARKER);

        transport.stop().await.unwrap();
        writer.flush_and_stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_socket_file_is_replaced() {
        let socket_dir = tempdir().unwrap();
        let path = socket_dir.path().join("fluxkv.sock");
        std::fs::write(&path, b"stale").unwrap();

        let (transport, writer, _store_dir) = start_transport(socket_dir.path()).await;
        assert!(UnixStream::connect(&path).await.is_ok());

        transport.stop().await.unwrap();
        // Stop removes the socket file.
        assert!(!path.exists());
        writer.flush_and_stop().await.unwrap();
    }
}
