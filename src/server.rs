//! Server Composition and Lifecycle
//!
//! Wires the pieces together from configuration: stores, batch writer,
//! handler registry, and transports. Startup succeeds only when every
//! configured transport reached Listening; shutdown runs in dependency
//! order: transports first (refuse new work, drain in-flight handlers), then
//! the batch writer (final flush), then the stores.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, TransportConfig};
use crate::handlers::{HandlerRegistry, ReadHandler, RegistryError, WriteHandler};
use crate::protocol::HandlerKind;
use crate::storage::{BatchWriter, StoreManager, StoreManagerError, WriterError};
use crate::transport::{
    QuicTransport, TcpTransport, TransportError, TransportKind, TransportManager, UdpTransport,
    UdsTransport,
};

/// Errors from building or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreManagerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// A fully wired server instance.
pub struct Server {
    stores: StoreManager,
    writer: Arc<BatchWriter>,
    transports: TransportManager,
    enabled: Vec<TransportKind>,
    shutdown: CancellationToken,
}

impl Server {
    /// Builds every component from `config`. Engines are opened and writer
    /// workers spawned here; nothing is listening until [`start`].
    ///
    /// [`start`]: Server::start
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        let stores = StoreManager::from_configs(&config.stores)?;
        let store = stores.get(&config.writer.store)?;

        let writer = Arc::new(BatchWriter::new(
            Arc::clone(&store),
            config.writer.to_writer_config(),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register(HandlerKind::Write, Arc::new(WriteHandler::new(writer.clone())))?;
        registry.register(HandlerKind::Read, Arc::new(ReadHandler::new(store)))?;
        let registry = Arc::new(registry);

        let shutdown = CancellationToken::new();
        let mut transports = TransportManager::new();
        let mut enabled = Vec::new();

        for transport_config in &config.transports {
            let transport: Arc<dyn crate::transport::Transport> = match transport_config {
                TransportConfig::Udp { .. } => Arc::new(UdpTransport::new(
                    transport_config.addr(),
                    Arc::clone(&registry),
                    &shutdown,
                )),
                TransportConfig::Tcp { .. } => Arc::new(TcpTransport::new(
                    transport_config.addr(),
                    Arc::clone(&registry),
                    &shutdown,
                )),
                TransportConfig::Uds { path } => Arc::new(UdsTransport::new(
                    path.clone(),
                    Arc::clone(&registry),
                    &shutdown,
                )),
                TransportConfig::Quic { tls, .. } => Arc::new(QuicTransport::new(
                    transport_config.addr(),
                    tls.clone(),
                    Arc::clone(&registry),
                    &shutdown,
                )),
            };
            enabled.push(transport.kind());
            transports.register(transport)?;
        }

        Ok(Self {
            stores,
            writer,
            transports,
            enabled,
            shutdown,
        })
    }

    /// Starts every configured transport. A bind failure stops whatever had
    /// already started and surfaces the error.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.transports.start(&self.enabled).await?;
        info!(transports = self.enabled.len(), "Server started");
        Ok(())
    }

    /// Ordered shutdown: drain transports, flush the batch writer last, close
    /// the stores. Safe to call more than once.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.shutdown.cancel();

        let transport_result = self.transports.stop(&self.enabled).await;
        let writer_result = self.writer.flush_and_stop().await;
        let store_result = self.stores.close_all();

        transport_result?;
        writer_result?;
        store_result?;
        info!("Server stopped");
        Ok(())
    }

    /// The batch writer shared with the write handler.
    pub fn writer(&self) -> &Arc<BatchWriter> {
        &self.writer
    }

    /// The bound address of a configured transport, for clients and tests.
    pub fn transport_addr(&self, kind: TransportKind) -> Option<String> {
        self.transports.get(kind).ok().map(|t| t.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoggerConfig, StoreConfig, WriterSettings};
    use crate::protocol::{encode, Request, ACK_OK, KEY_LEN};
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config(store_dir: &std::path::Path) -> Config {
        Config {
            logger: LoggerConfig::default(),
            transports: vec![
                TransportConfig::Tcp {
                    host: "127.0.0.1".into(),
                    port: 0,
                },
                TransportConfig::Udp {
                    host: "127.0.0.1".into(),
                    port: 0,
                },
            ],
            stores: vec![StoreConfig {
                name: "default".into(),
                path: store_dir.to_path_buf(),
            }],
            writer: WriterSettings {
                flush_interval_ms: 20,
                workers: 2,
                ..WriterSettings::default()
            },
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_end_to_end_over_tcp() {
        let dir = tempdir().unwrap();
        let server = Server::new(&test_config(dir.path())).unwrap();
        server.start().await.unwrap();

        let addr = server.transport_addr(TransportKind::Tcp).unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();

        let key = [0x77u8; KEY_LEN];
        client
            .write_all(&encode(&Request::write(key, b"end to end")))
            .await
            .unwrap();
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack[0], ACK_OK);

        tokio::time::sleep(Duration::from_millis(100)).await;

        client.write_all(&encode(&Request::read(key))).await.unwrap();
        let mut len_be = [0u8; 4];
        client.read_exact(&mut len_be).await.unwrap();
        let mut value = vec![0u8; u32::from_be_bytes(len_be) as usize];
        client.read_exact(&mut value).await.unwrap();
        assert_eq!(&value, b"end to end");

        server.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_is_idempotent() {
        let dir = tempdir().unwrap();
        let server = Server::new(&test_config(dir.path())).unwrap();
        server.start().await.unwrap();

        server.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_buffered_writes_survive_stop() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        // A long interval: nothing flushes until stop drains the shards.
        config.writer.flush_interval_ms = 60_000;
        let server = Server::new(&config).unwrap();
        server.start().await.unwrap();

        for i in 0..200u32 {
            let mut key = [0u8; KEY_LEN];
            key[..4].copy_from_slice(&i.to_be_bytes());
            key[0] = (i % 256) as u8;
            server
                .writer()
                .buffer_write(key, Bytes::from(format!("v{i}")))
                .await
                .unwrap();
        }
        server.stop().await.unwrap();
        // Release the engine's file lock before reopening.
        drop(server);

        let store = crate::storage::SledStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unknown_writer_store_fails_construction() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.writer.store = "nonexistent".into();
        assert!(matches!(
            Server::new(&config),
            Err(ServerError::Store(StoreManagerError::NotFound(_)))
        ));
    }
}
