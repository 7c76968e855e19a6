//! Request Handlers
//!
//! A handler consumes a decoded request together with a [`ConnectionContext`]
//! through which it answers the peer. Transports stay protocol-agnostic: they
//! decode frames and hand them to whatever the registry returns for the
//! opcode.
//!
//! The context abstracts the two response shapes the transports need:
//! datagram replies (one packet back to the sender) and stream replies
//! (written to the connection or QUIC stream the request arrived on). Stream
//! transports that frame read replies set the length-prefix flag at
//! construction; the read handler consults it.

pub mod read;
pub mod registry;
pub mod write;

pub use read::ReadHandler;
pub use registry::{HandlerRegistry, RegistryError};
pub use write::WriteHandler;

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

use crate::protocol::{HandlerKind, Request};
use crate::storage::{StoreError, WriterError};

/// Errors a handler can surface to its transport.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Writing the response back to the peer failed.
    #[error("failed to write response: {0}")]
    Respond(#[from] std::io::Error),

    /// No handler is registered for the requested kind.
    #[error("no handler registered for {0} requests")]
    NoHandler(HandlerKind),

    /// The engine failed underneath a read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The batch writer refused the write.
    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// A registered request handler.
///
/// Implementations own their dependencies (store handle, batch writer) and are
/// shared across every transport via `Arc`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut ConnectionContext<'_>,
        request: Request<'_>,
    ) -> Result<(), HandlerError>;
}

/// Where a response goes.
enum ResponseSink<'a> {
    /// One datagram back to the sender.
    Datagram {
        socket: &'a UdpSocket,
        peer: SocketAddr,
    },
    /// Bytes onto the stream the request arrived on.
    Stream {
        writer: &'a mut (dyn AsyncWrite + Unpin + Send),
    },
}

/// The capability a handler gets for answering one request.
pub struct ConnectionContext<'a> {
    sink: ResponseSink<'a>,
    length_prefixed_reads: bool,
}

impl<'a> ConnectionContext<'a> {
    /// Context for a datagram transport: replies are single packets, read
    /// replies carry the raw value.
    pub fn datagram(socket: &'a UdpSocket, peer: SocketAddr) -> Self {
        Self {
            sink: ResponseSink::Datagram { socket, peer },
            length_prefixed_reads: false,
        }
    }

    /// Context for a stream transport whose read replies are framed with a
    /// big-endian length prefix (TCP, QUIC).
    pub fn stream(writer: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self {
            sink: ResponseSink::Stream { writer },
            length_prefixed_reads: true,
        }
    }

    /// Context for a stream transport whose read replies are raw value bytes
    /// (UDS keeps the datagram-style reply contract).
    pub fn stream_raw(writer: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self {
            sink: ResponseSink::Stream { writer },
            length_prefixed_reads: false,
        }
    }

    /// Whether read replies on this connection carry a length prefix.
    pub fn length_prefixed_reads(&self) -> bool {
        self.length_prefixed_reads
    }

    /// Sends `bytes` to the peer as-is.
    pub async fn respond(&mut self, bytes: &[u8]) -> Result<(), HandlerError> {
        match &mut self.sink {
            ResponseSink::Datagram { socket, peer } => {
                socket.send_to(bytes, *peer).await?;
            }
            ResponseSink::Stream { writer } => {
                writer.write_all(bytes).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Sends a big-endian u32 length followed by `bytes`, so the peer can
    /// frame the reply.
    pub async fn respond_with_length_prefix(&mut self, bytes: &[u8]) -> Result<(), HandlerError> {
        let len = (bytes.len() as u32).to_be_bytes();
        match &mut self.sink {
            ResponseSink::Datagram { socket, peer } => {
                let mut framed = Vec::with_capacity(4 + bytes.len());
                framed.extend_from_slice(&len);
                framed.extend_from_slice(bytes);
                socket.send_to(&framed, *peer).await?;
            }
            ResponseSink::Stream { writer } => {
                writer.write_all(&len).await?;
                writer.write_all(bytes).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }
}
