//! Transport Module
//!
//! Four accepting endpoints share one contract: bytes arrive, the codec
//! decodes them, the registry dispatches them, and the response goes back the
//! way the request came.
//!
//! ```text
//! ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌──────────┐
//! │   UDP   │  │   TCP   │  │   UDS   │  │   QUIC   │
//! │ datagram│  │ stream  │  │ stream  │  │ streams  │
//! └────┬────┘  └────┬────┘  └────┬────┘  └────┬─────┘
//!      └────────────┴─────┬──────┴────────────┘
//!                         ▼
//!              decode → dispatch → respond
//! ```
//!
//! Every transport is an explicit async state machine
//! (`Unbound → Listening → Draining → Stopped`) constructed with the
//! narrowest capabilities it needs: the frozen handler registry and a
//! cancellation token. `start` returns once the listener is bound and the
//! accept loop is running; `stop` refuses new work immediately and waits a
//! bounded grace for in-flight handlers.

pub mod conn;
pub mod manager;
pub mod pool;
pub mod quic;
pub mod tcp;
pub mod tls;
pub mod udp;
pub mod uds;

pub use manager::TransportManager;
pub use quic::QuicTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;
pub use uds::UdsTransport;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Largest payload a single frame may declare. Anything bigger is treated as
/// a framing error rather than an allocation request.
pub const MAX_DATA_LEN: usize = 16 * 1024 * 1024;

/// How long `stop` waits for in-flight handlers before giving up.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// The transport families the server can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Tcp,
    Uds,
    Quic,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Uds => "uds",
            TransportKind::Quic => "quic",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by transports and the transport manager.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },

    /// The accept loop hit a non-recoverable error.
    #[error("accept failed: {0}")]
    AcceptFailed(std::io::Error),

    /// A socket read failed mid-stream.
    #[error("read failed: {0}")]
    ReadFailed(std::io::Error),

    /// A socket write failed mid-stream.
    #[error("write failed: {0}")]
    WriteFailed(std::io::Error),

    /// The peer went away mid-frame. A close at a frame boundary is a normal
    /// event, not this error.
    #[error("peer closed the connection mid-frame")]
    PeerClosed,

    /// The TLS handshake did not complete. Treated as an expected event.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// TLS material could not be loaded or was rejected.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// A transport did not reach Listening within the startup bound.
    #[error("transport did not start within {0:?}")]
    StartTimeout(Duration),

    /// `start` was called on a transport that is not in the unbound state.
    #[error("transport already started")]
    AlreadyStarted,

    /// A transport was requested that the manager does not hold.
    #[error("transport not registered: {0}")]
    NotRegistered(TransportKind),

    /// A transport of this kind is already registered with the manager.
    #[error("transport already registered: {0}")]
    AlreadyRegistered(TransportKind),

    /// In-flight work did not drain within the grace window.
    #[error("transport stop timed out after {0:?}")]
    StopTimeout(Duration),
}

/// Lifecycle states of a transport instance. `Stopped` is terminal; a failed
/// bind falls back to `Unbound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportState {
    Unbound,
    Bound,
    Listening,
    Draining,
    Stopped,
}

/// The contract every transport implements.
///
/// `start` must return only once the listener is bound and accepting (so a
/// manager-level success means every requested transport reached Listening).
/// `stop` is idempotent: once stopped, further calls are no-ops.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which family this instance belongs to.
    fn kind(&self) -> TransportKind;

    /// The endpoint this transport serves, as a display string. After a
    /// successful `start` this reflects the actually bound address.
    fn addr(&self) -> String;

    /// Binds the endpoint and spawns the accept loop.
    async fn start(&self) -> Result<(), TransportError>;

    /// Refuses new work, drains in-flight handlers (bounded), releases the
    /// endpoint.
    async fn stop(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_matches_config_names() {
        assert_eq!(TransportKind::Udp.to_string(), "udp");
        assert_eq!(TransportKind::Tcp.to_string(), "tcp");
        assert_eq!(TransportKind::Uds.to_string(), "uds");
        assert_eq!(TransportKind::Quic.to_string(), "quic");
    }

    #[test]
    fn test_kind_deserializes_from_lowercase() {
        let kind: TransportKind = serde_yaml::from_str("quic").unwrap();
        assert_eq!(kind, TransportKind::Quic);
        assert!(serde_yaml::from_str::<TransportKind>("carrier-pigeon").is_err());
    }
}
