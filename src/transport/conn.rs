//! Per-Connection Frame Pipeline
//!
//! The read-decode-dispatch-respond loop shared by every stream-shaped
//! transport (TCP, UDS, and each QUIC stream). The frame is self-delimiting:
//! the fixed header carries the payload length, so the loop reads the header,
//! then exactly `data_len` bytes, then dispatches.
//!
//! Frame errors answer with the generic error byte and close the stream; a
//! failed header read cannot be resynchronized. Responses within one
//! connection are written in request order because the loop is sequential.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handlers::{ConnectionContext, HandlerError, HandlerRegistry};
use crate::protocol::{decode, ACK_ERR, HEADER_LEN};
use crate::transport::{TransportError, MAX_DATA_LEN};

/// Whether read replies on this connection carry a length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFraming {
    /// `be32(value_len) ‖ value` (TCP, QUIC).
    LengthPrefixed,
    /// Raw value bytes (UDS).
    Raw,
}

/// Serves one stream until the peer closes, an error forces a close, or the
/// transport drains.
///
/// Any read that ends short of a complete frame is a framing error: the
/// generic error byte goes out before the stream closes. A drain ends the
/// stream quietly; faults worth logging come back as a [`TransportError`].
pub async fn serve_stream<S>(
    stream: S,
    peer: &str,
    registry: &HandlerRegistry,
    shutdown: &CancellationToken,
    framing: ReadFraming,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut frame = BytesMut::with_capacity(4096);

    loop {
        let mut header = [0u8; HEADER_LEN];
        tokio::select! {
            res = reader.read_exact(&mut header) => match res {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // A fixed-header read that cannot complete is a framing
                    // error: answer with the error byte (the peer's read half
                    // may still be open) and close.
                    debug!(peer, "Peer ended stream before a complete header");
                    send_error_byte(&mut writer).await;
                    return Ok(());
                }
                Err(e) => return Err(TransportError::ReadFailed(e)),
            },
            _ = shutdown.cancelled() => {
                debug!(peer, "Connection draining");
                return Ok(());
            }
        }

        let mut len_be = [0u8; 4];
        len_be.copy_from_slice(&header[HEADER_LEN - 4..]);
        let declared = u32::from_be_bytes(len_be) as usize;

        if declared > MAX_DATA_LEN {
            warn!(peer, declared, "Frame payload exceeds limit");
            send_error_byte(&mut writer).await;
            return Ok(());
        }

        frame.clear();
        frame.extend_from_slice(&header);
        frame.resize(HEADER_LEN + declared, 0);

        if declared > 0 {
            tokio::select! {
                res = reader.read_exact(&mut frame[HEADER_LEN..]) => match res {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        // The frame ended short of its declared payload:
                        // framing error, so the error byte goes out before
                        // the close.
                        send_error_byte(&mut writer).await;
                        return Err(TransportError::PeerClosed);
                    }
                    Err(e) => return Err(TransportError::ReadFailed(e)),
                },
                _ = shutdown.cancelled() => {
                    debug!(peer, "Connection draining mid-frame");
                    return Ok(());
                }
            }
        }

        let request = match decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer, error = %e, "Malformed frame");
                send_error_byte(&mut writer).await;
                return Ok(());
            }
        };

        let mut ctx = match framing {
            ReadFraming::LengthPrefixed => ConnectionContext::stream(&mut writer),
            ReadFraming::Raw => ConnectionContext::stream_raw(&mut writer),
        };

        match registry.dispatch(&mut ctx, request).await {
            Ok(()) => {}
            Err(HandlerError::Respond(e)) => return Err(TransportError::WriteFailed(e)),
            Err(e @ HandlerError::NoHandler(_)) => {
                warn!(peer, error = %e, "Unhandled request kind");
                send_error_byte(&mut writer).await;
                return Ok(());
            }
            // Storage/writer faults already answered the peer with an error
            // body; the connection itself is still healthy.
            Err(e) => {
                warn!(peer, error = %e, "Handler failed");
            }
        }
    }
}

/// Logs a finished stream the way the propagation policy wants: clean ends
/// and peer departures at debug, real faults at warn.
pub fn log_stream_end(peer: &str, result: Result<(), TransportError>) {
    match result {
        Ok(()) => {}
        Err(TransportError::PeerClosed) => {
            debug!(peer, "Peer closed connection mid-frame");
        }
        Err(e) => {
            warn!(peer, error = %e, "Connection ended with error");
        }
    }
}

async fn send_error_byte<W: AsyncWrite + Unpin>(writer: &mut W) {
    let _ = writer.write_all(&[ACK_ERR]).await;
    let _ = writer.flush().await;
}
