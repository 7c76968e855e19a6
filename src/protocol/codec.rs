//! Fixed-Header Frame Codec
//!
//! Encoding and decoding of the 37-byte-header request frame. The decoder
//! borrows the payload from the input buffer instead of copying it, so a
//! decoded [`Request`] must not outlive the receive buffer it came from.
//! The key, being small and fixed-width, is copied by value.
//!
//! `encode_into` writes into a caller-supplied buffer and performs no heap
//! allocation; `encode` is the allocating convenience for callers that do not
//! pool buffers.

use thiserror::Error;

use crate::protocol::types::{HandlerKind, HEADER_LEN, KEY_LEN};

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The caller-supplied encode buffer cannot hold the frame.
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// The opcode byte is not a defined handler kind.
    #[error("invalid handler byte: {0:#04x}")]
    InvalidHandler(u8),

    /// Fewer than the fixed header's 37 bytes were supplied.
    #[error("short frame: {0} bytes, need at least {HEADER_LEN}")]
    ShortFrame(usize),

    /// The declared data length exceeds the bytes that follow the header.
    #[error("length mismatch: declared {declared} bytes, {remaining} remain")]
    LengthMismatch { declared: usize, remaining: usize },

    /// Bytes follow the declared payload. Frames are exact; nothing is
    /// silently truncated.
    #[error("trailing bytes: {0} past end of frame")]
    TrailingBytes(usize),
}

/// A decoded request.
///
/// `data` borrows from the buffer passed to [`decode`]; it is valid until the
/// handler returns and the transport reclaims the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    /// Which handler this frame selects.
    pub kind: HandlerKind,
    /// The fixed-width key, copied out of the frame.
    pub key: [u8; KEY_LEN],
    /// The payload. Empty on reads, at least one byte on writes.
    pub data: &'a [u8],
}

impl<'a> Request<'a> {
    /// Builds a write request for the given key and payload.
    pub fn write(key: [u8; KEY_LEN], data: &'a [u8]) -> Self {
        Self {
            kind: HandlerKind::Write,
            key,
            data,
        }
    }

    /// Builds a read request for the given key.
    pub fn read(key: [u8; KEY_LEN]) -> Self {
        Self {
            kind: HandlerKind::Read,
            key,
            data: &[],
        }
    }

    /// Total encoded size of this request.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }
}

/// Encodes `req` into `buf`, returning the used prefix of the buffer.
///
/// Fails with [`FrameError::BufferTooSmall`] when `buf` cannot hold the whole
/// frame. Does not allocate.
pub fn encode_into<'b>(req: &Request<'_>, buf: &'b mut [u8]) -> Result<&'b [u8], FrameError> {
    let need = req.encoded_len();
    if buf.len() < need {
        return Err(FrameError::BufferTooSmall {
            need,
            have: buf.len(),
        });
    }

    write_frame(req, buf);
    Ok(&buf[..need])
}

/// Encodes `req` into a freshly allocated vector.
pub fn encode(req: &Request<'_>) -> Vec<u8> {
    let mut buf = vec![0u8; req.encoded_len()];
    write_frame(req, &mut buf);
    buf
}

fn write_frame(req: &Request<'_>, buf: &mut [u8]) {
    buf[0] = req.kind.as_byte();
    buf[1..1 + KEY_LEN].copy_from_slice(&req.key);
    buf[1 + KEY_LEN..HEADER_LEN].copy_from_slice(&(req.data.len() as u32).to_be_bytes());
    buf[HEADER_LEN..HEADER_LEN + req.data.len()].copy_from_slice(req.data);
}

/// Decodes a complete frame.
///
/// The input must contain exactly one frame: the fixed header, then exactly
/// `data_len` payload bytes. Trailing bytes are an error rather than being
/// ignored.
pub fn decode(bytes: &[u8]) -> Result<Request<'_>, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::ShortFrame(bytes.len()));
    }

    let kind = HandlerKind::try_from(bytes[0]).map_err(FrameError::InvalidHandler)?;

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes[1..1 + KEY_LEN]);

    let mut len_be = [0u8; 4];
    len_be.copy_from_slice(&bytes[1 + KEY_LEN..HEADER_LEN]);
    let declared = u32::from_be_bytes(len_be) as usize;

    let remaining = bytes.len() - HEADER_LEN;
    if remaining < declared {
        return Err(FrameError::LengthMismatch {
            declared,
            remaining,
        });
    }
    if remaining > declared {
        return Err(FrameError::TrailingBytes(remaining - declared));
    }

    Ok(Request {
        kind,
        key,
        data: &bytes[HEADER_LEN..HEADER_LEN + declared],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    #[test]
    fn test_round_trip_write() {
        let req = Request::write(sample_key(), b"benchmark test data");
        let encoded = encode(&req);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_round_trip_read() {
        let req = Request::read(sample_key());
        let encoded = encode(&req);
        assert_eq!(encoded.len(), HEADER_LEN);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_round_trip_large_payload() {
        let data = vec![0xAB; 65535];
        let req = Request::write(sample_key(), &data);
        let encoded = encode(&req);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.kind, HandlerKind::Write);
        assert_eq!(decoded.data, &data[..]);
    }

    #[test]
    fn test_encode_into_reuses_buffer() {
        let mut buf = [0u8; 256];
        let req = Request::write(sample_key(), b"value");
        let used = encode_into(&req, &mut buf).unwrap();
        assert_eq!(used.len(), HEADER_LEN + 5);
        assert_eq!(used[0], b'W');
        assert_eq!(&used[1..33], &sample_key());
        // Length field is network byte order.
        assert_eq!(&used[33..37], &[0x00, 0x00, 0x00, 0x05]);
        assert_eq!(&used[37..], b"value");
    }

    #[test]
    fn test_encode_into_rejects_small_buffer() {
        let mut buf = [0u8; 16];
        let req = Request::write(sample_key(), b"value");
        assert_eq!(
            encode_into(&req, &mut buf),
            Err(FrameError::BufferTooSmall { need: 42, have: 16 })
        );
    }

    #[test]
    fn test_decode_short_frame() {
        let bytes = [0u8; 20];
        assert_eq!(decode(&bytes), Err(FrameError::ShortFrame(20)));
    }

    #[test]
    fn test_decode_invalid_handler() {
        let mut frame = encode(&Request::read(sample_key()));
        frame[0] = 0xFF;
        assert_eq!(decode(&frame), Err(FrameError::InvalidHandler(0xFF)));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut frame = encode(&Request::read(sample_key()));
        // Declare 19 bytes of payload but supply none.
        frame[33..37].copy_from_slice(&19u32.to_be_bytes());
        assert_eq!(
            decode(&frame),
            Err(FrameError::LengthMismatch {
                declared: 19,
                remaining: 0
            })
        );
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut frame = encode(&Request::write(sample_key(), b"abc"));
        frame.extend_from_slice(b"junk");
        assert_eq!(decode(&frame), Err(FrameError::TrailingBytes(4)));
    }

    #[test]
    fn test_zero_length_data_is_valid() {
        let frame = encode(&Request::read(sample_key()));
        let decoded = decode(&frame).unwrap();
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_unknown_bytes_all_rejected() {
        let key = sample_key();
        for b in 0u8..=255 {
            if b == b'W' || b == b'R' {
                continue;
            }
            let mut frame = encode(&Request::read(key));
            frame[0] = b;
            assert_eq!(decode(&frame), Err(FrameError::InvalidHandler(b)));
        }
    }
}
