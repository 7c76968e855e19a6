//! Wire Protocol Module
//!
//! This module defines the fixed-format binary request that every FluxKV
//! transport speaks, and the codec that encodes/decodes it.
//!
//! ## Frame Layout
//!
//! ```text
//! offset  size  field
//! ------  ----  -----------------------------------------
//!      0     1  handler kind ('W' = write, 'R' = read)
//!      1    32  key (opaque, fixed width)
//!     33     4  data length, big-endian u32
//!     37     N  data (absent on reads, required on writes)
//! ```
//!
//! The frame is self-delimiting: stream transports read the 37-byte header,
//! learn `data_len`, then read exactly that many bytes. No outer length prefix
//! wraps the frame.

pub mod codec;
pub mod types;

pub use codec::{decode, encode, encode_into, FrameError, Request};
pub use types::{HandlerKind, ACK_ERR, ACK_OK, HEADER_LEN, KEY_LEN, MISS_MARKER};
