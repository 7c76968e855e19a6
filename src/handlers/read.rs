//! Read Handler
//!
//! Point lookup against the store. Stream transports that framed their read
//! replies get `be32(value_len) ‖ value`; the others get the raw value. A
//! missing key answers with the miss marker, byte-for-byte the same on every
//! transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::handlers::{ConnectionContext, Handler, HandlerError};
use crate::protocol::{Request, MISS_MARKER};
use crate::storage::KvStore;

/// Response body when the engine itself fails underneath a read.
const READ_ERROR_MARKER: &[u8] = b"Error reading from database";

pub struct ReadHandler {
    store: Arc<dyn KvStore>,
}

impl ReadHandler {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for ReadHandler {
    async fn handle(
        &self,
        ctx: &mut ConnectionContext<'_>,
        request: Request<'_>,
    ) -> Result<(), HandlerError> {
        match self.store.get(&request.key) {
            Ok(Some(value)) => {
                if ctx.length_prefixed_reads() {
                    ctx.respond_with_length_prefix(&value).await?;
                } else {
                    ctx.respond(&value).await?;
                }
                Ok(())
            }
            Ok(None) => {
                ctx.respond(MISS_MARKER).await?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Read failed against store");
                ctx.respond(READ_ERROR_MARKER).await?;
                Err(e.into())
            }
        }
    }
}
