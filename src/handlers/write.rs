//! Write Handler
//!
//! Buffers the key-value pair into the batch writer and acknowledges with a
//! single status byte. The write is durable only after its shard's next
//! flush; the ack means "accepted for eventual flush". A full shard queue
//! makes this handler (and the wire behind it) wait, which is the
//! backpressure contract.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::handlers::{ConnectionContext, Handler, HandlerError};
use crate::protocol::{Request, ACK_ERR, ACK_OK};
use crate::storage::BatchWriter;

pub struct WriteHandler {
    writer: Arc<BatchWriter>,
}

impl WriteHandler {
    pub fn new(writer: Arc<BatchWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Handler for WriteHandler {
    async fn handle(
        &self,
        ctx: &mut ConnectionContext<'_>,
        request: Request<'_>,
    ) -> Result<(), HandlerError> {
        // Writes must carry at least one payload byte.
        if request.data.is_empty() {
            warn!("Write request without payload");
            ctx.respond(&[ACK_ERR]).await?;
            return Ok(());
        }

        match self
            .writer
            .buffer_write(request.key, Bytes::copy_from_slice(request.data))
            .await
        {
            Ok(()) => {
                ctx.respond(&[ACK_OK]).await?;
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "Write rejected by batch writer");
                ctx.respond(&[ACK_ERR]).await?;
                Err(e.into())
            }
        }
    }
}
