//! Handler Registry
//!
//! Maps the one-byte handler kind to its handler. The registry is populated
//! under `&mut` while the server is being wired, then frozen behind an `Arc`
//! for the life of the process, so dispatch takes no lock.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::handlers::{ConnectionContext, Handler, HandlerError};
use crate::protocol::{HandlerKind, Request};

/// Errors from registry population.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler for this kind is already registered; first registration wins.
    #[error("handler already registered for {0} requests")]
    AlreadyRegistered(HandlerKind),
}

/// The frozen kind → handler mapping.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<HandlerKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`. First registration wins.
    pub fn register(
        &mut self,
        kind: HandlerKind,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.entries.insert(kind, handler);
        Ok(())
    }

    /// Looks up the handler for `kind` and runs it.
    pub async fn dispatch(
        &self,
        ctx: &mut ConnectionContext<'_>,
        request: Request<'_>,
    ) -> Result<(), HandlerError> {
        let handler = self
            .entries
            .get(&request.kind)
            .ok_or(HandlerError::NoHandler(request.kind))?;
        handler.handle(ctx, request).await
    }

    /// True when a handler is registered for `kind`.
    pub fn contains(&self, kind: HandlerKind) -> bool {
        self.entries.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::KEY_LEN;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(
            &self,
            _ctx: &mut ConnectionContext<'_>,
            _request: Request<'_>,
        ) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_register_is_first_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();

        registry
            .register(
                HandlerKind::Write,
                Arc::new(CountingHandler {
                    calls: calls.clone(),
                }),
            )
            .unwrap();
        assert_eq!(
            registry.register(
                HandlerKind::Write,
                Arc::new(CountingHandler {
                    calls: calls.clone()
                })
            ),
            Err(RegistryError::AlreadyRegistered(HandlerKind::Write))
        );
        assert!(registry.contains(HandlerKind::Write));
        assert!(!registry.contains(HandlerKind::Read));
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_registered_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                HandlerKind::Read,
                Arc::new(CountingHandler {
                    calls: calls.clone(),
                }),
            )
            .unwrap();

        let (_client, mut server) = tokio::io::duplex(64);
        let mut ctx = ConnectionContext::stream(&mut server);
        let request = Request::read([0u8; KEY_LEN]);

        registry.dispatch(&mut ctx, request).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_fails() {
        let registry = HandlerRegistry::new();
        let (_client, mut server) = tokio::io::duplex(64);
        let mut ctx = ConnectionContext::stream(&mut server);

        let result = registry.dispatch(&mut ctx, Request::read([0u8; KEY_LEN])).await;
        assert!(matches!(result, Err(HandlerError::NoHandler(HandlerKind::Read))));
    }
}
