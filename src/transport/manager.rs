//! Transport Manager
//!
//! Holds the kind → transport map and runs lifecycle across it as one unit:
//! a `start` only succeeds when every requested transport reached Listening,
//! and a bind failure rolls back whatever had already started.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::transport::{Transport, TransportError, TransportKind};

/// Upper bound for a single transport to reach Listening.
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry of transport instances, populated at wiring time and frozen
/// during serving.
#[derive(Default)]
pub struct TransportManager {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl TransportManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transport. One instance per kind.
    pub fn register(&mut self, transport: Arc<dyn Transport>) -> Result<(), TransportError> {
        let kind = transport.kind();
        if self.transports.contains_key(&kind) {
            return Err(TransportError::AlreadyRegistered(kind));
        }
        self.transports.insert(kind, transport);
        Ok(())
    }

    /// Removes a transport before startup.
    pub fn deregister(&mut self, kind: TransportKind) -> Result<(), TransportError> {
        self.transports
            .remove(&kind)
            .map(|_| ())
            .ok_or(TransportError::NotRegistered(kind))
    }

    /// Looks up a registered transport.
    pub fn get(&self, kind: TransportKind) -> Result<Arc<dyn Transport>, TransportError> {
        self.transports
            .get(&kind)
            .cloned()
            .ok_or(TransportError::NotRegistered(kind))
    }

    /// Every registered kind.
    pub fn kinds(&self) -> Vec<TransportKind> {
        self.transports.keys().copied().collect()
    }

    /// Starts each requested transport. If any fails to bind, every transport
    /// that already started is stopped and the error is returned.
    pub async fn start(&self, kinds: &[TransportKind]) -> Result<(), TransportError> {
        let mut started: Vec<Arc<dyn Transport>> = Vec::with_capacity(kinds.len());

        for &kind in kinds {
            let transport = self.get(kind)?;
            let outcome = tokio::time::timeout(START_TIMEOUT, transport.start())
                .await
                .unwrap_or(Err(TransportError::StartTimeout(START_TIMEOUT)));
            match outcome {
                Ok(()) => started.push(transport),
                Err(e) => {
                    error!(transport = %kind, error = %e, "Transport failed to start, rolling back");
                    for t in started {
                        if let Err(stop_err) = t.stop().await {
                            error!(transport = %t.kind(), error = %stop_err, "Rollback stop failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(count = kinds.len(), "All requested transports listening");
        Ok(())
    }

    /// Stops each requested transport, attempting all of them even when some
    /// fail. Returns the first error encountered.
    pub async fn stop(&self, kinds: &[TransportKind]) -> Result<(), TransportError> {
        let mut first_err = None;

        for &kind in kinds {
            let transport = match self.get(kind) {
                Ok(t) => t,
                Err(e) => {
                    first_err.get_or_insert(e);
                    continue;
                }
            };
            if let Err(e) = transport.stop().await {
                error!(transport = %kind, error = %e, "Transport stop failed");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
