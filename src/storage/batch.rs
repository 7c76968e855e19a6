//! Sharded Asynchronous Batch Writer
//!
//! The write path's coalescing layer. A high-concurrency stream of single
//! writes becomes a small number of multi-key engine commits without funneling
//! every writer through one lock.
//!
//! ## Shape
//!
//! ```text
//!                buffer_write(key, value)
//!                          │
//!                shard = key[0] % W
//!          ┌───────────────┼───────────────┐
//!          ▼               ▼               ▼
//!   ┌────────────┐  ┌────────────┐  ┌────────────┐
//!   │  queue 0   │  │  queue 1   │  │  queue W-1 │   bounded mpsc
//!   ├────────────┤  ├────────────┤  ├────────────┤
//!   │ staging 0  │  │ staging 1  │  │ staging W-1│   key → latest value
//!   ├────────────┤  ├────────────┤  ├────────────┤
//!   │  worker 0  │  │  worker 1  │  │ worker W-1 │   long-lived task
//!   └─────┬──────┘  └─────┬──────┘  └─────┬──────┘
//!         └───────────────┴───────────────┘
//!                     apply_batch (one commit per flush)
//! ```
//!
//! Routing on `key[0]` keeps the mapping deterministic per key: every write to
//! a given key lands in the same shard, so its staging buffer alone decides
//! which value survives to the next flush (last write wins). Each staging
//! buffer is owned exclusively by its worker task; there is no cross-shard
//! locking, and a slow shard cannot stall the others.
//!
//! Queues are bounded. A full queue blocks the producing handler, which in
//! turn backpressures the wire; writes are never silently dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::protocol::KEY_LEN;
use crate::storage::store::KvStore;

/// How long `flush_and_stop` waits for workers to finish their final flush.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Errors surfaced by the batch writer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriterError {
    /// The writer has been stopped; no further writes are accepted.
    #[error("batch writer is not running")]
    NotRunning,

    /// Workers did not finish their final flush within the grace window.
    #[error("batch writer stop timed out after {0:?}")]
    StopTimeout(Duration),
}

/// Tuning knobs for the batch writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Staged records that trigger an early flush.
    pub max_batch: usize,
    /// Period of the time-based flush.
    pub flush_interval: Duration,
    /// Number of shards (and worker tasks).
    pub worker_count: usize,
    /// Capacity of each shard's inbound queue.
    pub shard_queue_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch: 512,
            flush_interval: Duration::from_millis(500),
            worker_count: 15,
            shard_queue_capacity: 500_000,
        }
    }
}

/// A key-value pair in flight between a handler and a shard worker.
///
/// Ownership of the value transfers into the writer at `buffer_write`.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub key: [u8; KEY_LEN],
    pub value: Bytes,
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Writes accepted into a shard queue.
    pub buffered: AtomicU64,
    /// Successful engine commits.
    pub flushes: AtomicU64,
    /// Records persisted across all flushes.
    pub records_flushed: AtomicU64,
    /// Flushes whose engine commit failed (batch dropped).
    pub failed_flushes: AtomicU64,
}

/// Coalesces point writes into periodic multi-key commits.
pub struct BatchWriter {
    shards: Vec<mpsc::Sender<WriteRequest>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    stats: Arc<WriterStats>,
}

impl BatchWriter {
    /// Spawns `worker_count` shard workers writing into `store`.
    pub fn new(store: Arc<dyn KvStore>, config: WriterConfig) -> Self {
        let shutdown = CancellationToken::new();
        let stats = Arc::new(WriterStats::default());

        let mut shards = Vec::with_capacity(config.worker_count);
        let mut workers = Vec::with_capacity(config.worker_count);

        for shard_id in 0..config.worker_count {
            let (tx, rx) = mpsc::channel(config.shard_queue_capacity);
            shards.push(tx);
            workers.push(tokio::spawn(run_worker(
                shard_id,
                Arc::clone(&store),
                rx,
                config.clone(),
                shutdown.child_token(),
                Arc::clone(&stats),
            )));
        }

        info!(
            workers = config.worker_count,
            max_batch = config.max_batch,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "Batch writer started"
        );

        Self {
            shards,
            workers: Mutex::new(workers),
            shutdown,
            stats,
        }
    }

    /// Hands a write to its shard, blocking while the shard queue is full.
    ///
    /// Returning `Ok` means the record has been accepted for an eventual
    /// flush; the caller must assume the value has been consumed.
    pub async fn buffer_write(&self, key: [u8; KEY_LEN], value: Bytes) -> Result<(), WriterError> {
        if self.shutdown.is_cancelled() {
            return Err(WriterError::NotRunning);
        }

        let shard = key[0] as usize % self.shards.len();
        self.shards[shard]
            .send(WriteRequest { key, value })
            .await
            .map_err(|_| WriterError::NotRunning)?;
        self.stats.buffered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The shard a key routes to. Deterministic per key.
    pub fn shard_of(&self, key: &[u8; KEY_LEN]) -> usize {
        key[0] as usize % self.shards.len()
    }

    /// Shared counters.
    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Signals every worker to flush once and exit, then waits for them.
    ///
    /// Idempotent: a second call finds no workers and returns immediately.
    /// Waits at most [`STOP_GRACE`] for the final flushes.
    pub async fn flush_and_stop(&self) -> Result<(), WriterError> {
        self.shutdown.cancel();

        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if workers.is_empty() {
            return Ok(());
        }

        let drain = async {
            for handle in workers {
                let _ = handle.await;
            }
        };
        match tokio::time::timeout(STOP_GRACE, drain).await {
            Ok(()) => {
                info!("Batch writer drained and stopped");
                Ok(())
            }
            Err(_) => {
                error!(grace = ?STOP_GRACE, "Batch writer stop timed out");
                Err(WriterError::StopTimeout(STOP_GRACE))
            }
        }
    }
}

/// One shard's worker loop: a three-way select over new writes, the flush
/// ticker, and the stop signal.
async fn run_worker(
    shard_id: usize,
    store: Arc<dyn KvStore>,
    mut rx: mpsc::Receiver<WriteRequest>,
    config: WriterConfig,
    shutdown: CancellationToken,
    stats: Arc<WriterStats>,
) {
    let mut staging: HashMap<[u8; KEY_LEN], Bytes> = HashMap::new();
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(req) => {
                    staging.insert(req.key, req.value);
                    if staging.len() >= config.max_batch {
                        flush(shard_id, store.as_ref(), &mut staging, &stats);
                    }
                }
                // All senders dropped; nothing more can arrive.
                None => break,
            },
            _ = ticker.tick() => {
                flush(shard_id, store.as_ref(), &mut staging, &stats);
            }
            _ = shutdown.cancelled() => break,
        }
    }

    // Drain whatever is still queued, then flush one last time.
    while let Ok(req) = rx.try_recv() {
        staging.insert(req.key, req.value);
        if staging.len() >= config.max_batch {
            flush(shard_id, store.as_ref(), &mut staging, &stats);
        }
    }
    flush(shard_id, store.as_ref(), &mut staging, &stats);
    debug!(shard = shard_id, "Shard worker exited");
}

/// Commits the staging buffer as one engine transaction and clears it.
///
/// A failed commit drops the batch: retrying blind could shadow newer writes
/// staged since the commit began.
fn flush(
    shard_id: usize,
    store: &dyn KvStore,
    staging: &mut HashMap<[u8; KEY_LEN], Bytes>,
    stats: &WriterStats,
) {
    if staging.is_empty() {
        return;
    }

    let batch: Vec<([u8; KEY_LEN], Bytes)> = staging.drain().collect();
    let records = batch.len();

    match store.apply_batch(&batch) {
        Ok(()) => {
            stats.flushes.fetch_add(1, Ordering::Relaxed);
            stats
                .records_flushed
                .fetch_add(records as u64, Ordering::Relaxed);
            debug!(shard = shard_id, records, "Flushed batch");
        }
        Err(e) => {
            stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
            error!(shard = shard_id, records, error = %e, "Flush failed, batch dropped");
        }
    }
}
