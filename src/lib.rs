//! # FluxKV - A High-Throughput Key-Value Storage Front End
//!
//! FluxKV accepts fixed-format binary requests over four wire transports and
//! persists them into an embedded ordered key-value engine. Clients write or
//! read 32-byte-keyed blobs; the server answers with a one-byte status or a
//! length-prefixed value.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                FluxKV                                   │
//! │                                                                         │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐                       │
//! │  │   UDP   │ │   TCP   │ │   UDS   │ │   QUIC   │   transports          │
//! │  └────┬────┘ └────┬────┘ └────┬────┘ └────┬─────┘                       │
//! │       └───────────┴─────┬─────┴───────────┘                             │
//! │                         ▼                                               │
//! │               ┌──────────────────┐     ┌───────────────────┐            │
//! │               │   frame codec    │────>│  handler registry │            │
//! │               └──────────────────┘     └────────┬──────────┘            │
//! │                                      ┌──────────┴──────────┐            │
//! │                                      ▼                     ▼            │
//! │                              ┌──────────────┐      ┌──────────────┐     │
//! │                              │ write handler│      │ read handler │     │
//! │                              └──────┬───────┘      └──────┬───────┘     │
//! │                                     ▼                     │             │
//! │                          ┌──────────────────────┐         │             │
//! │                          │     BatchWriter      │         │ get         │
//! │                          │ (sharded, coalescing)│         │             │
//! │                          └──────────┬───────────┘         │             │
//! │                                     ▼                     ▼             │
//! │                          ┌─────────────────────────────────────┐        │
//! │                          │        KvStore (sled engine)        │        │
//! │                          └─────────────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Highlights
//!
//! ### Coalesced writes
//!
//! Writes are acknowledged once their record is accepted by the sharded
//! [`storage::BatchWriter`], which stages them per shard (last write wins per
//! key) and commits each staging buffer as a single engine transaction on a
//! size or time bound. Shard queues are bounded: a saturated shard blocks its
//! producers instead of dropping writes.
//!
//! ### One codec, four transports
//!
//! The 37-byte-header frame is self-delimiting, so the same decode path
//! serves single-datagram requests (UDP) and streamed requests (TCP, UDS,
//! QUIC streams). The handler registry is populated before startup and frozen
//! behind an `Arc`; dispatch takes no lock.
//!
//! ### Cooperative lifecycle
//!
//! Every transport derives a child of the server's cancellation token and
//! tracks in-flight handlers. `stop` refuses new work immediately, drains
//! with a bounded grace, then the batch writer performs its final flush and
//! the stores close.
//!
//! ## Module Overview
//!
//! - [`protocol`]: the fixed-header frame codec and wire constants
//! - [`handlers`]: connection context, registry, write/read handlers
//! - [`storage`]: the `KvStore` capability, sled engine, batch writer
//! - [`transport`]: the four transports and their manager
//! - [`config`]: YAML server configuration
//! - [`server`]: composition root and lifecycle

pub mod config;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transport;

// Re-export commonly used types for convenience
pub use config::Config;
pub use handlers::{HandlerRegistry, ReadHandler, WriteHandler};
pub use protocol::{HandlerKind, Request};
pub use server::Server;
pub use storage::{BatchWriter, KvStore, SledStore, StoreManager, WriterConfig};
pub use transport::{Transport, TransportKind, TransportManager};

/// Version of FluxKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
