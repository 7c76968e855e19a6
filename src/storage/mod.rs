//! Storage Module
//!
//! The embedded engine behind the front end, consumed everywhere through the
//! [`KvStore`] capability so handlers and the batch writer never depend on a
//! concrete engine. The shipped implementation is [`SledStore`]; tests
//! substitute controllable mocks.
//!
//! ```text
//! ┌──────────────┐     buffer_write      ┌─────────────────────────────┐
//! │ write handler│──────────────────────>│        BatchWriter          │
//! └──────────────┘                       │  shard 0 │ shard 1 │ ... W  │
//! ┌──────────────┐        get            │  queue   │  queue  │        │
//! │ read handler │───────────┐           │  staging │ staging │        │
//! └──────────────┘           │           └────┬─────┴────┬────┴────────┘
//!                            ▼                │ flush    │ flush
//!                      ┌───────────────────── ▼──────────▼──┐
//!                      │          KvStore (sled)            │
//!                      └─────────────────────────────────────┘
//! ```

pub mod batch;
pub mod manager;
pub mod store;

pub use batch::{BatchWriter, WriterConfig, WriterError};
pub use manager::{StoreManager, StoreManagerError};
pub use store::{KvStore, SledStore, StoreError};
