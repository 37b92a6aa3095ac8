//! Synchronization primitives used by the engine.
//!
//! - [`Latch`]: single-assignment cell with async waiters
//!
//! Mutable cells are `parking_lot::Mutex`; bounded concurrency and hand-off
//! queues come from `tokio::sync`.

mod latch;

pub use latch::{Latch, Wait};
