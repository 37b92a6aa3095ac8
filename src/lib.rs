//! Sluice: a resource-safe, chunked streaming engine.
//!
//! # Overview
//!
//! A [`Pull`] is a suspended description of a computation that emits
//! [`Chunk`]s and finishes with a result. [`Stream`] wraps `Pull<O, ()>`
//! with collection-style combinators. Nothing runs until a stream is
//! compiled against a [`CompilerTarget`].
//!
//! # Core Guarantees
//!
//! - **Resource safety**: every acquired resource is released exactly once, on success, failure or interruption
//! - **LIFO release**: finalizers and child scopes close in one reverse order over registration time
//! - **No masking**: a failing release never hides the body's error; both are reported
//! - **Stack safety**: `flat_map` chains of any length and association run in constant host stack
//! - **Explicit capabilities**: concurrency needs the concurrent target and is rejected elsewhere, never degraded
//!
//! # Module Structure
//!
//! - [`chunk`]: [`Chunk`], the unit of emission
//! - [`pull`]: the [`Pull`] algebra
//! - [`stream`]: the [`Stream`] façade, including `merge`, `concurrently` and `par_join`
//! - [`scope`]: the resource-lifetime tree and the [`Scope`] handle
//! - [`record`]: scope records and finalizers
//! - [`interrupt`]: [`InterruptContext`]
//! - [`compiler`]: targets and the interpreter
//! - [`sync`]: the single-assignment [`Latch`](sync::Latch)
//! - [`types`]: identifiers, cancellation reasons, exit cases
//! - [`util`]: arena storage
//! - [`error`]: error types
//! - [`config`]: engine configuration
//!
//! # Example
//!
//! ```
//! use sluice::{Stream, SyncTarget};
//!
//! let out = Stream::range(0, 10)
//!     .filter(|x| x % 2 == 0)
//!     .map(|x| x * 10)
//!     .compile(&SyncTarget)
//!     .to_vec()
//!     .unwrap();
//! assert_eq!(out, vec![0, 20, 40, 60, 80]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::type_complexity)]

pub mod chunk;
pub mod compiler;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod pull;
pub mod record;
pub mod scope;
pub mod stream;
pub mod sync;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_utils;

// Re-exports for convenient access to core types
pub use chunk::Chunk;
pub use compiler::{
    Capability, CompilerTarget, ConcurrentTarget, Executor, PureTarget, SyncTarget,
    TargetProfile, TokioExecutor,
};
pub use config::{ConfigError, EngineConfig};
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use interrupt::{InterruptContext, InterruptOutcome, InterruptState};
pub use pull::{Pull, Unconsed};
pub use record::Finalizer;
pub use scope::Scope;
pub use stream::{Compiled, Halt, Stream};
pub use types::{CancelKind, CancelReason, ExitCase, ScopeId};
