//! Core value types.
//!
//! - [`id`]: [`ScopeId`]
//! - [`cancel`]: interruption reasons ([`CancelKind`], [`CancelReason`])
//! - [`outcome`]: [`ExitCase`] handed to finalizers

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::ScopeId;
pub use outcome::ExitCase;
