//! Internal records for scopes and their finalizers.

pub mod finalizer;
pub mod scope;

pub use finalizer::{Finalizer, FinalizerStack, StackEntry};
pub use scope::{ScopeOwner, ScopeRecord, ScopeState};
