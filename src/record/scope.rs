//! Scope record.
//!
//! A scope owns finalizers and child scopes and forms a tree. Children
//! point at their parent by [`ScopeId`] only; the parent owns the child
//! through its release stack.

use std::sync::Arc;

use crate::error::Result;
use crate::interrupt::InterruptContext;
use crate::record::finalizer::{Finalizer, FinalizerStack};
use crate::sync::Latch;
use crate::types::ScopeId;

/// The state of a scope in its lifecycle.
///
/// ```text
/// Open → Closing → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Accepting acquisitions and children.
    Open,
    /// Releasing; no new acquisitions.
    Closing,
    /// Every finalizer and descendant has been released.
    Closed,
}

impl ScopeState {
    /// Returns true if the scope accepts new resources.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Who drives a scope's close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOwner {
    /// The compiler continuation that opened it; a closing parent may close
    /// it directly.
    Inline,
    /// A forked task; a closing parent interrupts it and waits.
    Fiber,
}

/// Internal record for a scope.
#[derive(Debug)]
pub struct ScopeRecord {
    /// Identifier of this scope.
    pub id: ScopeId,
    /// Parent scope (None for the root).
    pub parent: Option<ScopeId>,
    /// Lifecycle state.
    pub state: ScopeState,
    /// Finalizers and child markers, popped LIFO at close.
    pub stack: FinalizerStack,
    /// Effective interrupt context (own if `interruptible`, else inherited).
    pub interrupt: InterruptContext,
    /// Whether this scope owns its interrupt context.
    pub interruptible: bool,
    /// Who closes this scope.
    pub owner: ScopeOwner,
    /// Close outcome, shared by every closer.
    pub outcome: Arc<Latch<Result<()>>>,
}

impl ScopeRecord {
    /// Creates an open record.
    #[must_use]
    pub fn new(
        id: ScopeId,
        parent: Option<ScopeId>,
        interrupt: InterruptContext,
        interruptible: bool,
        owner: ScopeOwner,
    ) -> Self {
        Self {
            id,
            parent,
            state: ScopeState::Open,
            stack: FinalizerStack::new(),
            interrupt,
            interruptible,
            owner,
            outcome: Arc::new(Latch::new()),
        }
    }

    /// Registers a finalizer; hands it back if the scope is closing.
    pub fn register(&mut self, finalizer: Finalizer) -> core::result::Result<(), Finalizer> {
        if !self.state.is_open() {
            return Err(finalizer);
        }
        self.stack.push_release(finalizer);
        Ok(())
    }

    /// Starts closing. Returns false if someone else already did.
    pub fn begin_close(&mut self) -> bool {
        if !self.state.is_open() {
            return false;
        }
        self.state = ScopeState::Closing;
        true
    }
}
