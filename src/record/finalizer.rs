//! Finalizers and the per-scope release stack.
//!
//! A scope keeps one stack holding both its finalizers and markers for the
//! child scopes opened under it. Popping that stack during close yields a
//! single LIFO order over registration time: a child opened after a
//! resource was acquired closes before that resource is released.

use core::fmt;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::error::{Error, Result};
use crate::types::{ExitCase, ScopeId};
use crate::util::panic_message;

/// A release action that runs exactly once when its scope closes.
pub enum Finalizer {
    /// Runs inline on the closing task.
    Sync(Box<dyn FnOnce(&ExitCase) -> Result<()> + Send>),
    /// Runs as an effect; awaited before the next entry is popped.
    Async(Box<dyn FnOnce(ExitCase) -> BoxFuture<'static, Result<()>> + Send>),
}

impl Finalizer {
    /// A synchronous finalizer.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce(&ExitCase) -> Result<()> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    /// An effectful finalizer.
    pub fn effect<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ExitCase) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::Async(Box::new(move |exit| f(exit).boxed()))
    }

    /// Runs the finalizer. A panic becomes an [`ErrorKind::Panicked`]
    /// error.
    ///
    /// [`ErrorKind::Panicked`]: crate::error::ErrorKind::Panicked
    pub(crate) fn run(self, exit: ExitCase) -> BoxFuture<'static, Result<()>> {
        match self {
            Self::Sync(f) => {
                let res = std::panic::catch_unwind(AssertUnwindSafe(move || f(&exit)))
                    .unwrap_or_else(|payload| Err(Error::panicked(panic_message(&*payload))));
                futures::future::ready(res).boxed()
            }
            Self::Async(f) => {
                let fut = match std::panic::catch_unwind(AssertUnwindSafe(move || f(exit))) {
                    Ok(fut) => fut,
                    Err(payload) => {
                        return futures::future::ready(Err(Error::panicked(panic_message(
                            &*payload,
                        ))))
                        .boxed();
                    }
                };
                AssertUnwindSafe(fut)
                    .catch_unwind()
                    .map(|res| {
                        res.unwrap_or_else(|payload| {
                            Err(Error::panicked(panic_message(&*payload)))
                        })
                    })
                    .boxed()
            }
        }
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.debug_tuple("Sync").field(&"<closure>").finish(),
            Self::Async(_) => f.debug_tuple("Async").field(&"<effect>").finish(),
        }
    }
}

/// One entry of a scope's release stack.
#[derive(Debug)]
pub enum StackEntry {
    /// A registered finalizer.
    Release(Finalizer),
    /// A child scope opened at this point.
    Child(ScopeId),
}

/// LIFO stack of finalizers and child markers.
#[derive(Debug, Default)]
pub struct FinalizerStack {
    entries: Vec<StackEntry>,
}

impl FinalizerStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a finalizer.
    pub fn push_release(&mut self, finalizer: Finalizer) {
        self.entries.push(StackEntry::Release(finalizer));
    }

    /// Records a child scope.
    pub fn push_child(&mut self, child: ScopeId) {
        self.entries.push(StackEntry::Child(child));
    }

    /// Pops the most recent entry.
    pub fn pop(&mut self) -> Option<StackEntry> {
        self.entries.pop()
    }

    /// Forgets a child that closed on its own.
    pub fn remove_child(&mut self, child: ScopeId) {
        if let Some(pos) = self
            .entries
            .iter()
            .rposition(|e| matches!(e, StackEntry::Child(id) if *id == child))
        {
            self.entries.remove(pos);
        }
    }

    /// Child scopes in creation order.
    pub fn children(&self) -> impl Iterator<Item = ScopeId> + '_ {
        self.entries.iter().filter_map(|e| match e {
            StackEntry::Child(id) => Some(*id),
            StackEntry::Release(_) => None,
        })
    }

    /// Number of pending finalizers (children excluded).
    #[must_use]
    pub fn finalizer_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, StackEntry::Release(_)))
            .count()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there is nothing to release.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
