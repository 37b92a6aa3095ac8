//! Interrupt contexts: cooperative cancellation tokens attached to scopes.
//!
//! Every interruptible scope owns an [`InterruptContext`]. A context holds a
//! single-assignment outcome; the first `cancel` wins and later ones are
//! ignored. Contexts derived from a parent fire when the parent fires, with
//! the parent's state (so the unwind stops at the scope that owns the
//! context that actually fired). Sealing a context at scope close stops
//! watchers without interrupting anyone.
//!
//! Effects run under a context through [`InterruptContext::race`]. When the
//! context wins, the effect future is dropped inside the race, so its own
//! cleanup runs before the interruption is observed.

use core::fmt;
use futures::future::{select, Either};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};

use crate::error::Error;
use crate::sync::Latch;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, ScopeId};

/// How a context fired.
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptOutcome {
    /// Interrupted; the unwind is absorbed at the origin scope.
    Canceled(CancelReason),
    /// Interrupted by a failure that must surface as an error.
    Errored(Error),
    /// The owning scope closed before anything fired.
    Closed,
}

impl InterruptOutcome {
    /// Returns true for outcomes that interrupt running work.
    #[must_use]
    pub const fn interrupts(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// The assigned state of a context: what fired, and whose context it was.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptState {
    /// Scope owning the context that fired.
    pub origin: ScopeId,
    /// What happened.
    pub outcome: InterruptOutcome,
}

struct Shared {
    origin: ScopeId,
    state: Latch<InterruptState>,
    children: Mutex<Vec<Weak<Shared>>>,
}

/// A cancellation token attached to a scope.
#[derive(Clone)]
pub struct InterruptContext {
    shared: Arc<Shared>,
}

impl InterruptContext {
    /// A fresh, unfired context owned by `origin`.
    #[must_use]
    pub fn root(origin: ScopeId) -> Self {
        Self {
            shared: Arc::new(Shared {
                origin,
                state: Latch::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A context owned by `origin` that also fires whenever `self` fires.
    ///
    /// Deriving from an already-interrupted context yields an interrupted
    /// context.
    #[must_use]
    pub fn derive_child(&self, origin: ScopeId) -> Self {
        let child = Self::root(origin);
        let mut children = self.shared.children.lock();
        match self.shared.state.get() {
            Some(state) if state.outcome.interrupts() => {
                let _ = child.shared.state.set(state);
            }
            _ => {
                children.retain(|w| w.strong_count() > 0);
                children.push(Arc::downgrade(&child.shared));
            }
        }
        child
    }

    /// Scope owning this context.
    #[must_use]
    pub fn origin(&self) -> ScopeId {
        self.shared.origin
    }

    /// Fires the context.
    ///
    /// Returns `true` if this call assigned the outcome. Interrupting
    /// outcomes propagate to every derived context that is still unset.
    pub fn cancel(&self, outcome: InterruptOutcome) -> bool {
        let state = InterruptState {
            origin: self.shared.origin,
            outcome,
        };
        if self.shared.state.set(state.clone()).is_err() {
            return false;
        }
        if !state.outcome.interrupts() {
            return true;
        }
        debug!(origin = %state.origin, outcome = ?state.outcome, "interrupt context fired");
        let mut pending: Vec<Arc<Shared>> = Vec::new();
        collect_children(&self.shared, &mut pending);
        while let Some(child) = pending.pop() {
            if child.state.set(state.clone()).is_ok() {
                collect_children(&child, &mut pending);
            }
        }
        true
    }

    /// Fires with [`InterruptOutcome::Canceled`].
    pub fn interrupt(&self, reason: CancelReason) -> bool {
        self.cancel(InterruptOutcome::Canceled(reason))
    }

    /// Marks the context closed if nothing fired yet and returns the final
    /// state.
    pub fn seal(&self) -> InterruptState {
        let closed = InterruptState {
            origin: self.shared.origin,
            outcome: InterruptOutcome::Closed,
        };
        match self.shared.state.set(closed.clone()) {
            Ok(()) => closed,
            Err(_) => self.shared.state.get().unwrap_or(closed),
        }
    }

    /// The current state, including [`InterruptOutcome::Closed`].
    #[must_use]
    pub fn state(&self) -> Option<InterruptState> {
        self.shared.state.get()
    }

    /// The state if the context has interrupted.
    #[must_use]
    pub fn interruption(&self) -> Option<InterruptState> {
        self.shared
            .state
            .get()
            .filter(|state| state.outcome.interrupts())
    }

    /// Resolves once the context is assigned, sealed or not.
    pub async fn fired(&self) -> InterruptState {
        self.shared.state.wait().await
    }

    /// Resolves once the context interrupts; never resolves if it is sealed.
    pub async fn interrupted(&self) -> InterruptState {
        let state = self.fired().await;
        if state.outcome.interrupts() {
            state
        } else {
            futures::future::pending().await
        }
    }

    /// Runs `fut` unless the context interrupts first.
    ///
    /// On interruption `fut` is dropped before this returns.
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output, InterruptState> {
        if let Some(state) = self.interruption() {
            return Err(state);
        }
        let fut = std::pin::pin!(fut);
        let interrupted = std::pin::pin!(self.interrupted());
        match select(fut, interrupted).await {
            Either::Left((value, _)) => Ok(value),
            Either::Right((state, _)) => Err(state),
        }
    }

    /// Returns true if both handles refer to the same context.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

fn collect_children(shared: &Shared, out: &mut Vec<Arc<Shared>>) {
    let children = std::mem::take(&mut *shared.children.lock());
    out.extend(children.iter().filter_map(Weak::upgrade));
}

impl fmt::Debug for InterruptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptContext")
            .field("origin", &self.shared.origin)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sid(i: u32) -> ScopeId {
        ScopeId::new_for_test(i, 0)
    }

    #[test]
    fn cancel_is_single_assignment() {
        let ctx = InterruptContext::root(sid(0));
        assert!(ctx.interrupt(CancelReason::signal()));
        assert!(!ctx.cancel(InterruptOutcome::Errored(Error::user("late"))));
        let state = ctx.interruption().unwrap();
        assert_eq!(state.origin, sid(0));
        assert_eq!(
            state.outcome,
            InterruptOutcome::Canceled(CancelReason::signal())
        );
    }

    #[test]
    fn child_fires_with_parent_state() {
        let parent = InterruptContext::root(sid(0));
        let child = parent.derive_child(sid(1));
        let grandchild = child.derive_child(sid(2));
        parent.interrupt(CancelReason::halted());
        let state = grandchild.interruption().unwrap();
        assert_eq!(state.origin, sid(0));
        assert!(matches!(
            state.outcome,
            InterruptOutcome::Canceled(ref r) if r.kind == CancelKind::Halted
        ));
    }

    #[test]
    fn child_fire_does_not_reach_parent() {
        let parent = InterruptContext::root(sid(0));
        let child = parent.derive_child(sid(1));
        child.interrupt(CancelReason::signal());
        assert!(parent.interruption().is_none());
        assert_eq!(child.interruption().unwrap().origin, sid(1));
    }

    #[test]
    fn derive_from_fired_parent_starts_fired() {
        let parent = InterruptContext::root(sid(0));
        parent.interrupt(CancelReason::user("stop"));
        let child = parent.derive_child(sid(1));
        assert_eq!(child.interruption().unwrap().origin, sid(0));
    }

    #[test]
    fn seal_blocks_later_cancel_and_does_not_propagate() {
        let parent = InterruptContext::root(sid(0));
        let child = parent.derive_child(sid(1));
        assert_eq!(parent.seal().outcome, InterruptOutcome::Closed);
        assert!(!parent.interrupt(CancelReason::signal()));
        assert!(parent.interruption().is_none());
        assert!(child.state().is_none());
    }

    #[test]
    fn seal_reports_earlier_error() {
        let ctx = InterruptContext::root(sid(3));
        ctx.cancel(InterruptOutcome::Errored(Error::user("bg failed")));
        let state = ctx.seal();
        assert_eq!(
            state.outcome,
            InterruptOutcome::Errored(Error::user("bg failed"))
        );
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn race_drops_losing_effect() {
        let ctx = InterruptContext::root(sid(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(Arc::clone(&dropped));
        let effect = async move {
            let _guard = guard;
            futures::future::pending::<()>().await;
        };
        let mut race = Box::pin(ctx.race(effect));
        assert!((&mut race).now_or_never().is_none());
        ctx.interrupt(CancelReason::signal());
        let result = race.now_or_never().expect("race resolves after cancel");
        assert!(result.is_err());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn race_passes_value_through() {
        let ctx = InterruptContext::root(sid(0));
        let value = ctx.race(async { 5 }).now_or_never().unwrap();
        assert_eq!(value.ok(), Some(5));
    }
}
