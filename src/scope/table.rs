//! Scope table and the close algorithm.
//!
//! [`ScopeTree`] is shared by one compilation and every task it forks. The
//! arena sits behind a single mutex that is never held across an await:
//! close pops one entry under the lock, drops the lock, and only then runs
//! the finalizer.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::compiler::Capability;
use crate::error::{Error, Result};
use crate::interrupt::{InterruptContext, InterruptState};
use crate::record::{Finalizer, ScopeOwner, ScopeRecord, ScopeState, StackEntry};
use crate::sync::Latch;
use crate::tracing_compat::{trace, warn};
use crate::types::{CancelReason, ExitCase, ScopeId};
use crate::util::Arena;

/// Arena of scope records.
#[derive(Debug, Default)]
pub(crate) struct ScopeTable {
    scopes: Arena<ScopeRecord>,
}

impl ScopeTable {
    pub(crate) fn get(&self, id: ScopeId) -> Option<&ScopeRecord> {
        self.scopes.get(id.arena_index())
    }

    pub(crate) fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeRecord> {
        self.scopes.get_mut(id.arena_index())
    }

    fn insert_with(&mut self, f: impl FnOnce(ScopeId) -> ScopeRecord) -> ScopeId {
        ScopeId::from_arena(self.scopes.insert_with(|idx| f(ScopeId::from_arena(idx))))
    }

    /// Removes a finished scope and detaches it from its parent.
    fn retire(&mut self, id: ScopeId) -> Option<ScopeRecord> {
        let record = self.scopes.remove(id.arena_index())?;
        if let Some(parent) = record.parent.and_then(|p| self.get_mut(p)) {
            parent.stack.remove_child(id);
        }
        Some(record)
    }

    pub(crate) fn len(&self) -> usize {
        self.scopes.len()
    }
}

struct TreeShared {
    table: Mutex<ScopeTable>,
    capability: Capability,
    trace_scopes: bool,
}

/// The scope tree of one compilation.
#[derive(Clone)]
pub struct ScopeTree {
    shared: Arc<TreeShared>,
}

struct CloseFrame {
    id: ScopeId,
    outcome: Arc<Latch<Result<()>>>,
    errors: Vec<Error>,
}

enum Next {
    Release(Finalizer),
    Descend(CloseFrame),
    Await(Arc<Latch<Result<()>>>),
    Interrupt(InterruptContext, Arc<Latch<Result<()>>>),
    Skip,
    Finished,
}

impl ScopeTree {
    /// Creates a tree holding one open root scope.
    pub(crate) fn new(capability: Capability, trace_scopes: bool) -> (Self, ScopeId) {
        let mut table = ScopeTable::default();
        let root = table.insert_with(|id| {
            ScopeRecord::new(
                id,
                None,
                InterruptContext::root(id),
                true,
                ScopeOwner::Inline,
            )
        });
        let tree = Self {
            shared: Arc::new(TreeShared {
                table: Mutex::new(table),
                capability,
                trace_scopes,
            }),
        };
        if trace_scopes {
            trace!(scope = %root, "root scope opened");
        }
        (tree, root)
    }

    /// Capability tier this tree runs under.
    pub(crate) fn capability(&self) -> Capability {
        self.shared.capability
    }

    /// Opens a child of `parent`.
    ///
    /// An interruptible child gets a context derived from the parent's;
    /// otherwise it shares the parent's context.
    pub(crate) fn open_child(
        &self,
        parent: ScopeId,
        interruptible: bool,
        owner: ScopeOwner,
    ) -> Result<ScopeId> {
        let mut table = self.shared.table.lock();
        let parent_ctx = match table.get(parent) {
            Some(rec) if rec.state.is_open() => rec.interrupt.clone(),
            _ => return Err(Error::scope_closed(parent)),
        };
        let child = table.insert_with(|id| {
            let ctx = if interruptible {
                parent_ctx.derive_child(id)
            } else {
                parent_ctx
            };
            ScopeRecord::new(id, Some(parent), ctx, interruptible, owner)
        });
        if let Some(rec) = table.get_mut(parent) {
            rec.stack.push_child(child);
        }
        drop(table);
        if self.shared.trace_scopes {
            trace!(scope = %child, parent = %parent, interruptible, owner = ?owner, "scope opened");
        }
        Ok(child)
    }

    /// Registers `finalizer` with `scope`.
    ///
    /// A scope that is closing (or gone) hands the finalizer back together
    /// with the error to report.
    pub(crate) fn register(
        &self,
        scope: ScopeId,
        finalizer: Finalizer,
    ) -> core::result::Result<(), (Finalizer, Error)> {
        let mut table = self.shared.table.lock();
        match table.get_mut(scope) {
            Some(rec) => rec
                .register(finalizer)
                .map_err(|f| (f, Error::scope_closed(scope))),
            None => Err((finalizer, Error::scope_closed(scope))),
        }
    }

    /// Effective interrupt context of `scope`.
    pub(crate) fn interrupt_context(&self, scope: ScopeId) -> Option<InterruptContext> {
        self.shared
            .table
            .lock()
            .get(scope)
            .map(|rec| rec.interrupt.clone())
    }

    /// The interruption observed by `scope`, if any.
    pub(crate) fn interruption(&self, scope: ScopeId) -> Option<InterruptState> {
        let ctx = self.interrupt_context(scope)?;
        ctx.interruption()
    }

    /// Parent of `scope`.
    pub(crate) fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.shared.table.lock().get(scope).and_then(|r| r.parent)
    }

    /// Returns true while `scope` accepts acquisitions.
    pub(crate) fn is_open(&self, scope: ScopeId) -> bool {
        self.shared
            .table
            .lock()
            .get(scope)
            .is_some_and(|r| r.state.is_open())
    }

    /// The close-outcome latch of `scope`.
    pub(crate) fn outcome(&self, scope: ScopeId) -> Option<Arc<Latch<Result<()>>>> {
        self.shared
            .table
            .lock()
            .get(scope)
            .map(|r| Arc::clone(&r.outcome))
    }

    /// Children of `scope` in creation order.
    pub(crate) fn children(&self, scope: ScopeId) -> Vec<ScopeId> {
        self.shared
            .table
            .lock()
            .get(scope)
            .map(|r| r.stack.children().collect())
            .unwrap_or_default()
    }

    /// Number of scopes that have not finished closing.
    pub(crate) fn live_scopes(&self) -> usize {
        self.shared.table.lock().len()
    }

    /// Runs one finalizer according to the capability tier.
    pub(crate) async fn run_finalizer(&self, finalizer: Finalizer, exit: ExitCase) -> Result<()> {
        let fut = finalizer.run(exit);
        if self.shared.capability == Capability::Pure {
            fut.now_or_never().unwrap_or_else(|| Err(Error::suspended()))
        } else {
            fut.await
        }
    }

    /// Closes `scope`.
    ///
    /// Entries are popped most recent first: finalizers run in place, and
    /// inline children are closed completely (descendants included) before
    /// the next entry. Children owned by a forked task are interrupted and
    /// awaited; that task reports its own errors. Finalizer errors do not
    /// stop the close; they are returned together.
    ///
    /// Closing twice returns the first close's outcome and runs nothing
    /// again. Closing a scope that no longer exists succeeds.
    pub(crate) fn close(&self, scope: ScopeId, exit: ExitCase) -> BoxFuture<'static, Result<()>> {
        let tree = self.clone();
        async move { tree.close_inner(scope, exit).await }.boxed()
    }

    async fn close_inner(&self, scope: ScopeId, exit: ExitCase) -> Result<()> {
        let (outcome, began) = {
            let mut table = self.shared.table.lock();
            let Some(rec) = table.get_mut(scope) else {
                return Ok(());
            };
            (Arc::clone(&rec.outcome), rec.begin_close())
        };
        if !began {
            return outcome.wait().await;
        }

        let mut frames = vec![CloseFrame {
            id: scope,
            outcome,
            errors: Vec::new(),
        }];

        while let Some(top) = frames.last_mut() {
            match self.next_entry(top.id) {
                Next::Release(finalizer) => {
                    if let Err(err) = self.run_finalizer(finalizer, exit.clone()).await {
                        warn!(scope = %top.id, error = %err, "finalizer failed");
                        top.errors.push(err);
                    }
                }
                Next::Descend(frame) => frames.push(frame),
                Next::Await(latch) => {
                    let _ = latch.wait().await;
                }
                Next::Interrupt(ctx, latch) => {
                    ctx.interrupt(CancelReason::parent_closed());
                    let _ = latch.wait().await;
                }
                Next::Skip => {}
                Next::Finished => {
                    let Some(frame) = frames.pop() else { break };
                    let result = self.finish(frame);
                    match (frames.last_mut(), result) {
                        (None, result) => return result,
                        (Some(parent), Err(err)) => parent.errors.push(err),
                        (Some(_), Ok(())) => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn next_entry(&self, id: ScopeId) -> Next {
        let mut table = self.shared.table.lock();
        let Some(entry) = table.get_mut(id).and_then(|r| r.stack.pop()) else {
            return Next::Finished;
        };
        match entry {
            StackEntry::Release(finalizer) => Next::Release(finalizer),
            StackEntry::Child(child) => {
                let Some(rec) = table.get_mut(child) else {
                    return Next::Skip;
                };
                let latch = Arc::clone(&rec.outcome);
                match (rec.owner, rec.state) {
                    // The owning task closes it.
                    (ScopeOwner::Fiber, ScopeState::Open) => {
                        Next::Interrupt(rec.interrupt.clone(), latch)
                    }
                    (ScopeOwner::Inline, ScopeState::Open) => {
                        rec.state = ScopeState::Closing;
                        Next::Descend(CloseFrame {
                            id: child,
                            outcome: latch,
                            errors: Vec::new(),
                        })
                    }
                    _ => Next::Await(latch),
                }
            }
        }
    }

    fn finish(&self, frame: CloseFrame) -> Result<()> {
        let result = Error::compose_all(frame.errors).map_or(Ok(()), Err);
        let mut table = self.shared.table.lock();
        if let Some(rec) = table.get_mut(frame.id) {
            rec.state = ScopeState::Closed;
        }
        let _ = frame.outcome.set(result.clone());
        table.retire(frame.id);
        drop(table);
        if self.shared.trace_scopes {
            trace!(scope = %frame.id, ok = result.is_ok(), "scope closed");
        }
        result
    }
}

impl core::fmt::Debug for ScopeTree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScopeTree")
            .field("capability", &self.shared.capability)
            .field("live_scopes", &self.live_scopes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{init_test_logging, EventLog};

    fn tree() -> (ScopeTree, ScopeId) {
        init_test_logging();
        ScopeTree::new(Capability::Sync, true)
    }

    fn logging(log: &EventLog, name: &'static str) -> Finalizer {
        let log = log.clone();
        Finalizer::sync(move |_| {
            log.push(name);
            Ok(())
        })
    }

    #[test]
    fn close_runs_single_lifo_over_finalizers_and_children() {
        let (tree, root) = tree();
        let log = EventLog::new();
        tree.register(root, logging(&log, "r1")).unwrap();
        let child = tree.open_child(root, false, ScopeOwner::Inline).unwrap();
        tree.register(child, logging(&log, "c1")).unwrap();
        let grandchild = tree.open_child(child, false, ScopeOwner::Inline).unwrap();
        tree.register(grandchild, logging(&log, "g1")).unwrap();
        tree.register(child, logging(&log, "c2")).unwrap();
        tree.register(root, logging(&log, "r2")).unwrap();

        futures::executor::block_on(tree.close(root, ExitCase::Succeeded)).unwrap();
        assert_eq!(log.snapshot(), vec!["r2", "c2", "g1", "c1", "r1"]);
        assert_eq!(tree.live_scopes(), 0);
    }

    #[test]
    fn finalizer_errors_do_not_stop_close() {
        let (tree, root) = tree();
        let log = EventLog::new();
        tree.register(root, logging(&log, "first")).unwrap();
        tree.register(root, Finalizer::sync(|_| Err(Error::user("f1"))))
            .unwrap();
        tree.register(root, Finalizer::sync(|_| Err(Error::user("f2"))))
            .unwrap();

        let err = futures::executor::block_on(tree.close(root, ExitCase::Succeeded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Composite);
        assert_eq!(err.causes(), &[Error::user("f2"), Error::user("f1")]);
        assert_eq!(log.snapshot(), vec!["first"]);
    }

    // The public handle keeps the latch; at table level a retired scope is
    // simply gone.
    #[test]
    fn second_close_of_retired_scope_runs_nothing() {
        let (tree, root) = tree();
        let child = tree.open_child(root, false, ScopeOwner::Inline).unwrap();
        let log = EventLog::new();
        tree.register(child, logging(&log, "release")).unwrap();
        tree.register(child, Finalizer::sync(|_| Err(Error::user("bad"))))
            .unwrap();
        let latch = tree.outcome(child).unwrap();

        let first = futures::executor::block_on(tree.close(child, ExitCase::Succeeded));
        let second = futures::executor::block_on(tree.close(child, ExitCase::Succeeded));
        assert_eq!(first, Err(Error::user("bad")));
        assert_eq!(second, Ok(()));
        assert_eq!(latch.get(), Some(first));
        assert_eq!(log.count("release"), 1);
        assert!(tree.children(root).is_empty());
    }

    #[test]
    fn closing_scope_rejects_registration_and_children() {
        let (tree, root) = tree();
        let log = EventLog::new();
        let tree2 = tree.clone();
        let log2 = log.clone();
        tree.register(
            root,
            Finalizer::sync(move |_| {
                let rejected = tree2.register(root, Finalizer::sync(|_| Ok(())));
                let no_child = tree2.open_child(root, false, ScopeOwner::Inline);
                if rejected.is_err() && no_child.is_err() {
                    log2.push("rejected");
                }
                Ok(())
            }),
        )
        .unwrap();
        futures::executor::block_on(tree.close(root, ExitCase::Succeeded)).unwrap();
        assert_eq!(log.snapshot(), vec!["rejected"]);
    }

    #[test]
    fn interruptible_child_derives_context() {
        let (tree, root) = tree();
        let shared = tree.open_child(root, false, ScopeOwner::Inline).unwrap();
        let own = tree.open_child(root, true, ScopeOwner::Inline).unwrap();
        let root_ctx = tree.interrupt_context(root).unwrap();
        assert!(tree.interrupt_context(shared).unwrap().same_as(&root_ctx));
        let own_ctx = tree.interrupt_context(own).unwrap();
        assert!(!own_ctx.same_as(&root_ctx));
        own_ctx.interrupt(CancelReason::signal());
        assert!(tree.interruption(root).is_none());
        assert_eq!(tree.interruption(own).unwrap().origin, own);
        assert_eq!(tree.parent(own), Some(root));
    }

    #[test]
    fn pure_capability_rejects_suspending_finalizer() {
        let (tree, root) = ScopeTree::new(Capability::Pure, false);
        tree.register(
            root,
            Finalizer::effect(|_| futures::future::pending::<Result<()>>()),
        )
        .unwrap();
        let err = futures::executor::block_on(tree.close(root, ExitCase::Succeeded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EffectSuspended);
    }
}
