//! Compilation: driving a pull to completion against a target.
//!
//! [`CompilerTarget`] picks the capability tier; the interpreter steps the
//! pull through its scope tree and folds emitted chunks. Each compilation
//! gets its own [`ScopeTree`] whose root carries a fresh interrupt context.

mod executor;
mod fiber;
mod interpreter;
mod target;

pub use executor::{Executor, TokioExecutor};
pub use target::{
    Capability, CompilerTarget, ConcurrentTarget, PureTarget, SyncTarget, TargetProfile,
};

pub(crate) use fiber::{fork, Fiber};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::error::Result;
use crate::pull::algebra::downcast;
use crate::pull::Pull;
use crate::scope::ScopeTree;
use crate::tracing_compat::{debug, warn};
use crate::types::{CancelReason, ExitCase, ScopeId};

/// What the interpreter carries: the scope tree plus the target profile.
#[derive(Clone, Debug)]
pub(crate) struct Env {
    pub(crate) tree: ScopeTree,
    pub(crate) profile: TargetProfile,
}

/// Winds down a compilation whose future is dropped before it finishes.
///
/// The root context is interrupted so forked work stops. The root scope is
/// then closed on the executor, which releases resources still held by
/// inline scopes. Blocking targets never drop a running compilation.
struct RootGuard {
    tree: ScopeTree,
    root: ScopeId,
    executor: Option<Arc<dyn Executor>>,
    armed: bool,
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let reason = CancelReason::parent_closed();
        if let Some(ctx) = self.tree.interrupt_context(self.root) {
            ctx.interrupt(reason.clone());
        }
        let Some(executor) = &self.executor else {
            return;
        };
        debug!(scope = %self.root, "compilation dropped, closing root scope");
        let root = self.root;
        let close = self.tree.close(root, ExitCase::Canceled(reason));
        executor.spawn(
            async move {
                if let Err(err) = close.await {
                    warn!(scope = %root, error = %err, "closing a dropped compilation failed");
                }
            }
            .boxed(),
        );
    }
}

/// Compiles `pull`, folding each emitted chunk into the accumulator.
pub(crate) fn compile_fold<O, A, F>(
    pull: Pull<O, ()>,
    profile: &TargetProfile,
    init: A,
    mut fold: F,
) -> BoxFuture<'static, Result<A>>
where
    O: Send + 'static,
    A: Send + 'static,
    F: FnMut(A, Chunk<O>) -> A + Send + 'static,
{
    let (tree, root) = ScopeTree::new(profile.capability(), profile.config().trace_scopes);
    let env = Env {
        tree,
        profile: profile.clone(),
    };
    let node = pull.into_node();
    async move {
        let mut guard = RootGuard {
            tree: env.tree.clone(),
            root,
            executor: env.profile.executor().cloned(),
            armed: true,
        };
        let result = interpreter::drive(env, root, node, init, move |acc, value| {
            Ok(fold(acc, downcast::<Chunk<O>>(value)?))
        })
        .await;
        guard.armed = false;
        result
    }
    .boxed()
}
