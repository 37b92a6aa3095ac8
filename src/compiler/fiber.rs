//! Forked tasks.
//!
//! A fiber runs a pull in its own interruptible child scope on the
//! target's executor. That scope is owned by the fiber: a closing parent
//! interrupts it and waits, but only the fiber itself closes it. The
//! fiber's result (body error and finalizer errors) is delivered to its
//! `on_exit` hook and then to its join latch.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

use super::interpreter::drive;
use super::Env;
use crate::error::{Error, Result};
use crate::interrupt::InterruptContext;
use crate::pull::Pull;
use crate::record::ScopeOwner;
use crate::sync::Latch;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, ScopeId};

/// Handle to a forked task.
#[derive(Debug, Clone)]
pub(crate) struct Fiber {
    ctx: InterruptContext,
    done: Arc<Latch<Result<()>>>,
}

impl Fiber {
    /// Interrupts the fiber. Returns false if its context was already
    /// assigned.
    pub(crate) fn interrupt(&self, reason: CancelReason) -> bool {
        self.ctx.interrupt(reason)
    }

    /// Waits for the fiber to finish, including its scope close.
    pub(crate) async fn join(&self) -> Result<()> {
        self.done.wait().await
    }
}

/// Forks `pull` into a new fiber-owned child of `parent`. Outputs are
/// discarded.
pub(crate) fn fork<O, X>(
    env: &Env,
    parent: ScopeId,
    pull: Pull<O, ()>,
    name: &'static str,
    on_exit: X,
) -> Result<Fiber>
where
    O: Send + 'static,
    X: FnOnce(Result<()>) -> BoxFuture<'static, ()> + Send + 'static,
{
    let capability = env.tree.capability();
    let Some(executor) = env.profile.executor().filter(|_| capability.supports_concurrency())
    else {
        debug!(fiber = name, capability = %capability, "fork rejected");
        return Err(Error::unsupported(format!(
            "{name} requires the concurrent target, compiling for {capability}"
        )));
    };
    let scope = env.tree.open_child(parent, true, ScopeOwner::Fiber)?;
    let ctx = env
        .tree
        .interrupt_context(scope)
        .ok_or_else(|| Error::internal("fiber scope vanished before start"))?;
    let done = Arc::new(Latch::new());

    let task_env = env.clone();
    let task_done = Arc::clone(&done);
    let node = pull.into_node();
    debug!(fiber = name, scope = %scope, parent = %parent, "fiber spawned");
    executor.spawn(
        async move {
            let result = drive(task_env, scope, node, (), |(), _| Ok(())).await;
            debug!(fiber = name, scope = %scope, ok = result.is_ok(), "fiber finished");
            on_exit(result.clone()).await;
            let _ = task_done.set(result);
        }
        .boxed(),
    );
    Ok(Fiber { ctx, done })
}
