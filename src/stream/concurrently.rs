//! Concurrently: a foreground stream with a background fiber.
//!
//! The background runs in a fiber-owned child of an interruptible scope
//! that hosts the foreground. A background failure fires that scope's
//! context with the error, so the foreground stops at its next effect or
//! emission and the error is raised at the boundary. When the foreground
//! ends first, the guard finalizer interrupts the background and waits for
//! its scope to close.

use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::compiler::Fiber;
use crate::error::{Error, Result};
use crate::interrupt::InterruptOutcome;
use crate::pull::Pull;
use crate::scope::Scope;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, ExitCase};

#[derive(Clone)]
struct Background {
    fiber: Fiber,
    /// The failure already reached the foreground through its context.
    delivered: Arc<AtomicBool>,
}

impl Background {
    fn start<P: Send + 'static>(scope: &Scope, pull: Pull<P, ()>) -> Result<Self> {
        let ctx = scope
            .interrupt_context()
            .ok_or_else(|| Error::internal("concurrently outside an interruptible scope"))?;
        let delivered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&delivered);
        let fiber = scope.fork(pull, "concurrently background", move |result| {
            async move {
                if let Err(err) = result {
                    debug!(error = %err, "background failed, interrupting foreground");
                    if ctx.cancel(InterruptOutcome::Errored(err)) {
                        flag.store(true, Ordering::Release);
                    }
                }
            }
            .boxed()
        })?;
        Ok(Self { fiber, delivered })
    }

    async fn stop(&self) -> Result<()> {
        self.fiber.interrupt(CancelReason::halted());
        match self.fiber.join().await {
            Err(_) if self.delivered.load(Ordering::Acquire) => Ok(()),
            other => other,
        }
    }
}

pub(super) fn concurrently<O, P>(foreground: Pull<O, ()>, background: Pull<P, ()>) -> Pull<O, ()>
where
    O: Send + 'static,
    P: Send + 'static,
{
    Pull::<O, ()>::get_scope()
        .flat_map(move |scope| {
            if let Err(err) = scope.require_concurrency("concurrently") {
                return Pull::raise_error(err);
            }
            Pull::acquire(
                async move { Background::start(&scope, background) },
                |bg: Background, _: ExitCase| async move { bg.stop().await },
            )
            .then(foreground)
        })
        .interrupt_scope()
}
