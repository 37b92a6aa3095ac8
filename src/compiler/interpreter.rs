//! The pull interpreter.
//!
//! [`step`] runs a node until it emits a chunk or finishes. It is a loop
//! over an explicit frame stack: binds push frames, terminals pop them, so
//! the host stack does not grow with the length of a bind chain. Only
//! `Uncons` recurses, once per level of combinator nesting.
//!
//! When a step emits, the rest of its stack is captured in a `Resume` node
//! together with the scope it was in; resuming pushes a `Restore` frame so
//! the caller's scope comes back once the captured frames are done.

use futures::future::{select, BoxFuture, Either};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use super::{Capability, Env};
use crate::error::{Error, Result};
use crate::interrupt::{InterruptOutcome, InterruptState};
use crate::pull::algebra::{unit, Frame, Interruption, Node, Terminal, Unconsed, Value};
use crate::record::{Finalizer, ScopeOwner};
use crate::scope::Scope;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, ExitCase, ScopeId};
use crate::util::panic_message;

/// Result of stepping a node.
pub(crate) enum Step {
    /// A boxed chunk, and the node that continues after it.
    Output { chunk: Value, tail: Node },
    /// The node finished.
    Done(Terminal),
}

/// Steps `node` in `scope`.
pub(crate) fn step(env: Env, scope: ScopeId, node: Node) -> BoxFuture<'static, Step> {
    step_loop(env, scope, node).boxed()
}

#[allow(clippy::too_many_lines)]
async fn step_loop(env: Env, mut scope: ScopeId, node: Node) -> Step {
    let mut stack: Vec<Frame> = Vec::new();
    let mut current = node;
    loop {
        let mut terminal = match current {
            Node::Done(terminal) => terminal,
            Node::Bind { source, conts } => {
                stack.extend(conts.into_vec().into_iter().rev().map(Frame::Bind));
                current = *source;
                continue;
            }
            Node::Resume {
                stack: captured,
                scope: resumed,
            } => {
                if resumed != scope {
                    stack.push(Frame::Restore(scope));
                    scope = resumed;
                }
                stack.extend(captured);
                Terminal::Succeeded(unit())
            }
            Node::Output(chunk) => match interruption(&env, scope) {
                Some(terminal) => terminal,
                None => {
                    return Step::Output {
                        chunk,
                        tail: Node::Resume { stack, scope },
                    }
                }
            },
            Node::Eval(fut) => eval(&env, scope, fut).await,
            Node::Acquire(fut) => acquire(&env, scope, fut).await,
            Node::InScope {
                body,
                interruptible,
            } => match interruption(&env, scope) {
                Some(terminal) => terminal,
                None => match env
                    .tree
                    .open_child(scope, interruptible, ScopeOwner::Inline)
                {
                    Ok(child) => {
                        stack.push(Frame::Close {
                            child,
                            parent: scope,
                            interruptible,
                        });
                        scope = child;
                        current = *body;
                        continue;
                    }
                    Err(err) => Terminal::Failed(err),
                },
            },
            Node::InterruptWhen(signal) => watch(&env, scope, signal),
            Node::Uncons(inner) => match step(env.clone(), scope, *inner).await {
                Step::Output { chunk, tail } => {
                    Terminal::Succeeded(Box::new(Unconsed::Output(chunk, tail)))
                }
                Step::Done(Terminal::Succeeded(result)) => {
                    Terminal::Succeeded(Box::new(Unconsed::Done(result)))
                }
                Step::Done(other) => other,
            },
            Node::GetScope => Terminal::Succeeded(Box::new(Scope::new(env.clone(), scope))),
        };

        current = loop {
            match stack.pop() {
                None => return Step::Done(terminal),
                Some(Frame::Bind(cont)) => break cont.apply(terminal),
                Some(Frame::Restore(saved)) => scope = saved,
                Some(Frame::Close {
                    child,
                    parent,
                    interruptible,
                }) => {
                    scope = parent;
                    terminal = close_scope(&env, child, interruptible, terminal).await;
                    if let Terminal::Interrupted(i) = &terminal {
                        if i.origin == child {
                            terminal = Terminal::Succeeded(unit());
                        }
                    }
                }
            }
        };
    }
}

fn from_interrupt(state: InterruptState) -> Terminal {
    match state.outcome {
        InterruptOutcome::Canceled(reason) => Terminal::Interrupted(Interruption {
            origin: state.origin,
            reason,
        }),
        InterruptOutcome::Errored(err) => Terminal::Failed(err),
        InterruptOutcome::Closed => {
            Terminal::Failed(Error::internal("effect raced a sealed interrupt context"))
        }
    }
}

fn from_result(result: Result<Value>) -> Terminal {
    match result {
        Ok(value) => Terminal::Succeeded(value),
        Err(err) => Terminal::Failed(err),
    }
}

fn interruption(env: &Env, scope: ScopeId) -> Option<Terminal> {
    env.tree.interruption(scope).map(from_interrupt)
}

async fn eval(env: &Env, scope: ScopeId, fut: BoxFuture<'static, Result<Value>>) -> Terminal {
    if let Some(terminal) = interruption(env, scope) {
        return terminal;
    }
    match env.tree.capability() {
        Capability::Pure => fut
            .now_or_never()
            .map_or_else(|| Terminal::Failed(Error::suspended()), from_result),
        Capability::Sync => from_result(fut.await),
        Capability::Concurrent => {
            let Some(ctx) = env.tree.interrupt_context(scope) else {
                return Terminal::Failed(Error::scope_closed(scope));
            };
            match ctx.race(fut).await {
                Ok(result) => from_result(result),
                Err(state) => from_interrupt(state),
            }
        }
    }
}

async fn acquire(
    env: &Env,
    scope: ScopeId,
    fut: BoxFuture<'static, Result<(Value, Finalizer)>>,
) -> Terminal {
    if let Some(terminal) = interruption(env, scope) {
        return terminal;
    }
    let acquired = match env.tree.capability() {
        Capability::Pure => fut.now_or_never().unwrap_or_else(|| Err(Error::suspended())),
        Capability::Sync | Capability::Concurrent => fut.await,
    };
    let (value, finalizer) = match acquired {
        Ok(pair) => pair,
        Err(err) => return Terminal::Failed(err),
    };
    match env.tree.register(scope, finalizer) {
        Ok(()) => Terminal::Succeeded(value),
        Err((finalizer, err)) => {
            let released = env
                .tree
                .run_finalizer(finalizer, ExitCase::Errored(err.clone()))
                .await;
            match released {
                Ok(()) => Terminal::Failed(err),
                Err(release_err) => Terminal::Failed(Error::compose(err, release_err)),
            }
        }
    }
}

fn watch(env: &Env, scope: ScopeId, signal: BoxFuture<'static, Result<()>>) -> Terminal {
    let capability = env.tree.capability();
    if !capability.supports_interruption() {
        debug!(capability = %capability, "interrupt_when rejected");
        return Terminal::Failed(Error::unsupported(format!(
            "interrupt_when requires the concurrent target, compiling for {capability}"
        )));
    }
    let (Some(executor), Some(ctx)) = (env.profile.executor(), env.tree.interrupt_context(scope))
    else {
        return Terminal::Failed(Error::unsupported("interrupt_when without an executor"));
    };
    executor.spawn(
        async move {
            let signal = std::pin::pin!(signal);
            let fired = std::pin::pin!(ctx.fired());
            match select(signal, fired).await {
                Either::Left((Ok(()), _)) => {
                    ctx.interrupt(CancelReason::signal());
                }
                Either::Left((Err(err), _)) => {
                    ctx.cancel(InterruptOutcome::Errored(err));
                }
                Either::Right(_) => {}
            }
        }
        .boxed(),
    );
    Terminal::Succeeded(unit())
}

/// Closes `scope` after its body ended with `terminal`.
///
/// Close errors join the terminal: a failure is composed with them, a
/// success or interruption is replaced by them. If the scope owns its
/// interrupt context and that context fired with an error, the error
/// outranks success and interruption.
pub(crate) async fn close_scope(
    env: &Env,
    scope: ScopeId,
    interruptible: bool,
    terminal: Terminal,
) -> Terminal {
    let ctx = if interruptible {
        env.tree.interrupt_context(scope)
    } else {
        None
    };
    let closed = env.tree.close(scope, terminal.exit_case()).await;
    let terminal = match (terminal, closed) {
        (terminal, Ok(())) => terminal,
        (Terminal::Failed(err), Err(close_err)) => Terminal::Failed(Error::compose(err, close_err)),
        (_, Err(close_err)) => Terminal::Failed(close_err),
    };
    let sealed = ctx.map(|ctx| ctx.seal());
    match sealed {
        Some(InterruptState {
            origin,
            outcome: InterruptOutcome::Errored(signal_err),
        }) if origin == scope => match terminal {
            Terminal::Failed(err) if err.leaves().any(|e| *e == signal_err) => {
                Terminal::Failed(err)
            }
            Terminal::Failed(err) => Terminal::Failed(Error::compose(err, signal_err)),
            _ => Terminal::Failed(signal_err),
        },
        _ => terminal,
    }
}

/// Runs `node` to completion in `scope`, folding every chunk, then closes
/// `scope`.
///
/// Used for the root of a compilation and for forked tasks. A panic inside
/// the body is reported as an error after the scope has been closed. An
/// interruption ends the run quietly with the value folded so far.
pub(crate) async fn drive<A, F>(env: Env, scope: ScopeId, node: Node, init: A, fold: F) -> Result<A>
where
    A: Send + 'static,
    F: FnMut(A, Value) -> Result<A> + Send + 'static,
{
    let body = AssertUnwindSafe(run_body(env.clone(), scope, node, init, fold))
        .catch_unwind()
        .await;
    let (acc, terminal) = match body {
        Ok(pair) => pair,
        Err(payload) => (
            None,
            Terminal::Failed(Error::panicked(panic_message(&*payload))),
        ),
    };
    match close_scope(&env, scope, true, terminal).await {
        Terminal::Failed(err) => Err(err),
        Terminal::Succeeded(_) | Terminal::Interrupted(_) => {
            acc.ok_or_else(|| Error::internal("pull ended without a folded value"))
        }
    }
}

async fn run_body<A, F>(
    env: Env,
    scope: ScopeId,
    mut node: Node,
    init: A,
    mut fold: F,
) -> (Option<A>, Terminal)
where
    F: FnMut(A, Value) -> Result<A>,
{
    let mut acc = init;
    loop {
        match step(env.clone(), scope, node).await {
            Step::Output { chunk, tail } => match fold(acc, chunk) {
                Ok(next) => {
                    acc = next;
                    node = tail;
                }
                Err(err) => return (None, Terminal::Failed(err)),
            },
            Step::Done(terminal) => return (Some(acc), terminal),
        }
    }
}
