//! The erased pull algebra.
//!
//! [`Pull`](super::Pull) is a typed wrapper over [`Node`]. Values cross the
//! interpreter boxed as `dyn Any`; the typed continuations downcast them
//! back, so a mismatch is an internal error rather than a panic.
//!
//! Sequencing never nests: binding onto a `Bind` appends to its
//! continuation list, so a left-nested chain of any length is one node.
//! A right-nested chain of `then`s is held as data rather than inside
//! closures, and [`Conts`] tears it down with a work list on drop.

use core::fmt;
use futures::future::BoxFuture;
use std::any::Any;

use crate::error::{Error, Result};
use crate::record::Finalizer;
use crate::types::{CancelReason, ExitCase, ScopeId};

/// A boxed value travelling through the interpreter.
pub(crate) type Value = Box<dyn Any + Send>;

pub(crate) fn unit() -> Value {
    Box::new(())
}

pub(crate) fn downcast<T: 'static>(value: Value) -> Result<T> {
    value.downcast::<T>().map(|b| *b).map_err(|_| {
        Error::internal(format!(
            "pull value type mismatch: expected {}",
            std::any::type_name::<T>()
        ))
    })
}

/// The reason a pull stopped without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Interruption {
    /// Scope whose context fired; the unwind stops there.
    pub origin: ScopeId,
    pub reason: CancelReason,
}

/// How a pull (or a step of one) ended.
pub(crate) enum Terminal {
    Succeeded(Value),
    Failed(Error),
    Interrupted(Interruption),
}

impl Terminal {
    pub(crate) fn exit_case(&self) -> ExitCase {
        match self {
            Self::Succeeded(_) => ExitCase::Succeeded,
            Self::Failed(e) => ExitCase::Errored(e.clone()),
            Self::Interrupted(i) => ExitCase::Canceled(i.reason.clone()),
        }
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(_) => f.write_str("Succeeded(..)"),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Self::Interrupted(i) => f.debug_tuple("Interrupted").field(i).finish(),
        }
    }
}

/// A continuation. It sees every terminal, not just success, so error
/// handlers and success binds share one frame type.
pub(crate) enum Cont {
    Fn(Box<dyn FnOnce(Terminal) -> Node + Send>),
    /// Continue with the node on success; pass any other terminal through.
    Then(Node),
}

impl Cont {
    pub(crate) fn apply(self, terminal: Terminal) -> Node {
        match (self, terminal) {
            (Self::Fn(f), terminal) => f(terminal),
            (Self::Then(next), Terminal::Succeeded(_)) => next,
            (Self::Then(_), other) => Node::Done(other),
        }
    }

    fn release_into(self, work: &mut Vec<Node>) {
        if let Self::Then(next) = self {
            work.push(next);
        }
    }
}

/// The continuation list of a `Bind`.
pub(crate) struct Conts(Vec<Cont>);

impl Conts {
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn into_vec(mut self) -> Vec<Cont> {
        std::mem::take(&mut self.0)
    }
}

impl Drop for Conts {
    fn drop(&mut self) {
        if self.0.is_empty() {
            return;
        }
        let mut work = Vec::new();
        for cont in self.0.drain(..) {
            cont.release_into(&mut work);
        }
        while let Some(node) = work.pop() {
            node.dismantle(&mut work);
        }
    }
}

/// One node of a suspended pull.
pub(crate) enum Node {
    /// Already finished.
    Done(Terminal),
    /// Emit a boxed `Chunk<O>`.
    Output(Value),
    /// Run one effect, raced against the scope's interrupt context.
    Eval(BoxFuture<'static, Result<Value>>),
    /// Acquire a resource (uncancelable) and register its finalizer.
    Acquire(BoxFuture<'static, Result<(Value, Finalizer)>>),
    /// Run `body` in a fresh child scope.
    InScope { body: Box<Node>, interruptible: bool },
    /// Fire the current scope's context when the signal completes.
    InterruptWhen(BoxFuture<'static, Result<()>>),
    /// Run `source`, then feed its terminal through `conts` in order.
    Bind { source: Box<Node>, conts: Conts },
    /// Step the inner pull to its first output or its result.
    Uncons(Box<Node>),
    /// Yield a handle to the current scope.
    GetScope,
    /// Continue a captured stack in the scope it was captured in.
    Resume { stack: Vec<Frame>, scope: ScopeId },
}

impl Node {
    pub(crate) fn succeeded<T: Any + Send>(value: T) -> Self {
        Self::Done(Terminal::Succeeded(Box::new(value)))
    }

    pub(crate) fn failed(error: Error) -> Self {
        Self::Done(Terminal::Failed(error))
    }

    /// Appends a continuation that sees this node's terminal.
    pub(crate) fn bind<F>(self, f: F) -> Self
    where
        F: FnOnce(Terminal) -> Node + Send + 'static,
    {
        self.push(Cont::Fn(Box::new(f)))
    }

    /// Runs `next` once this node succeeds.
    pub(crate) fn then(self, next: Node) -> Self {
        self.push(Cont::Then(next))
    }

    fn push(self, cont: Cont) -> Self {
        match self {
            Self::Bind { source, mut conts } => {
                conts.0.push(cont);
                Self::Bind { source, conts }
            }
            other => Self::Bind {
                source: Box::new(other),
                conts: Conts(vec![cont]),
            },
        }
    }

    /// Moves every child node onto `work` and drops the rest.
    fn dismantle(self, work: &mut Vec<Node>) {
        match self {
            Self::Bind { source, mut conts } => {
                work.push(*source);
                for cont in conts.0.drain(..) {
                    cont.release_into(work);
                }
            }
            Self::InScope { body, .. } | Self::Uncons(body) => work.push(*body),
            Self::Resume { stack, .. } => {
                for frame in stack {
                    if let Frame::Bind(cont) = frame {
                        cont.release_into(work);
                    }
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(t) => f.debug_tuple("Done").field(t).finish(),
            Self::Output(_) => f.write_str("Output"),
            Self::Eval(_) => f.write_str("Eval"),
            Self::Acquire(_) => f.write_str("Acquire"),
            Self::InScope { interruptible, .. } => f
                .debug_struct("InScope")
                .field("interruptible", interruptible)
                .finish_non_exhaustive(),
            Self::InterruptWhen(_) => f.write_str("InterruptWhen"),
            Self::Bind { source, conts } => f
                .debug_struct("Bind")
                .field("source", source)
                .field("conts", &conts.len())
                .finish(),
            Self::Uncons(inner) => f.debug_tuple("Uncons").field(inner).finish(),
            Self::GetScope => f.write_str("GetScope"),
            Self::Resume { stack, scope } => f
                .debug_struct("Resume")
                .field("frames", &stack.len())
                .field("scope", scope)
                .finish(),
        }
    }
}

/// A frame of the interpreter's explicit continuation stack.
pub(crate) enum Frame {
    Bind(Cont),
    /// Close `child` and return to `parent`.
    Close {
        child: ScopeId,
        parent: ScopeId,
        interruptible: bool,
    },
    /// Switch back to a scope left by a `Resume`.
    Restore(ScopeId),
}

/// Erased result of an `Uncons` node.
pub(crate) enum Unconsed {
    Output(Value, Node),
    Done(Value),
}
