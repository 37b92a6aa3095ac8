//! Pulls: suspended, composable producers of chunks with a final result.
//!
//! A `Pull<O, R>` emits chunks of `O` and finishes with an `R`, an error,
//! or an interruption. Building a pull runs nothing; compilation walks it
//! against a [`CompilerTarget`](crate::compiler::CompilerTarget).
//!
//! Sequencing with [`Pull::flat_map`] is stack-safe for chains of any
//! length in either association: the interpreter keeps continuations on an
//! explicit frame stack instead of the host call stack.

pub(crate) mod algebra;

use core::fmt;
use core::marker::PhantomData;
use futures::FutureExt;
use std::future::Future;

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::record::Finalizer;
use crate::scope::Scope;
use crate::types::ExitCase;
use algebra::{downcast, Node, Terminal, Value};

/// A suspended computation emitting `Chunk<O>`s and producing `R`.
#[must_use = "pulls do nothing until compiled"]
pub struct Pull<O, R> {
    node: Node,
    _marker: PhantomData<fn() -> (O, R)>,
}

/// Result of [`Pull::uncons`].
pub enum Unconsed<O, R> {
    /// The next chunk and the rest of the pull.
    Chunk(Chunk<O>, Pull<O, R>),
    /// The pull finished without emitting.
    Done(R),
}

impl<O, R> Pull<O, R> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }
}

impl<O, R> Pull<O, R>
where
    O: Send + 'static,
    R: Send + 'static,
{
    /// Finishes immediately with `r`.
    pub fn pure(r: R) -> Self {
        Self::from_node(Node::succeeded(r))
    }

    /// Fails with `error`.
    pub fn raise_error(error: Error) -> Self {
        Self::from_node(Node::failed(error))
    }

    /// Runs one effect and finishes with its value.
    pub fn eval<F>(effect: F) -> Self
    where
        F: Future<Output = Result<R>> + Send + 'static,
    {
        Self::from_node(Node::Eval(
            async move { effect.await.map(|r| Box::new(r) as Value) }.boxed(),
        ))
    }

    /// Defers building the pull until compilation reaches it.
    pub fn suspend<F>(make: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Pull::<O, ()>::pure(()).flat_map(move |()| make())
    }

    /// Acquires a resource and registers `release` with the current scope.
    ///
    /// Acquisition is not interruptible. `release` runs exactly once, with
    /// the exit case of the scope that closes it.
    pub fn acquire<A, F, Fut>(acquire: A, release: F) -> Self
    where
        R: Clone,
        A: Future<Output = Result<R>> + Send + 'static,
        F: FnOnce(R, ExitCase) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_node(Node::Acquire(
            async move {
                let resource = acquire.await?;
                let held = resource.clone();
                let finalizer = Finalizer::effect(move |exit| release(held, exit));
                Ok::<_, Error>((Box::new(resource) as Value, finalizer))
            }
            .boxed(),
        ))
    }

    /// Sequences `f` after this pull's result.
    pub fn flat_map<R2, F>(self, f: F) -> Pull<O, R2>
    where
        R2: Send + 'static,
        F: FnOnce(R) -> Pull<O, R2> + Send + 'static,
    {
        Pull::from_node(self.node.bind(move |terminal| match terminal {
            Terminal::Succeeded(value) => match downcast::<R>(value) {
                Ok(r) => f(r).node,
                Err(err) => Node::failed(err),
            },
            other => Node::Done(other),
        }))
    }

    /// Maps the result.
    pub fn map<R2, F>(self, f: F) -> Pull<O, R2>
    where
        R2: Send + 'static,
        F: FnOnce(R) -> R2 + Send + 'static,
    {
        Pull::from_node(self.node.bind(move |terminal| match terminal {
            Terminal::Succeeded(value) => match downcast::<R>(value) {
                Ok(r) => Node::succeeded(f(r)),
                Err(err) => Node::failed(err),
            },
            other => Node::Done(other),
        }))
    }

    /// Runs `next` after this pull, discarding this pull's result.
    pub fn then<R2>(self, next: Pull<O, R2>) -> Pull<O, R2>
    where
        R2: Send + 'static,
    {
        Pull::from_node(self.node.then(next.node))
    }

    /// Continues with `handler` if this pull fails.
    ///
    /// Interruption is not an error and passes through.
    pub fn handle_error_with<F>(self, handler: F) -> Self
    where
        F: FnOnce(Error) -> Self + Send + 'static,
    {
        Self::from_node(self.node.bind(move |terminal| match terminal {
            Terminal::Failed(err) => handler(err).node,
            other => Node::Done(other),
        }))
    }

    /// Turns a failure into an `Err` result.
    pub fn attempt(self) -> Pull<O, Result<R>> {
        Pull::from_node(self.node.bind(|terminal| match terminal {
            Terminal::Succeeded(value) => match downcast::<R>(value) {
                Ok(r) => Node::succeeded(Ok::<R, Error>(r)),
                Err(err) => Node::failed(err),
            },
            Terminal::Failed(err) => Node::succeeded(Err::<R, Error>(err)),
            other @ Terminal::Interrupted(_) => Node::Done(other),
        }))
    }

    /// Runs this pull in a fresh child scope, closed as soon as the result
    /// is available.
    pub fn scope(self) -> Self {
        Self::from_node(Node::InScope {
            body: Box::new(self.node),
            interruptible: false,
        })
    }

    /// Steps the pull to its first chunk or its result.
    ///
    /// Empty chunks are never returned as the head.
    pub fn uncons<P>(self) -> Pull<P, Unconsed<O, R>>
    where
        P: Send + 'static,
    {
        Pull::from_node(Node::Uncons(Box::new(self.node)).bind(
            |terminal| match terminal {
                Terminal::Succeeded(value) => match downcast::<algebra::Unconsed>(value) {
                    Ok(algebra::Unconsed::Output(chunk, tail)) => {
                        match downcast::<Chunk<O>>(chunk) {
                            Ok(chunk) => Node::succeeded(Unconsed::Chunk(
                                chunk,
                                Pull::<O, R>::from_node(tail),
                            )),
                            Err(err) => Node::failed(err),
                        }
                    }
                    Ok(algebra::Unconsed::Done(result)) => match downcast::<R>(result) {
                        Ok(r) => Node::succeeded(Unconsed::<O, R>::Done(r)),
                        Err(err) => Node::failed(err),
                    },
                    Err(err) => Node::failed(err),
                },
                other => Node::Done(other),
            },
        ))
    }
}

impl<O> Pull<O, ()>
where
    O: Send + 'static,
{
    /// Finishes immediately.
    pub fn done() -> Self {
        Self::pure(())
    }

    /// Yields a handle to the scope the pull is running in.
    pub fn get_scope() -> Pull<O, Scope> {
        Pull::from_node(Node::GetScope)
    }

    /// Emits `chunk`. An empty chunk emits nothing.
    pub fn output(chunk: Chunk<O>) -> Self {
        if chunk.is_empty() {
            Self::done()
        } else {
            Self::from_node(Node::Output(Box::new(chunk)))
        }
    }

    /// Emits a single element.
    pub fn output1(o: O) -> Self {
        Self::output(Chunk::singleton(o))
    }

    /// Runs `post` after this pull on success or failure. A failure is
    /// re-raised after `post` finishes.
    pub fn on_complete<F>(self, post: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_node(self.node.bind(move |terminal| match terminal {
            Terminal::Succeeded(_) => post().node,
            Terminal::Failed(err) => post().then(Self::raise_error(err)).node,
            other @ Terminal::Interrupted(_) => Node::Done(other),
        }))
    }

    /// Runs this pull in a fresh interruptible child scope.
    ///
    /// An interruption fired on that scope's own context ends the pull
    /// quietly at this boundary, after the scope has closed.
    pub fn interrupt_scope(self) -> Self {
        Self::from_node(Node::InScope {
            body: Box::new(self.node),
            interruptible: true,
        })
    }

    /// Interrupts this pull when `signal` completes.
    ///
    /// Every effect of the pull races the signal. If the signal wins, the
    /// running effect is dropped, every scope opened by the pull closes and
    /// the pull ends. If the signal fails, its error replaces the pull's
    /// result. Only the concurrent target supports this.
    pub fn interrupt_when<S>(self, signal: S) -> Self
    where
        S: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_node(Node::InterruptWhen(signal.boxed()))
            .then(self)
            .interrupt_scope()
    }
}

impl<O, R> fmt::Debug for Pull<O, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pull").field(&self.node).finish()
    }
}

impl<O: fmt::Debug, R: fmt::Debug> fmt::Debug for Unconsed<O, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk(chunk, _) => f.debug_tuple("Chunk").field(chunk).finish_non_exhaustive(),
            Self::Done(r) => f.debug_tuple("Done").field(r).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompilerTarget, PureTarget};
    use crate::error::ErrorKind;
    use crate::test_utils::EventLog;

    fn run<O: Send + 'static, R: Send + 'static>(pull: Pull<O, R>) -> Result<(Vec<O>, R)> {
        let slot = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let out = std::sync::Arc::clone(&slot);
        let unit = pull.flat_map(move |r| {
            *out.lock() = Some(r);
            Pull::done()
        });
        let items = PureTarget.run(crate::compiler::compile_fold(
            unit,
            PureTarget.profile(),
            Vec::new(),
            |mut acc, chunk| {
                acc.extend(chunk);
                acc
            },
        ))?;
        let r = slot.lock().take().ok_or_else(|| Error::internal("no result"))?;
        Ok((items, r))
    }

    #[test]
    fn map_and_flat_map_thread_the_result() {
        let pull = Pull::<u8, u32>::pure(2)
            .map(|x| x * 10)
            .flat_map(|x| Pull::output1(1).map(move |()| x + 1));
        let (items, r) = run(pull).unwrap();
        assert_eq!(items, vec![1]);
        assert_eq!(r, 21);
    }

    #[test]
    fn handle_error_recovers_and_attempt_captures() {
        let recovered = Pull::<u8, u32>::raise_error(Error::user("boom"))
            .handle_error_with(|e| {
                assert_eq!(e.message(), Some("boom"));
                Pull::pure(7)
            });
        assert_eq!(run(recovered).unwrap().1, 7);

        let attempted = Pull::<u8, u32>::raise_error(Error::user("boom")).attempt();
        let (_, r) = run(attempted).unwrap();
        assert_eq!(r.unwrap_err(), Error::user("boom"));
    }

    #[test]
    fn handler_is_skipped_on_success() {
        let pull = Pull::<u8, u32>::pure(1).handle_error_with(|_| Pull::pure(2));
        assert_eq!(run(pull).unwrap().1, 1);
    }

    #[test]
    fn suspend_defers_construction() {
        let log = EventLog::new();
        let log2 = log.clone();
        let pull = Pull::<u8, ()>::suspend(move || {
            log2.push("built");
            Pull::output1(1)
        });
        assert!(log.snapshot().is_empty());
        assert_eq!(run(pull).unwrap().0, vec![1]);
        assert_eq!(log.snapshot(), vec!["built"]);
    }

    #[test]
    fn uncons_splits_head_from_tail() {
        let source = Pull::output(Chunk::from_vec(vec![1, 2])).then(Pull::output1(3));
        let pull = source.uncons::<u8>().flat_map(|step| match step {
            Unconsed::Chunk(head, tail) => {
                assert_eq!(head.as_slice(), &[1, 2]);
                tail.uncons::<u8>().map(|rest| match rest {
                    Unconsed::Chunk(next, _) => next.into_vec(),
                    Unconsed::Done(()) => Vec::new(),
                })
            }
            Unconsed::Done(()) => Pull::pure(Vec::new()),
        });
        let (items, r) = run(pull).unwrap();
        assert!(items.is_empty());
        assert_eq!(r, vec![3]);
    }

    #[test]
    fn uncons_of_empty_is_done() {
        let pull = Pull::<u8, u32>::pure(4).uncons::<u8>().map(|step| match step {
            Unconsed::Done(r) => r,
            Unconsed::Chunk(..) => 0,
        });
        assert_eq!(run(pull).unwrap().1, 4);
    }

    #[test]
    fn scope_closes_before_continuation() {
        let log = EventLog::new();
        let (l1, l2) = (log.clone(), log.clone());
        let pull = Pull::<u8, ()>::acquire(async { Ok(()) }, move |(), _| {
            l1.push("release");
            async { Ok(()) }
        })
        .scope()
        .flat_map(move |()| {
            l2.push("after");
            Pull::done()
        });
        run(pull).unwrap();
        assert_eq!(log.snapshot(), vec!["release", "after"]);
    }

    #[test]
    fn on_complete_runs_and_reraises() {
        let log = EventLog::new();
        let log2 = log.clone();
        let pull = Pull::<u8, ()>::raise_error(Error::user("x")).on_complete(move || {
            log2.push("post");
            Pull::output1(9)
        });
        let err = run(pull).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(log.snapshot(), vec!["post"]);
    }

    #[test]
    fn long_left_nested_chain_is_flat() {
        let mut pull = Pull::<u8, u64>::pure(0);
        for _ in 0..100_000 {
            pull = pull.map(|x| x + 1);
        }
        assert_eq!(run(pull).unwrap().1, 100_000);
    }
}
