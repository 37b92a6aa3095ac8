//! The stream façade.
//!
//! A [`Stream<O>`] is a `Pull<O, ()>` with the usual collection-style
//! combinators on top. Streams are descriptions: nothing runs until
//! [`Stream::compile`] hands one to a target. A stream is consumed by
//! compiling it; use [`Stream::repeat_with`] to rebuild one on demand.
//!
//! # Combinators
//!
//! ## Construction
//! - [`Stream::emit`], [`Stream::emits`], [`Stream::chunk`], [`Stream::from_iter`], [`Stream::range`]
//! - [`Stream::eval`], [`Stream::exec`], [`Stream::suspend`], [`Stream::never`]
//! - [`Stream::bracket`], [`Stream::bracket_case`]
//!
//! ## Transformation
//! - [`Stream::map`], [`Stream::map_chunks`], [`Stream::filter`], [`Stream::eval_map`]
//! - [`Stream::flat_map`], [`Stream::append`], [`Stream::zip`], [`Stream::fold`]
//! - [`Stream::take`], [`Stream::drop`], [`Stream::chunks`]
//!
//! ## Concurrency
//! - [`Stream::merge`] and its halting variants
//! - [`Stream::concurrently`]
//! - [`Stream::par_join`]
//! - [`Stream::interrupt_when`]
//!
//! The concurrency combinators need the concurrent target; compiled
//! against the pure or sync target they fail with `Unsupported`.

mod concurrently;
mod merge;
mod par_join;

pub use merge::Halt;

use core::fmt;
use std::future::Future;

use crate::chunk::Chunk;
use crate::compiler::{compile_fold, CompilerTarget};
use crate::error::{Error, Result};
use crate::pull::{Pull, Unconsed};
use crate::types::ExitCase;

/// A chunked, effectful, resource-safe sequence of `O`.
#[must_use = "streams do nothing until compiled"]
pub struct Stream<O> {
    pull: Pull<O, ()>,
}

impl<O> Stream<O> {
    /// Wraps a pull.
    pub fn from_pull(pull: Pull<O, ()>) -> Self {
        Self { pull }
    }

    /// The underlying pull.
    pub fn into_pull(self) -> Pull<O, ()> {
        self.pull
    }
}

impl<O: Send + 'static> Stream<O> {
    /// The stream with no elements.
    pub fn empty() -> Self {
        Self::from_pull(Pull::done())
    }

    /// A single element.
    pub fn emit(o: O) -> Self {
        Self::from_pull(Pull::output1(o))
    }

    /// The given elements, as one chunk.
    pub fn emits(items: Vec<O>) -> Self {
        Self::chunk(Chunk::from_vec(items))
    }

    /// One chunk.
    pub fn chunk(chunk: Chunk<O>) -> Self {
        Self::from_pull(Pull::output(chunk))
    }

    /// The elements of `iter`, read lazily in chunks of the `chunk_size`
    /// configured on the target it is compiled for.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = O>,
        I::IntoIter: Send + 'static,
    {
        fn go<O, It>(mut iter: It, size: usize) -> Pull<O, ()>
        where
            O: Send + 'static,
            It: Iterator<Item = O> + Send + 'static,
        {
            let chunk: Chunk<O> = iter.by_ref().take(size).collect();
            if chunk.is_empty() {
                return Pull::done();
            }
            Pull::output(chunk).flat_map(move |()| go(iter, size))
        }
        let iter = iter.into_iter();
        Self::from_pull(
            Pull::get_scope().flat_map(move |scope| go(iter, scope.config().chunk_size.max(1))),
        )
    }

    /// Runs `effect` and emits its value.
    pub fn eval<F>(effect: F) -> Self
    where
        F: Future<Output = Result<O>> + Send + 'static,
    {
        Self::from_pull(Pull::eval(effect).flat_map(Pull::output1))
    }

    /// Runs `effect` and emits nothing.
    pub fn exec<F>(effect: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_pull(Pull::eval(effect))
    }

    /// Fails with `error`.
    pub fn raise_error(error: Error) -> Self {
        Self::from_pull(Pull::raise_error(error))
    }

    /// Defers building the stream until it runs.
    pub fn suspend<F>(make: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_pull(Pull::suspend(move || make().pull))
    }

    /// A stream that never emits and never ends.
    pub fn never() -> Self {
        Self::exec(futures::future::pending())
    }

    /// Emits the acquired resource; `release` runs when the stream's scope
    /// closes.
    pub fn bracket<A, F, Fut>(acquire: A, release: F) -> Self
    where
        O: Clone,
        A: Future<Output = Result<O>> + Send + 'static,
        F: FnOnce(O) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::bracket_case(acquire, move |r, _| release(r))
    }

    /// [`Stream::bracket`] whose release sees how the scope ended.
    pub fn bracket_case<A, F, Fut>(acquire: A, release: F) -> Self
    where
        O: Clone,
        A: Future<Output = Result<O>> + Send + 'static,
        F: FnOnce(O, ExitCase) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_pull(Pull::acquire(acquire, release).flat_map(Pull::output1).scope())
    }

    /// Rebuilds the stream with `factory` each time the previous one ends.
    pub fn repeat_with<F>(factory: F) -> Self
    where
        F: FnMut() -> Self + Send + 'static,
    {
        fn go<O, F>(mut factory: F) -> Pull<O, ()>
        where
            O: Send + 'static,
            F: FnMut() -> Stream<O> + Send + 'static,
        {
            factory().pull.flat_map(move |()| go(factory))
        }
        Self::from_pull(Pull::suspend(move || go(factory)))
    }

    /// This stream followed by `next`.
    pub fn append(self, next: Self) -> Self {
        Self::from_pull(self.pull.then(next.pull))
    }

    /// Replaces every element with the stream `f` builds for it.
    pub fn flat_map<P, F>(self, f: F) -> Stream<P>
    where
        P: Send + 'static,
        F: FnMut(O) -> Stream<P> + Send + 'static,
    {
        fn each<O, P, F>(mut items: std::vec::IntoIter<O>, mut f: F) -> Pull<P, F>
        where
            O: Send + 'static,
            P: Send + 'static,
            F: FnMut(O) -> Stream<P> + Send + 'static,
        {
            match items.next() {
                None => Pull::pure(f),
                Some(o) => f(o).pull.flat_map(move |()| each(items, f)),
            }
        }
        fn go<O, P, F>(pull: Pull<O, ()>, f: F) -> Pull<P, ()>
        where
            O: Send + 'static,
            P: Send + 'static,
            F: FnMut(O) -> Stream<P> + Send + 'static,
        {
            pull.uncons::<P>().flat_map(move |step| match step {
                Unconsed::Chunk(head, tail) => {
                    each(head.into_vec().into_iter(), f).flat_map(move |f| go(tail, f))
                }
                Unconsed::Done(()) => Pull::done(),
            })
        }
        Stream::from_pull(go(self.pull, f))
    }

    /// Applies `f` to every chunk. Empty results are skipped.
    pub fn map_chunks<P, F>(self, f: F) -> Stream<P>
    where
        P: Send + 'static,
        F: FnMut(Chunk<O>) -> Chunk<P> + Send + 'static,
    {
        fn go<O, P, F>(pull: Pull<O, ()>, mut f: F) -> Pull<P, ()>
        where
            O: Send + 'static,
            P: Send + 'static,
            F: FnMut(Chunk<O>) -> Chunk<P> + Send + 'static,
        {
            pull.uncons::<P>().flat_map(move |step| match step {
                Unconsed::Chunk(head, tail) => {
                    let mapped = f(head);
                    Pull::output(mapped).flat_map(move |()| go(tail, f))
                }
                Unconsed::Done(()) => Pull::done(),
            })
        }
        Stream::from_pull(go(self.pull, f))
    }

    /// Applies `f` to every element.
    pub fn map<P, F>(self, mut f: F) -> Stream<P>
    where
        P: Send + 'static,
        F: FnMut(O) -> P + Send + 'static,
    {
        self.map_chunks(move |chunk| chunk.map(&mut f))
    }

    /// Keeps the elements matching `pred`.
    pub fn filter<F>(self, mut pred: F) -> Self
    where
        F: FnMut(&O) -> bool + Send + 'static,
    {
        self.map_chunks(move |chunk| chunk.filter(&mut pred))
    }

    /// Runs `f` for every element, in order, and emits the results.
    pub fn eval_map<P, F, Fut>(self, mut f: F) -> Stream<P>
    where
        P: Send + 'static,
        F: FnMut(O) -> Fut + Send + 'static,
        Fut: Future<Output = Result<P>> + Send + 'static,
    {
        self.flat_map(move |o| Stream::eval(f(o)))
    }

    /// Emits each chunk as one element.
    pub fn chunks(self) -> Stream<Chunk<O>> {
        self.map_chunks(Chunk::singleton)
    }

    /// The first `n` elements. The rest of the stream is never run; its
    /// open resources are released when the enclosing scope closes.
    pub fn take(self, n: usize) -> Self {
        fn go<O: Send + 'static>(pull: Pull<O, ()>, n: usize) -> Pull<O, ()> {
            if n == 0 {
                return Pull::done();
            }
            pull.uncons::<O>().flat_map(move |step| match step {
                Unconsed::Chunk(head, tail) => {
                    let size = head.size();
                    if size < n {
                        Pull::output(head).flat_map(move |()| go(tail, n - size))
                    } else {
                        Pull::output(head.split_off(n).0)
                    }
                }
                Unconsed::Done(()) => Pull::done(),
            })
        }
        Self::from_pull(go(self.pull, n))
    }

    /// Skips the first `n` elements.
    pub fn drop(self, n: usize) -> Self {
        fn go<O: Send + 'static>(pull: Pull<O, ()>, n: usize) -> Pull<O, ()> {
            if n == 0 {
                return pull;
            }
            pull.uncons::<O>().flat_map(move |step| match step {
                Unconsed::Chunk(head, tail) => {
                    let size = head.size();
                    if size <= n {
                        go(tail, n - size)
                    } else {
                        Pull::output(head.split_off(n).1).then(tail)
                    }
                }
                Unconsed::Done(()) => Pull::done(),
            })
        }
        Self::from_pull(go(self.pull, n))
    }

    /// Pairs elements of both streams; ends with the shorter one.
    pub fn zip<P: Send + 'static>(self, other: Stream<P>) -> Stream<(O, P)> {
        fn go<O, P>(
            left: Pull<O, ()>,
            lbuf: Chunk<O>,
            right: Pull<P, ()>,
            rbuf: Chunk<P>,
        ) -> Pull<(O, P), ()>
        where
            O: Send + 'static,
            P: Send + 'static,
        {
            if lbuf.is_empty() {
                return left.uncons().flat_map(move |step| match step {
                    Unconsed::Chunk(head, tail) => go(tail, head, right, rbuf),
                    Unconsed::Done(()) => Pull::done(),
                });
            }
            if rbuf.is_empty() {
                return right.uncons().flat_map(move |step| match step {
                    Unconsed::Chunk(head, tail) => go(left, lbuf, tail, head),
                    Unconsed::Done(()) => Pull::done(),
                });
            }
            let n = lbuf.size().min(rbuf.size());
            let (l, lrest) = lbuf.split_off(n);
            let (r, rrest) = rbuf.split_off(n);
            let pairs: Chunk<(O, P)> = l.into_iter().zip(r).collect();
            Pull::output(pairs).flat_map(move |()| go(left, lrest, right, rrest))
        }
        Stream::from_pull(go(self.pull, Chunk::empty(), other.pull, Chunk::empty()))
    }

    /// Folds every element and emits the final accumulator.
    pub fn fold<A, F>(self, init: A, f: F) -> Stream<A>
    where
        A: Send + 'static,
        F: FnMut(A, O) -> A + Send + 'static,
    {
        fn go<O, A, F>(pull: Pull<O, ()>, acc: A, mut f: F) -> Pull<A, ()>
        where
            O: Send + 'static,
            A: Send + 'static,
            F: FnMut(A, O) -> A + Send + 'static,
        {
            pull.uncons::<A>().flat_map(move |step| match step {
                Unconsed::Chunk(head, tail) => {
                    let acc = head.into_iter().fold(acc, &mut f);
                    go(tail, acc, f)
                }
                Unconsed::Done(()) => Pull::output1(acc),
            })
        }
        Stream::from_pull(go(self.pull, init, f))
    }

    /// Continues with `handler`'s stream if this one fails. Elements
    /// emitted before the failure stay emitted.
    pub fn handle_error_with<F>(self, handler: F) -> Self
    where
        F: FnOnce(Error) -> Self + Send + 'static,
    {
        Self::from_pull(self.pull.handle_error_with(move |e| handler(e).pull))
    }

    /// Emits elements as `Ok` and a failure as a final `Err`.
    pub fn attempt(self) -> Stream<Result<O>> {
        self.map(Ok)
            .handle_error_with(|e| Stream::emit(Err(e)))
    }

    /// Runs `finalizer` when the stream's scope closes, however it ends.
    pub fn on_finalize<F, Fut>(self, finalizer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_pull(
            Pull::acquire(async { Ok(()) }, move |(), _| finalizer())
                .then(self.pull)
                .scope(),
        )
    }

    /// Runs the stream in its own scope, releasing its resources as soon
    /// as it ends.
    pub fn scope(self) -> Self {
        Self::from_pull(self.pull.scope())
    }

    /// Interrupts the stream when `signal` completes. See
    /// [`Pull::interrupt_when`].
    pub fn interrupt_when<S>(self, signal: S) -> Self
    where
        S: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_pull(self.pull.interrupt_when(signal))
    }

    /// Runs both streams concurrently and emits from whichever is ready.
    /// Ends when both have ended.
    pub fn merge(self, other: Self) -> Self {
        self.merge_halting(other, Halt::Both)
    }

    /// [`Stream::merge`] that ends as soon as this stream ends.
    pub fn merge_halt_left(self, other: Self) -> Self {
        self.merge_halting(other, Halt::Left)
    }

    /// [`Stream::merge`] that ends as soon as `other` ends.
    pub fn merge_halt_right(self, other: Self) -> Self {
        self.merge_halting(other, Halt::Right)
    }

    /// [`Stream::merge`] that ends as soon as either stream ends.
    pub fn merge_halt_both(self, other: Self) -> Self {
        self.merge_halting(other, Halt::Either)
    }

    /// [`Stream::merge`] with an explicit halting policy.
    pub fn merge_halting(self, other: Self, halt: Halt) -> Self {
        Self::from_pull(merge::merge(self.pull, other.pull, halt))
    }

    /// Runs `background` while this stream runs. The background is
    /// interrupted when this stream ends; if it fails first, this stream
    /// is interrupted and the background's error is raised.
    pub fn concurrently<P: Send + 'static>(self, background: Stream<P>) -> Self {
        Self::from_pull(concurrently::concurrently(self.pull, background.pull))
    }

    /// Applies a stream transformation.
    pub fn through<P, F>(self, f: F) -> Stream<P>
    where
        F: FnOnce(Self) -> Stream<P>,
    {
        f(self)
    }

    /// Prepares the stream for running against `target`.
    pub fn compile<T: CompilerTarget>(self, target: &T) -> Compiled<'_, O, T> {
        Compiled {
            stream: self,
            target,
        }
    }
}

impl Stream<i64> {
    /// The integers in `start..end`.
    pub fn range(start: i64, end: i64) -> Self {
        Self::from_iter(start..end)
    }
}

impl<O: Send + 'static> Stream<Stream<O>> {
    /// Runs up to `max_open` inner streams at once, emitting their
    /// elements as they arrive.
    ///
    /// Ends when the outer stream and every inner stream have ended. A
    /// failure anywhere interrupts everything still running and is raised
    /// once their resources are released. `max_open == 0` fails with
    /// `InvalidArgument`.
    pub fn par_join(self, max_open: usize) -> Stream<O> {
        Stream::from_pull(par_join::par_join(self.pull, max_open))
    }

    /// [`Stream::par_join`] without a practical bound.
    pub fn par_join_unbounded(self) -> Stream<O> {
        Stream::from_pull(par_join::par_join(self.pull, par_join::UNBOUNDED))
    }
}

impl<O> fmt::Debug for Stream<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stream").field(&self.pull).finish()
    }
}

/// A stream bound to a target, ready to run.
///
/// Each method consumes the stream. Blocking targets return the result;
/// the concurrent target returns a future.
#[must_use = "nothing runs until a compile method is called"]
pub struct Compiled<'t, O, T> {
    stream: Stream<O>,
    target: &'t T,
}

impl<O, T> Compiled<'_, O, T>
where
    O: Send + 'static,
    T: CompilerTarget,
{
    /// Folds every element into an accumulator.
    pub fn fold<A, F>(self, init: A, mut f: F) -> T::Output<A>
    where
        A: Send + 'static,
        F: FnMut(A, O) -> A + Send + 'static,
    {
        self.run(init, move |acc, chunk| chunk.into_iter().fold(acc, &mut f))
    }

    /// Collects every element.
    pub fn to_vec(self) -> T::Output<Vec<O>> {
        self.run(Vec::new(), |mut acc, chunk| {
            acc.extend(chunk);
            acc
        })
    }

    /// Runs the stream for its effects.
    pub fn drain(self) -> T::Output<()> {
        self.run((), |(), _| ())
    }

    /// The last element, if any.
    pub fn last(self) -> T::Output<Option<O>> {
        self.run(None, |acc, chunk| chunk.into_iter().last().or(acc))
    }

    /// The number of elements.
    pub fn count(self) -> T::Output<usize> {
        self.run(0, |n, chunk| n + chunk.size())
    }

    fn run<A, F>(self, init: A, fold: F) -> T::Output<A>
    where
        A: Send + 'static,
        F: FnMut(A, Chunk<O>) -> A + Send + 'static,
    {
        let job = compile_fold(self.stream.pull, self.target.profile(), init, fold);
        self.target.run(job)
    }
}
