//! Parallel join of a stream of streams.
//!
//! A runner fiber pulls the outer stream. For each inner stream it takes a
//! permit from a semaphore of `max_open` permits and forks the inner stream
//! into its own scope, so inner fibers are children of the runner's scope.
//! An inner fiber returns its permit only after its scope has closed. Once
//! the outer stream ends the runner takes every permit back, which means
//! every inner stream has finished, and reports completion.
//!
//! Failures are collected in one list and announced on the queue. The
//! consumer raises what it finds; the guard finalizer stops the runner
//! (closing the runner's scope interrupts the inner fibers) and raises
//! whatever failed after that.

use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use super::merge::{deliver, forward};
use super::Stream;
use crate::chunk::Chunk;
use crate::compiler::Fiber;
use crate::error::{Error, Result};
use crate::pull::{Pull, Unconsed};
use crate::scope::Scope;
use crate::sync::Latch;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, ExitCase};

/// Bound used by `par_join_unbounded`.
pub(super) const UNBOUNDED: usize = 1 << 24;

enum Msg<O> {
    Chunk(Chunk<O>),
    Failed,
    RunnerDone,
}

struct Shared<O> {
    tx: mpsc::Sender<Msg<O>>,
    permits: Arc<Semaphore>,
    max_open: u32,
    failures: Mutex<Vec<Error>>,
    stop: Arc<Latch<()>>,
}

impl<O: Send + 'static> Shared<O> {
    async fn fail(&self, err: Error) {
        self.failures.lock().push(err);
        deliver(&self.tx, &self.stop, Msg::Failed).await;
    }

    fn take_failures(&self) -> Option<Error> {
        Error::compose_all(std::mem::take(&mut *self.failures.lock()))
    }
}

struct JoinState<O> {
    rx: tokio::sync::Mutex<mpsc::Receiver<Msg<O>>>,
    runner: Fiber,
    shared: Arc<Shared<O>>,
}

impl<O: Send + 'static> JoinState<O> {
    fn start(scope: &Scope, outer: Pull<Stream<O>, ()>, max_open: u32) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel(scope.config().output_buffer);
        let shared = Arc::new(Shared {
            tx,
            permits: Arc::new(Semaphore::new(max_open as usize)),
            max_open,
            failures: Mutex::new(Vec::new()),
            stop: Arc::new(Latch::new()),
        });
        let body = Arc::clone(&shared);
        let exit = Arc::clone(&shared);
        let runner = scope.fork(
            Pull::<Stream<O>, ()>::get_scope()
                .flat_map(move |runner_scope| run_outer(outer, runner_scope, body)),
            "par_join runner",
            move |result| {
                async move {
                    match result {
                        Ok(()) => deliver(&exit.tx, &exit.stop, Msg::RunnerDone).await,
                        Err(err) => exit.fail(err).await,
                    }
                }
                .boxed()
            },
        )?;
        debug!(scope = %scope.id(), max_open, "par_join started");
        Ok(Arc::new(Self {
            rx: tokio::sync::Mutex::new(rx),
            runner,
            shared,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let _ = self.shared.stop.set(());
        self.runner.interrupt(CancelReason::halted());
        // The runner's own failure, if any, is already in the list.
        let _ = self.runner.join().await;
        self.shared.take_failures().map_or(Ok(()), Err)
    }
}

/// Walks the outer stream, forking each inner stream once a permit is free,
/// then waits until every permit is back.
fn run_outer<O: Send + 'static>(
    outer: Pull<Stream<O>, ()>,
    scope: Scope,
    shared: Arc<Shared<O>>,
) -> Pull<Stream<O>, ()> {
    outer.uncons::<Stream<O>>().flat_map(move |step| match step {
        Unconsed::Chunk(inners, tail) => {
            spawn_each(inners.into_vec().into_iter(), scope.clone(), Arc::clone(&shared))
                .flat_map(move |()| run_outer(tail, scope, shared))
        }
        Unconsed::Done(()) => {
            let permits = Arc::clone(&shared.permits);
            let all = shared.max_open;
            Pull::eval(async move {
                permits
                    .acquire_many_owned(all)
                    .await
                    .map(drop)
                    .map_err(|e| Error::internal("par_join permits closed").with_source(e))
            })
        }
    })
}

fn spawn_each<O: Send + 'static>(
    mut inners: std::vec::IntoIter<Stream<O>>,
    scope: Scope,
    shared: Arc<Shared<O>>,
) -> Pull<Stream<O>, ()> {
    let Some(inner) = inners.next() else {
        return Pull::done();
    };
    let permits = Arc::clone(&shared.permits);
    Pull::eval(async move {
        permits
            .acquire_owned()
            .await
            .map_err(|e| Error::internal("par_join permits closed").with_source(e))
    })
    .flat_map(move |permit: OwnedSemaphorePermit| {
        let exit = Arc::clone(&shared);
        let forked = scope.fork(
            forward(inner.into_pull(), shared.tx.clone(), Msg::Chunk),
            "par_join inner",
            move |result| {
                async move {
                    if let Err(err) = result {
                        exit.fail(err).await;
                    }
                    drop(permit);
                }
                .boxed()
            },
        );
        match forked {
            Ok(_) => spawn_each(inners, scope, shared),
            Err(err) => Pull::raise_error(err),
        }
    })
}

fn consume<O: Send + 'static>(state: Arc<JoinState<O>>) -> Pull<O, ()> {
    let receiving = Arc::clone(&state);
    Pull::eval(async move { Ok(receiving.rx.lock().await.recv().await) }).flat_map(
        move |msg| match msg {
            Some(Msg::Chunk(chunk)) => Pull::output(chunk).flat_map(move |()| consume(state)),
            Some(Msg::Failed) => match state.shared.take_failures() {
                Some(err) => Pull::raise_error(err),
                None => consume(state),
            },
            Some(Msg::RunnerDone) | None => Pull::done(),
        },
    )
}

pub(super) fn par_join<O>(outer: Pull<Stream<O>, ()>, max_open: usize) -> Pull<O, ()>
where
    O: Send + 'static,
{
    if max_open == 0 {
        return Pull::raise_error(Error::invalid_argument("par_join needs max_open >= 1"));
    }
    let max_open = u32::try_from(max_open.min(UNBOUNDED)).unwrap_or(u32::MAX);
    Pull::<O, ()>::get_scope()
        .flat_map(move |scope| {
            if let Err(err) = scope.require_concurrency("par_join") {
                return Pull::raise_error(err);
            }
            Pull::acquire(
                async move { JoinState::start(&scope, outer, max_open) },
                |state: Arc<JoinState<O>>, _: ExitCase| async move { state.shutdown().await },
            )
            .flat_map(consume)
        })
        .scope()
}
