//! Merge: two streams run as fibers feeding one queue.
//!
//! Each side runs in its own fiber-owned scope and hands its chunks to a
//! bounded queue; the merged stream emits them in arrival order, so order
//! within a side is kept and the interleaving is first-ready. A side's end
//! (or failure) is queued behind its last chunk.
//!
//! The fibers live in a scope opened by the merge. Its guard finalizer
//! stops and joins both sides whenever that scope closes, so a failure or
//! an early halt never leaves a side running.

use futures::future::{select, Either};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chunk::Chunk;
use crate::compiler::Fiber;
use crate::error::{Error, ErrorKind, Result};
use crate::pull::{Pull, Unconsed};
use crate::scope::Scope;
use crate::sync::Latch;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, ExitCase};

/// When a merge ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// When both sides have ended.
    Both,
    /// When the left side ends.
    Left,
    /// When the right side ends.
    Right,
    /// When either side ends.
    Either,
}

impl Halt {
    fn stops(self, ended: [bool; 2]) -> bool {
        match self {
            Self::Both => ended[0] && ended[1],
            Self::Left => ended[0],
            Self::Right => ended[1],
            Self::Either => ended[0] || ended[1],
        }
    }
}

enum Msg<O> {
    Chunk(Chunk<O>),
    Ended(usize, Result<()>),
}

/// Forwards every chunk of `pull` into `tx`, wrapped by `wrap`.
///
/// Each send is an effect, so a stopped producer is interrupted while
/// waiting for queue space.
pub(super) fn forward<O, M>(
    pull: Pull<O, ()>,
    tx: mpsc::Sender<M>,
    wrap: fn(Chunk<O>) -> M,
) -> Pull<O, ()>
where
    O: Send + 'static,
    M: Send + 'static,
{
    pull.uncons::<O>().flat_map(move |step| match step {
        Unconsed::Chunk(head, tail) => {
            let sender = tx.clone();
            Pull::eval(async move {
                sender.send(wrap(head)).await.map_err(|_| {
                    Error::new(ErrorKind::ChannelClosed).with_message("stream consumer is gone")
                })
            })
            .flat_map(move |()| forward(tail, tx, wrap))
        }
        Unconsed::Done(()) => Pull::done(),
    })
}

/// Sends `msg` unless `stop` is set first.
pub(super) async fn deliver<M>(tx: &mpsc::Sender<M>, stop: &Latch<()>, msg: M) {
    let stopped = std::pin::pin!(stop.wait());
    let sent = std::pin::pin!(tx.send(msg));
    match select(stopped, sent).await {
        Either::Left(_) | Either::Right((Ok(()), _)) => {}
        Either::Right((Err(_), _)) => debug!("queue closed before delivery"),
    }
}

struct MergeState<O> {
    rx: tokio::sync::Mutex<mpsc::Receiver<Msg<O>>>,
    sides: Vec<Fiber>,
    reported: [AtomicBool; 2],
    stop: Arc<Latch<()>>,
}

impl<O: Send + 'static> MergeState<O> {
    fn start(scope: &Scope, left: Pull<O, ()>, right: Pull<O, ()>) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel(scope.config().output_buffer);
        let stop = Arc::new(Latch::new());
        let mut sides = Vec::with_capacity(2);
        for (index, pull) in [left, right].into_iter().enumerate() {
            let exit_tx = tx.clone();
            let exit_stop = Arc::clone(&stop);
            let fiber = scope.fork(
                forward(pull, tx.clone(), Msg::Chunk),
                "merge side",
                move |result| {
                    async move {
                        deliver(&exit_tx, &exit_stop, Msg::Ended(index, result)).await;
                    }
                    .boxed()
                },
            )?;
            sides.push(fiber);
        }
        debug!(scope = %scope.id(), "merge started");
        Ok(Arc::new(Self {
            rx: tokio::sync::Mutex::new(rx),
            sides,
            reported: [AtomicBool::new(false), AtomicBool::new(false)],
            stop,
        }))
    }

    /// Stops both sides and waits for them. Returns the failures the
    /// consumer has not already raised.
    async fn shutdown(&self) -> Result<()> {
        let _ = self.stop.set(());
        for side in &self.sides {
            side.interrupt(CancelReason::halted());
        }
        let mut unreported = Vec::new();
        for (index, side) in self.sides.iter().enumerate() {
            if let Err(err) = side.join().await {
                if !self.reported[index].load(Ordering::Acquire) {
                    unreported.push(err);
                }
            }
        }
        Error::compose_all(unreported).map_or(Ok(()), Err)
    }
}

fn consume<O>(state: Arc<MergeState<O>>, halt: Halt, ended: [bool; 2]) -> Pull<O, ()>
where
    O: Send + 'static,
{
    let receiving = Arc::clone(&state);
    Pull::eval(async move { Ok(receiving.rx.lock().await.recv().await) }).flat_map(
        move |msg| match msg {
            Some(Msg::Chunk(chunk)) => {
                Pull::output(chunk).flat_map(move |()| consume(state, halt, ended))
            }
            Some(Msg::Ended(index, Ok(()))) => {
                let mut ended = ended;
                ended[index] = true;
                if halt.stops(ended) {
                    Pull::done()
                } else {
                    consume(state, halt, ended)
                }
            }
            Some(Msg::Ended(index, Err(err))) => {
                state.reported[index].store(true, Ordering::Release);
                Pull::raise_error(err)
            }
            None => Pull::done(),
        },
    )
}

pub(super) fn merge<O>(left: Pull<O, ()>, right: Pull<O, ()>, halt: Halt) -> Pull<O, ()>
where
    O: Send + 'static,
{
    Pull::<O, ()>::get_scope()
        .flat_map(move |scope| {
            if let Err(err) = scope.require_concurrency("merge") {
                return Pull::raise_error(err);
            }
            Pull::acquire(
                async move { MergeState::start(&scope, left, right) },
                |state: Arc<MergeState<O>>, _: ExitCase| async move { state.shutdown().await },
            )
            .flat_map(move |state| consume(state, halt, [false; 2]))
        })
        .scope()
}
