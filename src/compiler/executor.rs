//! Where forked work runs.

use core::fmt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::error::{Error, Result};

/// Spawns detached tasks. Results come back through latches, so there is
/// no join handle.
pub trait Executor: Send + Sync + 'static {
    /// Starts `task` in the background.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Executor backed by a tokio runtime handle.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Spawns onto `handle`.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawns onto the runtime the caller is in.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::unsupported("no tokio runtime is running").with_source(e))
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        drop(self.handle.spawn(task));
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor").finish_non_exhaustive()
    }
}
