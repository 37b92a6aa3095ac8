//! Scopes: the resource-lifetime tree.
//!
//! Every compilation owns a `ScopeTree`. Pulls open child scopes with
//! `Pull::scope` / `Pull::interrupt_scope`; resources acquired with
//! `Pull::acquire` register their release with the current scope. A scope
//! closes its finalizers and children in one LIFO order over registration
//! time, and no scope reports closed before its descendants have.
//!
//! [`Scope`] is the handle combinator authors get from `Pull::get_scope`.

mod table;

pub(crate) use table::ScopeTree;

use core::fmt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use crate::compiler::{fork, Capability, Env, Fiber};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::interrupt::InterruptContext;
use crate::pull::Pull;
use crate::record::{Finalizer, ScopeOwner};
use crate::sync::Latch;
use crate::tracing_compat::debug;
use crate::types::{ExitCase, ScopeId};

/// Handle to one scope of a running compilation.
#[derive(Clone)]
pub struct Scope {
    env: Env,
    id: ScopeId,
    outcome: Option<Arc<Latch<Result<()>>>>,
}

impl Scope {
    pub(crate) fn new(env: Env, id: ScopeId) -> Self {
        let outcome = env.tree.outcome(id);
        Self { env, id, outcome }
    }

    /// Identifier of this scope.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The parent scope, if this is not the root and is still open.
    #[must_use]
    pub fn parent(&self) -> Option<ScopeId> {
        self.env.tree.parent(self.id)
    }

    /// Open child scopes, oldest first.
    #[must_use]
    pub fn children(&self) -> Vec<ScopeId> {
        self.env.tree.children(self.id)
    }

    /// Returns true while the scope accepts acquisitions.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.env.tree.is_open(self.id)
    }

    /// Capability tier of the compilation.
    #[must_use]
    pub fn capability(&self) -> Capability {
        self.env.profile.capability()
    }

    /// Engine configuration of the compilation.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.env.profile.config()
    }

    /// Opens a child scope. The caller is responsible for closing it; if it
    /// does not, this scope closes it.
    pub fn open_child(&self) -> Result<Self> {
        let child = self
            .env
            .tree
            .open_child(self.id, false, ScopeOwner::Inline)?;
        Ok(Self::new(self.env.clone(), child))
    }

    /// Registers `finalizer`. If the scope is already closing the finalizer
    /// runs immediately and the call fails.
    pub async fn register(&self, finalizer: Finalizer) -> Result<()> {
        match self.env.tree.register(self.id, finalizer) {
            Ok(()) => Ok(()),
            Err((finalizer, err)) => {
                let released = self
                    .env
                    .tree
                    .run_finalizer(finalizer, ExitCase::Errored(err.clone()))
                    .await;
                match released {
                    Ok(()) => Err(err),
                    Err(release_err) => Err(Error::compose(err, release_err)),
                }
            }
        }
    }

    /// Acquires a resource and registers its release with this scope.
    pub async fn acquire<R, A, F, Fut>(&self, acquire: A, release: F) -> Result<R>
    where
        R: Clone + Send + 'static,
        A: Future<Output = Result<R>>,
        F: FnOnce(R, ExitCase) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let resource = acquire.await?;
        let held = resource.clone();
        self.register(Finalizer::effect(move |exit| release(held, exit)))
            .await?;
        Ok(resource)
    }

    /// Closes this scope and its descendants.
    ///
    /// Idempotent: every call returns the first close's outcome.
    pub async fn close(&self, exit: ExitCase) -> Result<()> {
        let direct = self.env.tree.close(self.id, exit).await;
        match &self.outcome {
            Some(latch) => latch.wait().await,
            None => direct,
        }
    }

    /// The scope's interrupt context, when the target can interrupt.
    #[must_use]
    pub fn interrupt_context(&self) -> Option<InterruptContext> {
        if !self.capability().supports_interruption() {
            return None;
        }
        self.env.tree.interrupt_context(self.id)
    }

    /// Fails with `Unsupported` unless the target can fork.
    pub(crate) fn require_concurrency(&self, what: &str) -> Result<()> {
        let capability = self.capability();
        if capability.supports_concurrency() {
            return Ok(());
        }
        debug!(combinator = what, capability = %capability, "concurrency rejected");
        Err(Error::unsupported(format!(
            "{what} requires the concurrent target, compiling for {capability}"
        )))
    }

    /// Forks `pull` into a fiber-owned child of this scope.
    pub(crate) fn fork<O, X>(&self, pull: Pull<O, ()>, name: &'static str, on_exit: X) -> Result<Fiber>
    where
        O: Send + 'static,
        X: FnOnce(Result<()>) -> BoxFuture<'static, ()> + Send + 'static,
    {
        fork(&self.env, self.id, pull, name, on_exit)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("capability", &self.capability())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompilerTarget, SyncTarget};
    use crate::error::ErrorKind;
    use crate::test_utils::EventLog;
    use futures::executor::block_on;

    fn root_scope() -> Scope {
        let profile = SyncTarget.profile().clone();
        let (tree, root) = ScopeTree::new(profile.capability(), false);
        Scope::new(Env { tree, profile }, root)
    }

    #[test]
    fn close_twice_returns_same_outcome_and_releases_once() {
        let root = root_scope();
        let scope = root.open_child().unwrap();
        let log = EventLog::new();
        let log2 = log.clone();
        block_on(scope.acquire(async { Ok(7_u32) }, move |r, _| {
            log2.push(format!("release {r}"));
            async { Err(Error::user("release failed")) }
        }))
        .unwrap();

        let first = block_on(scope.close(ExitCase::Succeeded));
        let second = block_on(scope.close(ExitCase::Succeeded));
        assert_eq!(first, Err(Error::user("release failed")));
        assert_eq!(first, second);
        assert_eq!(log.snapshot(), vec!["release 7"]);
        assert!(!scope.is_open());
    }

    #[test]
    fn acquire_into_closing_scope_releases_immediately() {
        let root = root_scope();
        let scope = root.open_child().unwrap();
        block_on(scope.close(ExitCase::Succeeded)).unwrap();
        let log = EventLog::new();
        let log2 = log.clone();
        let err = block_on(scope.acquire(async { Ok(()) }, move |(), exit| {
            log2.push(format!("errored={}", exit.is_errored()));
            async { Ok(()) }
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScopeClosed);
        assert_eq!(log.snapshot(), vec!["errored=true"]);
    }

    #[test]
    fn failed_release_into_closed_scope_keeps_both_errors() {
        let root = root_scope();
        let scope = root.open_child().unwrap();
        block_on(scope.close(ExitCase::Succeeded)).unwrap();
        let err = block_on(scope.register(Finalizer::effect(|_| async {
            Err(Error::user("release failed"))
        })))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Composite);
        assert_eq!(err.causes()[0].kind(), ErrorKind::ScopeClosed);
        assert_eq!(err.causes()[1], Error::user("release failed"));
    }

    #[test]
    fn sync_scope_has_no_interrupt_context() {
        let root = root_scope();
        assert!(root.interrupt_context().is_none());
        assert_eq!(root.require_concurrency("merge").unwrap_err().kind(), ErrorKind::Unsupported);
        let child = root.open_child().unwrap();
        assert_eq!(child.parent(), Some(root.id()));
        assert_eq!(root.children(), vec![child.id()]);
    }
}
