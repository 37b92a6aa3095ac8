//! Compiler targets: the effect-capability tiers a pull can be run against.
//!
//! | Target | Effects | Scopes | Interruption / concurrency |
//! |--------|---------|--------|----------------------------|
//! | [`PureTarget`] | must be ready on first poll | yes | rejected |
//! | [`SyncTarget`] | driven by `block_on` on the caller | yes | rejected |
//! | [`ConcurrentTarget`] | raced against interrupt contexts | yes | yes |
//!
//! A stream that reaches `interrupt_when`, `merge`, `concurrently` or
//! `par_join` under a target without the capability fails with
//! [`ErrorKind::Unsupported`](crate::error::ErrorKind::Unsupported) at that
//! point; everything acquired before it is released normally. Nothing
//! degrades silently.

use core::fmt;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, OnceLock};

use super::executor::{Executor, TokioExecutor};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Capability tier of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// No suspension, no interruption.
    Pure,
    /// Blocking, single-threaded; no interruption.
    Sync,
    /// Fork/join, racing and interruption.
    Concurrent,
}

impl Capability {
    /// Whether interrupt contexts can fire.
    #[must_use]
    pub const fn supports_interruption(self) -> bool {
        matches!(self, Self::Concurrent)
    }

    /// Whether work can be forked.
    #[must_use]
    pub const fn supports_concurrency(self) -> bool {
        matches!(self, Self::Concurrent)
    }

    /// Lower-case tier name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pure => "pure",
            Self::Sync => "sync",
            Self::Concurrent => "concurrent",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a compilation needs from its target.
#[derive(Clone)]
pub struct TargetProfile {
    capability: Capability,
    executor: Option<Arc<dyn Executor>>,
    config: Arc<EngineConfig>,
}

impl TargetProfile {
    /// A profile without an executor.
    #[must_use]
    pub fn new(capability: Capability, config: EngineConfig) -> Self {
        Self {
            capability,
            executor: None,
            config: Arc::new(config),
        }
    }

    /// Attaches the executor forked work runs on.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// The capability tier.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        self.capability
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.executor.as_ref()
    }
}

impl fmt::Debug for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetProfile")
            .field("capability", &self.capability)
            .field("executor", &self.executor.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// A strategy for running a compiled stream.
pub trait CompilerTarget {
    /// What a compilation returns: a value for blocking targets, a future
    /// for the concurrent one.
    type Output<T: Send + 'static>;

    /// Capability, executor and configuration of this target.
    fn profile(&self) -> &TargetProfile;

    /// Runs a compiled job.
    fn run<T: Send + 'static>(&self, job: BoxFuture<'static, Result<T>>) -> Self::Output<T>;
}

/// Runs streams whose effects complete immediately.
///
/// An effect that would suspend fails its step with
/// [`ErrorKind::EffectSuspended`](crate::error::ErrorKind::EffectSuspended).
#[derive(Debug, Clone, Copy, Default)]
pub struct PureTarget;

impl PureTarget {
    /// The shared profile, built from [`EngineConfig::global`] on first use.
    pub fn shared_profile() -> &'static TargetProfile {
        static PROFILE: OnceLock<TargetProfile> = OnceLock::new();
        PROFILE.get_or_init(|| TargetProfile::new(Capability::Pure, EngineConfig::global().clone()))
    }
}

impl CompilerTarget for PureTarget {
    type Output<T: Send + 'static> = Result<T>;

    fn profile(&self) -> &TargetProfile {
        Self::shared_profile()
    }

    fn run<T: Send + 'static>(&self, job: BoxFuture<'static, Result<T>>) -> Result<T> {
        job.now_or_never()
            .unwrap_or_else(|| Err(Error::internal("pure compilation suspended")))
    }
}

/// Runs streams by blocking the calling thread.
///
/// Must not be used from inside an async runtime worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncTarget;

impl SyncTarget {
    /// The shared profile, built from [`EngineConfig::global`] on first use.
    pub fn shared_profile() -> &'static TargetProfile {
        static PROFILE: OnceLock<TargetProfile> = OnceLock::new();
        PROFILE.get_or_init(|| TargetProfile::new(Capability::Sync, EngineConfig::global().clone()))
    }
}

impl CompilerTarget for SyncTarget {
    type Output<T: Send + 'static> = Result<T>;

    fn profile(&self) -> &TargetProfile {
        Self::shared_profile()
    }

    fn run<T: Send + 'static>(&self, job: BoxFuture<'static, Result<T>>) -> Result<T> {
        futures::executor::block_on(job)
    }
}

/// Runs streams as futures, forking concurrent work onto an executor.
#[derive(Debug, Clone)]
pub struct ConcurrentTarget {
    profile: TargetProfile,
}

impl ConcurrentTarget {
    /// A target forking onto `executor`, configured from
    /// [`EngineConfig::global`].
    pub fn new(executor: impl Executor) -> Self {
        Self::with_config(executor, EngineConfig::global().clone())
    }

    /// A target with an explicit configuration.
    pub fn with_config(executor: impl Executor, config: EngineConfig) -> Self {
        Self {
            profile: TargetProfile::new(Capability::Concurrent, config)
                .with_executor(Arc::new(executor)),
        }
    }

    /// A target on the tokio runtime the caller is running in.
    pub fn current() -> Result<Self> {
        Ok(Self::new(TokioExecutor::current()?))
    }
}

impl CompilerTarget for ConcurrentTarget {
    type Output<T: Send + 'static> = BoxFuture<'static, Result<T>>;

    fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    fn run<T: Send + 'static>(
        &self,
        job: BoxFuture<'static, Result<T>>,
    ) -> BoxFuture<'static, Result<T>> {
        job
    }
}
