#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use parking_lot::Mutex;
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use sluice::ConcurrentTarget;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "SLUICE_PROPTEST_SEED";

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Build a ProptestConfig with a fixed seed under CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        let seed = std::env::var(PROPTEST_SEED_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .or_else(|| std::env::var("CI").ok().map(|_| DEFAULT_PROPTEST_SEED));
        if let Some(seed) = seed {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

/// The concurrent target on the current tokio runtime.
#[must_use]
pub fn concurrent_target() -> ConcurrentTarget {
    init_test_logging();
    ConcurrentTarget::current().expect("tests run inside a tokio runtime")
}

/// Await `fut`, failing the test if it takes longer than `limit`.
pub async fn within<F: Future>(limit: Duration, description: &str, fut: F) -> F::Output {
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => value,
        Err(_) => panic!("'{description}' did not complete within {limit:?}"),
    }
}

/// Ordered, shareable record of events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Counts concurrently active things and remembers the peak.
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<(AtomicUsize, AtomicUsize)>);

impl Gauge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        let now = self.0 .0.fetch_add(1, Ordering::SeqCst) + 1;
        self.0 .1.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.0 .0.fetch_sub(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn current(&self) -> usize {
        self.0 .0.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak(&self) -> usize {
        self.0 .1.load(Ordering::SeqCst)
    }
}

/// Log a test phase transition.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed");
    };
}
