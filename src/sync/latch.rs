//! Single-assignment latch with async waiters.
//!
//! A [`Latch`] starts empty and can be set exactly once. Readers either
//! check it synchronously ([`Latch::get`]) or await it ([`Latch::wait`]).
//! It backs every "result arrives later" hand-off in the engine: scope
//! close outcomes, interrupt outcomes, and forked-task results.
//!
//! # Cancel Safety
//!
//! Dropping a [`Wait`] future leaves the latch untouched. A stale waker may
//! remain registered until the latch is set; waking it is harmless.

use core::fmt;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

struct Inner<T> {
    value: Option<T>,
    waiters: Vec<Waker>,
}

/// A cell that is set at most once and can be awaited.
pub struct Latch<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> Latch<T> {
    /// Creates an empty latch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: None,
                waiters: Vec::new(),
            }),
        }
    }

    /// Creates a latch that is already set.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: Some(value),
                waiters: Vec::new(),
            }),
        }
    }

    /// Sets the value if the latch is empty.
    ///
    /// Returns `Err(value)` when it was already set; the first value wins.
    pub fn set(&self, value: T) -> Result<(), T> {
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.value.is_some() {
                return Err(value);
            }
            inner.value = Some(value);
            std::mem::take(&mut inner.waiters)
        };
        for waker in waiters {
            waker.wake();
        }
        Ok(())
    }

    /// Returns a copy of the value if set.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    /// Returns true once the latch has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.lock().value.is_some()
    }

    /// Waits until the latch is set and returns a copy of the value.
    pub fn wait(&self) -> Wait<'_, T> {
        Wait { latch: self }
    }

    fn poll_value(&self, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.inner.lock();
        if let Some(value) = &inner.value {
            return Poll::Ready(value.clone());
        }
        let waker = cx.waker();
        if !inner.waiters.iter().any(|w| w.will_wake(waker)) {
            inner.waiters.push(waker.clone());
        }
        Poll::Pending
    }
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Latch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Latch")
            .field("value", &inner.value)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

/// Future returned by [`Latch::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a, T> {
    latch: &'a Latch<T>,
}

impl<T: Clone> Future for Wait<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        self.latch.poll_value(cx)
    }
}
