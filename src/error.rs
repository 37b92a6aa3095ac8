//! Error types for stream compilation.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed; the [`ErrorKind`] says which layer failed
//! - Finalizer errors are never dropped: when a release fails while a body
//!   error is already unwinding, both are kept in a [`ErrorKind::Composite`]
//! - Interruption is *not* an error. It is a separate terminal that unwinds
//!   the same way and is absorbed at the scope that owns the fired context
//!
//! # Error Categories
//!
//! - **User**: raised by `eval` effects, pure transforms or `raise_error`
//! - **Resource**: composed unwind failures, acquisition into a closing scope
//! - **Capability**: an operation the chosen compiler target cannot run
//! - **Internal**: engine bugs and panics caught in forked tasks

use core::fmt;
use std::sync::Arc;

use crate::types::ScopeId;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised by user code.
    User,
    /// Several independent failures, none masking another.
    Composite,
    /// A resource was acquired into a scope that is closing or closed.
    ScopeClosed,
    /// The compiler target lacks a capability the stream needs.
    Unsupported,
    /// An effect did not complete immediately under the pure target.
    EffectSuspended,
    /// An argument was out of range.
    InvalidArgument,
    /// A forked task or finalizer panicked.
    Panicked,
    /// A hand-off channel closed unexpectedly.
    ChannelClosed,
    /// Configuration could not be loaded.
    Config,
    /// Internal engine error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the category of this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::User | Self::InvalidArgument => ErrorCategory::User,
            Self::Composite | Self::ScopeClosed | Self::ChannelClosed => ErrorCategory::Resource,
            Self::Unsupported | Self::EffectSuspended | Self::Config => ErrorCategory::Capability,
            Self::Panicked | Self::Internal => ErrorCategory::Internal,
        }
    }
}

/// High-level grouping of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// User-originated errors.
    User,
    /// Resource lifecycle failures.
    Resource,
    /// Capability / configuration mismatches.
    Capability,
    /// Engine bugs and panics.
    Internal,
}

/// The error type for stream operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    causes: Vec<Error>,
    scope: Option<ScopeId>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            causes: Vec::new(),
            scope: None,
        }
    }

    /// A user error with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Wraps a foreign error as a user error.
    #[must_use]
    pub fn wrap(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::User)
            .with_message(message)
            .with_source(source)
    }

    /// A capability rejection.
    #[must_use]
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported).with_message(detail)
    }

    /// An effect stayed pending under the pure target.
    #[must_use]
    pub fn suspended() -> Self {
        Self::new(ErrorKind::EffectSuspended)
            .with_message("effect did not complete synchronously under the pure target")
    }

    /// Acquisition into a scope that no longer accepts resources.
    #[must_use]
    pub fn scope_closed(scope: ScopeId) -> Self {
        Self::new(ErrorKind::ScopeClosed)
            .with_message(format!("scope {scope} is closing"))
            .with_scope(scope)
    }

    /// An out-of-range argument.
    #[must_use]
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(detail)
    }

    /// A caught panic.
    #[must_use]
    pub fn panicked(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panicked).with_message(detail)
    }

    /// Internal error (engine bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Combines two failures so that neither masks the other.
    ///
    /// Nested composites are flattened; the order of causes is the order
    /// in which the failures happened.
    #[must_use]
    pub fn compose(first: Self, second: Self) -> Self {
        let mut causes = Vec::new();
        first.flatten_into(&mut causes);
        second.flatten_into(&mut causes);
        Self {
            kind: ErrorKind::Composite,
            message: None,
            source: None,
            causes,
            scope: None,
        }
    }

    /// Combines any number of failures.
    ///
    /// Returns `None` for no errors and the error itself for exactly one.
    #[must_use]
    pub fn compose_all(errors: impl IntoIterator<Item = Self>) -> Option<Self> {
        let mut iter = errors.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, Self::compose))
    }

    fn flatten_into(self, out: &mut Vec<Self>) {
        if self.kind == ErrorKind::Composite {
            out.extend(self.causes);
        } else {
            out.push(self);
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Records the scope the error was raised in.
    #[must_use]
    pub fn with_scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Returns the message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the scope the error was raised in, if recorded.
    #[must_use]
    pub const fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    /// The individual failures of a composite error.
    ///
    /// Empty for every other kind.
    #[must_use]
    pub fn causes(&self) -> &[Self] {
        &self.causes
    }

    /// Iterates the leaf failures: the causes of a composite, or the error
    /// itself.
    pub fn leaves(&self) -> impl Iterator<Item = &Self> {
        let own = if self.kind == ErrorKind::Composite {
            None
        } else {
            Some(self)
        };
        own.into_iter().chain(self.causes.iter())
    }

    /// Returns true if this is (or contains) an error of `kind`.
    #[must_use]
    pub fn contains_kind(&self, kind: ErrorKind) -> bool {
        self.leaves().any(|e| e.kind == kind)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message && self.causes == other.causes
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if !self.causes.is_empty() {
            write!(f, " [")?;
            for (i, cause) in self.causes.iter().enumerate() {
                if i > 0 {
                    write!(f, "; ")?;
                }
                write!(f, "{cause}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach a lazily computed context message on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for stream operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_with_message() {
        let err = Error::user("boom");
        assert_eq!(err.to_string(), "User: boom");
        assert_eq!(Error::new(ErrorKind::Internal).to_string(), "Internal");
    }

    #[test]
    fn wrap_keeps_source_chain() {
        let err = Error::wrap(Underlying);
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(err.source().map(ToString::to_string), Some("underlying".into()));
    }

    #[test]
    fn compose_flattens_and_keeps_order() {
        let a = Error::user("a");
        let b = Error::new(ErrorKind::ChannelClosed).with_message("b");
        let c = Error::user("c");
        let ab = Error::compose(a.clone(), b.clone());
        let abc = Error::compose(ab, c.clone());
        assert_eq!(abc.kind(), ErrorKind::Composite);
        assert_eq!(abc.causes(), &[a, b, c]);
        assert!(abc.contains_kind(ErrorKind::ChannelClosed));
    }

    #[test]
    fn compose_all_of_one_is_identity() {
        let a = Error::user("a");
        assert_eq!(Error::compose_all([a.clone()]), Some(a));
        assert_eq!(Error::compose_all(Vec::new()), None);
    }

    #[test]
    fn leaves_of_plain_error_is_itself() {
        let a = Error::user("a");
        assert_eq!(a.leaves().count(), 1);
        assert!(!a.contains_kind(ErrorKind::Composite));
    }

    #[test]
    fn result_ext_adds_message() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::ChannelClosed));
        let err = res.context("send failed").expect_err("expected err");
        assert_eq!(err.to_string(), "ChannelClosed: send failed");
    }

    #[test]
    fn categories() {
        assert_eq!(ErrorKind::Unsupported.category(), ErrorCategory::Capability);
        assert_eq!(ErrorKind::ScopeClosed.category(), ErrorCategory::Resource);
        assert_eq!(Error::panicked("x").category(), ErrorCategory::Internal);
    }
}
