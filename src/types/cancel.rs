//! Interruption reason and kind types.
//!
//! An interrupt context records *why* it fired. The reason is carried by the
//! `Interrupted` terminal while the scope tree unwinds, and is visible to
//! finalizers through [`ExitCase::Canceled`](super::ExitCase::Canceled).

use core::fmt;

/// The kind of interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// An `interrupt_when` signal completed.
    Signal,
    /// A concurrent combinator finished with this side still running
    /// (merge halt policy, foreground of `concurrently` done).
    Halted,
    /// The enclosing scope closed while this work was running.
    ParentClosed,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Signal => write!(f, "signal"),
            Self::Halted => write!(f, "halted"),
            Self::ParentClosed => write!(f, "parent closed"),
        }
    }
}

/// Why an interrupt context fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of interruption.
    pub kind: CancelKind,
    /// Optional static message.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason of the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// User cancellation with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// An `interrupt_when` signal fired.
    #[must_use]
    pub const fn signal() -> Self {
        Self::new(CancelKind::Signal)
    }

    /// The owning combinator halted.
    #[must_use]
    pub const fn halted() -> Self {
        Self::new(CancelKind::Halted)
    }

    /// The enclosing scope closed.
    #[must_use]
    pub const fn parent_closed() -> Self {
        Self::new(CancelKind::ParentClosed)
    }

    /// Attaches a static message.
    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    /// The kind of this reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_the_kind() {
        assert_eq!(CancelReason::signal().kind(), CancelKind::Signal);
        assert_eq!(CancelReason::parent_closed().kind(), CancelKind::ParentClosed);
        assert_eq!(CancelReason::user("stop").message, Some("stop"));
        assert_eq!(CancelReason::default().kind(), CancelKind::User);
    }

    #[test]
    fn display_includes_message() {
        let reason = CancelReason::halted().with_message("left side finished");
        assert_eq!(reason.to_string(), "halted: left side finished");
    }
}
