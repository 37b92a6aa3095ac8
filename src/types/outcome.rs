//! How a scope was left.
//!
//! Finalizers receive an [`ExitCase`] describing why their scope is
//! closing.

use super::cancel::CancelReason;
use crate::error::Error;
use core::fmt;

/// The reason a scope is being closed.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitCase {
    /// The scope's body produced its result.
    Succeeded,
    /// The scope's body failed.
    Errored(Error),
    /// The scope was interrupted.
    Canceled(CancelReason),
}

impl ExitCase {
    /// Returns true for [`ExitCase::Succeeded`].
    #[must_use]
    pub const fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true for [`ExitCase::Errored`].
    #[must_use]
    pub const fn is_errored(&self) -> bool {
        matches!(self, Self::Errored(_))
    }

    /// Returns true for [`ExitCase::Canceled`].
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

impl fmt::Display for ExitCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Errored(e) => write!(f, "errored: {e}"),
            Self::Canceled(r) => write!(f, "canceled: {r}"),
        }
    }
}
