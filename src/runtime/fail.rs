// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! Runtime failures.
//!
//! The runtime classifies its recoverable failures in its own vocabulary:
//! lookups that miss, lifecycle operations replayed, blocking operations cut
//! short by a kill. The higher-level language runtime sees each of these as
//! an errno value through [Fail::errno]; inside the runtime the kind is what
//! callers branch on.

//==============================================================================
// Imports
//==============================================================================

use ::libc::c_int;
use ::std::{
    error,
    fmt,
};

//==============================================================================
// Structures
//==============================================================================

/// What went wrong.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum FailKind {
    /// A caller-supplied argument the runtime cannot work with.
    InvalidArgument,
    /// An id that no longer resolves to a live object.
    NotFound,
    /// A lifecycle operation replayed on a task that already took it.
    AlreadyStarted,
    /// A blocking operation cut short by a cooperative kill.
    Cancelled,
    /// A wait that could never finish, such as a task joining itself.
    WouldDeadlock,
}

/// A recoverable runtime failure: a kind to branch on and a cause for the
/// log.
#[derive(Debug, Clone)]
pub struct Fail {
    /// What went wrong.
    pub kind: FailKind,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Fail {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailKind, cause: &str) -> Self {
        Self {
            kind,
            cause: cause.to_string(),
        }
    }

    /// Checks whether this failure resulted from a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == FailKind::Cancelled
    }

    /// Maps the failure onto the errno value reported to the higher-level
    /// language runtime.
    pub fn errno(&self) -> c_int {
        match self.kind {
            FailKind::InvalidArgument => libc::EINVAL,
            FailKind::NotFound => libc::ESRCH,
            FailKind::AlreadyStarted => libc::EALREADY,
            FailKind::Cancelled => libc::ECANCELED,
            FailKind::WouldDeadlock => libc::EDEADLK,
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.cause)
    }
}

impl error::Error for Fail {}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        Fail,
        FailKind,
    };
    use ::anyhow::Result;

    #[test]
    fn kinds_map_to_distinct_errnos() -> Result<()> {
        let kinds: [FailKind; 5] = [
            FailKind::InvalidArgument,
            FailKind::NotFound,
            FailKind::AlreadyStarted,
            FailKind::Cancelled,
            FailKind::WouldDeadlock,
        ];
        for (i, left) in kinds.iter().enumerate() {
            for right in &kinds[i + 1..] {
                crate::ensure_neq!(
                    Fail::new(*left, "left").errno(),
                    Fail::new(*right, "right").errno()
                );
            }
        }
        Ok(())
    }

    #[test]
    fn only_cancellation_reads_as_cancelled() -> Result<()> {
        crate::ensure_eq!(Fail::new(FailKind::Cancelled, "killed").is_cancelled(), true);
        crate::ensure_eq!(Fail::new(FailKind::NotFound, "missing").is_cancelled(), false);
        Ok(())
    }
}
