//! Error taxonomy for the sync core (spec.md §7).
//!
//! Programming-error invariant breaches (a missing Sync Point for a
//! tracked tag, a duplicate tag assignment, a malformed query key) are
//! not modeled as a `Result` variant anywhere in this crate -- they are
//! `assert!`/`debug_assert!` panics, because they indicate a bug in this
//! crate or its caller, not a recoverable external condition. The core
//! never returns a `Result` from `apply_*`/`add_event_registration`/
//! `remove_event_registration`; the only error type that crosses the
//! public API is [`CancelError`], and it only ever arrives attached to
//! an [`crate::event::Event::Cancelled`].

use thiserror::Error;

/// Why a server listen failed, as reported by a [`crate::listen_provider::ListenProvider`].
/// Carried inside a cancel event rather than returned from any `apply_*`
/// call -- a failed listen kills the whole subscription site, and the
/// View layer turns it into ordinary (if unhappy) events.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CancelError {
    #[error("listen failed: {status}")]
    ListenFailed { status: String },

    #[error("permission denied at {path}")]
    PermissionDenied { path: String },
}

impl CancelError {
    pub fn from_status(status: &str) -> CancelError {
        CancelError::ListenFailed {
            status: status.to_string(),
        }
    }
}
