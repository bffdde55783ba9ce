//! Error types.
//!
//! The channel core has no error type of its own: every negative outcome is
//! encoded as `None` from a receive or a no-op completion of a send. The only
//! error in this crate is the one a cancellation checkpoint reports.

use crate::types::CancelReason;
use thiserror::Error;

/// Error returned by [`Cx::checkpoint`](crate::cx::Cx::checkpoint) when
/// cancellation has been requested for the owning task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation cancelled: {reason}")]
pub struct Cancelled {
    /// Why the owning task was cancelled.
    pub reason: CancelReason,
}
