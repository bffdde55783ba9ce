//! Handoff: a cancel-correct rendezvous channel.
//!
//! # Overview
//!
//! A rendezvous channel transfers elements from producer tasks to consumer
//! tasks with no buffer in between: every `send` and every `receive` is a
//! hand-off. A producer offering an element suspends until a consumer accepts
//! it; a consumer requesting an element suspends until a producer offers one.
//! Cancellation is a first-class protocol, not a silent drop: operations
//! register a hook on their capability context and resolve to `None` promptly
//! when the owning task is cancelled.
//!
//! # Core Guarantees
//!
//! - **Exactly-once resumption**: every suspended operation is resumed exactly
//!   once, by a rendezvous partner, by [`Channel::finish`], or by cancellation
//! - **Hand-off outside the lock**: the element moves through a two-step
//!   hand-off that is never performed under the channel's critical section
//! - **Race-free cancellation**: a caller-owned status record arbitrates the
//!   race between cancellation and suspension
//! - **Deterministic drain**: `finish` resumes every queued waiter with `None`
//!   and short-circuits all later operations
//!
//! # Module Structure
//!
//! - [`channel`]: The rendezvous channel core
//! - [`cx`]: Capability context carrying identity and cancellation
//! - [`sync`]: One-shot suspension slots the channel suspends on
//! - [`types`]: Identifier and cancellation vocabulary types
//! - [`error`]: Error types
//! - [`test_utils`]: Logging setup and assertion macros for tests
//! - [`tracing_compat`]: Structured-logging facade

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]

pub mod channel;
pub mod cx;
pub mod error;
pub mod sync;
pub mod test_utils;
pub mod tracing_compat;
pub mod types;

pub use channel::{Channel, Iter, PhaseKind};
pub use cx::{CancelGuard, CancelListener, Cx};
pub use error::Cancelled;
pub use types::{CancelKind, CancelReason, RegionId, TaskId};
