//! Capability context and cancellation hooks.
//!
//! The [`Cx`] type is the capability token a task presents to effectful
//! operations. Channel operations take an explicit `&Cx` and register a
//! cancellation hook on it for their duration, so cancellation of the owning
//! task resolves the operation promptly.
//!
//! # Module Contents
//!
//! - [`Cx`]: The capability context token
//! - [`CancelListener`]: Trait for cancellation hooks
//! - [`CancelGuard`]: Deregisters a hook when dropped

pub mod cx;

pub use cx::{CancelGuard, CancelListener, Cx};
