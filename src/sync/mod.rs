//! Synchronization primitives consumed by the channel core.

pub mod resume;

pub use resume::{resume_slot, Resumer, Suspended};
