//! Rendezvous channel.
//!
//! This module provides a zero-capacity channel in which every transfer is a
//! synchronous meeting of one producer and one consumer. There is no buffer:
//! a send suspends until a receive accepts the element, and a receive
//! suspends until a send offers one.
//!
//! # Cancel Safety
//!
//! Operations register a cancellation hook on their capability context for
//! their duration. A cancelled operation resolves promptly: `receive` returns
//! `None`, `send` completes without delivering. Cancellation that arrives
//! after a rendezvous has begun does not un-do delivery.
//!
//! # Module Contents
//!
//! - [`rendezvous`]: The channel core and its iterator view

pub mod rendezvous;

pub use rendezvous::{Channel, Iter, PhaseKind};
