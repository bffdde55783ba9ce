//! Test utilities.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Logged assertion macro
//! - Minimal executors: a spin-waiting `block_on` and a manual `poll_once`
//!
//! # Example
//! ```
//! use handoff::test_utils::{block_on, init_test_logging};
//!
//! init_test_logging();
//! let value = block_on(async { 42 });
//! assert_eq!(value, 42);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll, Wake, Waker};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

fn noop_waker() -> Waker {
    Waker::from(Arc::new(NoopWaker))
}

/// Run a future to completion on the calling thread, spin-yielding while the
/// future is pending.
///
/// Resumptions arriving from other threads are observed by the next
/// spin iteration, so no real waker plumbing is needed in tests.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut pinned = Box::pin(future);
    loop {
        match pinned.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => std::thread::yield_now(),
        }
    }
}

/// Polls a pinned future exactly once with a no-op waker.
///
/// Used to drive interleavings deterministically: one poll registers a
/// waiter, the next observes its resumption.
pub fn poll_once<F: Future>(future: &mut Pin<Box<F>>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    future.as_mut().poll(&mut cx)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_completes_ready_future() {
        init_test_logging();
        crate::test_phase!("block_on_completes_ready_future");
        let value = block_on(async { 7 });
        crate::assert_with_log!(value == 7, "block_on value", 7, value);
        crate::test_complete!("block_on_completes_ready_future");
    }

    #[test]
    fn poll_once_observes_pending() {
        init_test_logging();
        crate::test_phase!("poll_once_observes_pending");
        let mut pending = Box::pin(std::future::pending::<()>());
        let polled = poll_once(&mut pending);
        crate::assert_with_log!(polled.is_pending(), "pending future", "Pending", polled);
        crate::test_complete!("poll_once_observes_pending");
    }
}
