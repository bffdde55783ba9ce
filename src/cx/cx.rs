//! The capability context type.
//!
//! `Cx` is the token that grants access to the capabilities an operation
//! needs from its owning task:
//!
//! - Querying identity (region ID, task ID)
//! - Checking cancellation status
//! - Registering cancellation hooks
//! - Tracing
//!
//! # Cancellation Model
//!
//! Cancellation is request-based and cooperative. `cancel` flips a flag
//! (first caller wins), records the reason, and fires every registered
//! listener exactly once. Operations that suspend register a listener via
//! [`Cx::on_cancel`] so they resolve promptly instead of waiting for their
//! next poll; operations that poll call [`Cx::checkpoint`].
//!
//! # Thread Safety
//!
//! `Cx` is cheaply clonable and `Send + Sync`; clones share the same state,
//! so a cancellation request is visible to all of them. The semantic contract
//! is that a `Cx` belongs to one task and is not shared across task
//! boundaries.

use crate::error::Cancelled;
use crate::tracing_compat::trace;
use crate::types::{CancelKind, CancelReason, RegionId, TaskId};
use core::fmt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Trait for cancellation listeners.
///
/// Implemented for any `Fn(&CancelReason) + Send + Sync` closure.
pub trait CancelListener: Send + Sync {
    /// Called when cancellation is requested.
    fn on_cancel(&self, reason: &CancelReason);
}

impl<F> CancelListener for F
where
    F: Fn(&CancelReason) + Send + Sync,
{
    fn on_cancel(&self, reason: &CancelReason) {
        self(reason);
    }
}

/// Registered listeners, keyed by registration order.
struct ListenerTable {
    next_id: u64,
    entries: BTreeMap<u64, Box<dyn CancelListener>>,
}

/// Shared context state.
struct CxInner {
    region: RegionId,
    task: TaskId,
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    listeners: Mutex<ListenerTable>,
}

/// The capability context for a task.
///
/// A `Cx` is provided to each task by the host runtime (or constructed
/// directly where no scheduler exists). All channel operations flow through
/// it: identity tags trace events, and the cancellation state decides whether
/// an operation may suspend.
#[derive(Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("region", &self.inner.region)
            .field("task", &self.inner.task)
            .field("cancelled", &self.is_cancel_requested())
            .finish_non_exhaustive()
    }
}

impl Cx {
    /// Creates a new capability context for the given identity.
    #[must_use]
    pub fn new(region: RegionId, task: TaskId) -> Self {
        Self {
            inner: Arc::new(CxInner {
                region,
                task,
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                listeners: Mutex::new(ListenerTable {
                    next_id: 0,
                    entries: BTreeMap::new(),
                }),
            }),
        }
    }

    /// Creates a capability context with fresh ephemeral identity.
    ///
    /// Suitable for unit and integration tests, and for callers that use the
    /// channel outside any scheduler.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new(RegionId::new_ephemeral(), TaskId::new_ephemeral())
    }

    /// Returns the region this context belongs to.
    #[must_use]
    pub fn region(&self) -> RegionId {
        self.inner.region
    }

    /// Returns the task this context belongs to.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.inner.task
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().expect("reason lock poisoned").clone()
    }

    /// Cooperative cancellation checkpoint.
    ///
    /// Returns `Err(Cancelled)` once cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancel_requested() {
            Err(Cancelled {
                reason: self.current_reason(),
            })
        } else {
            Ok(())
        }
    }

    /// Requests cancellation with the given reason.
    ///
    /// Returns true if this call triggered the cancellation (first caller
    /// wins). All registered listeners are notified exactly once, outside the
    /// listener lock.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        *self.inner.reason.lock().expect("reason lock poisoned") = Some(reason.clone());

        let drained: Vec<Box<dyn CancelListener>> = {
            let mut table = self.inner.listeners.lock().expect("listener lock poisoned");
            std::mem::take(&mut table.entries).into_values().collect()
        };

        // Notify without holding the lock; a listener may re-enter the context.
        for listener in drained {
            listener.on_cancel(&reason);
        }

        true
    }

    /// Registers a listener to be notified on cancellation.
    ///
    /// The returned guard deregisters the listener when dropped. If
    /// cancellation has already been requested, the listener fires
    /// immediately on the calling thread and an inert guard is returned.
    pub fn on_cancel(&self, listener: impl CancelListener + 'static) -> CancelGuard {
        // Hold the table lock across the cancelled check: cancel() sets the
        // flag before draining, so observing !cancelled here guarantees the
        // drain will find this entry.
        let mut table = self.inner.listeners.lock().expect("listener lock poisoned");
        if self.is_cancel_requested() {
            drop(table);
            listener.on_cancel(&self.current_reason());
            return CancelGuard {
                inner: Weak::new(),
                id: 0,
            };
        }

        let id = table.next_id;
        table.next_id += 1;
        table.entries.insert(id, Box::new(listener));
        CancelGuard {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Emits a trace event tagged with this context's identity.
    #[cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]
    pub fn trace(&self, message: &str) {
        trace!(region = %self.inner.region, task = %self.inner.task, "{message}");
    }

    /// The recorded reason; the reason write can lag the flag by a moment.
    fn current_reason(&self) -> CancelReason {
        self.cancel_reason()
            .unwrap_or_else(|| CancelReason::new(CancelKind::User))
    }
}

/// Deregisters a cancellation listener when dropped.
///
/// Returned by [`Cx::on_cancel`]. Holding the guard for the duration of an
/// operation keeps the hook armed; dropping it removes the hook so
/// short-lived operations do not accumulate dead listeners on a long-lived
/// context.
#[must_use = "dropping the guard immediately deregisters the listener"]
pub struct CancelGuard {
    inner: Weak<CxInner>,
    id: u64,
}

impl fmt::Debug for CancelGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelGuard").field("id", &self.id).finish()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut table = inner.listeners.lock().expect("listener lock poisoned");
            table.entries.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn checkpoint_reflects_cancellation() {
        init_test("checkpoint_reflects_cancellation");
        let cx = Cx::for_testing();
        assert!(cx.checkpoint().is_ok());

        cx.cancel(CancelReason::user("stop"));
        let err = cx.checkpoint().expect_err("checkpoint after cancel");
        crate::assert_with_log!(
            err.reason.kind == CancelKind::User,
            "cancel kind",
            CancelKind::User,
            err.reason.kind
        );
        crate::test_complete!("checkpoint_reflects_cancellation");
    }

    #[test]
    fn first_cancel_wins() {
        init_test("first_cancel_wins");
        let cx = Cx::for_testing();
        assert!(cx.cancel(CancelReason::timeout()));
        assert!(!cx.cancel(CancelReason::shutdown()));

        let reason = cx.cancel_reason().expect("reason recorded");
        crate::assert_with_log!(
            reason.kind == CancelKind::Timeout,
            "recorded reason",
            CancelKind::Timeout,
            reason.kind
        );
        crate::test_complete!("first_cancel_wins");
    }

    #[test]
    fn listener_fires_once_on_cancel() {
        init_test("listener_fires_once_on_cancel");
        let cx = Cx::for_testing();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        let _guard = cx.on_cancel(move |_reason: &CancelReason| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        cx.cancel(CancelReason::user("once"));
        cx.cancel(CancelReason::user("twice"));

        let count = fired.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "listener fire count", 1, count);
        crate::test_complete!("listener_fires_once_on_cancel");
    }

    #[test]
    fn listener_registered_after_cancel_fires_immediately() {
        init_test("listener_registered_after_cancel_fires_immediately");
        let cx = Cx::for_testing();
        cx.cancel(CancelReason::shutdown());

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let _guard = cx.on_cancel(move |reason: &CancelReason| {
            assert!(reason.is_shutdown());
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        let count = fired.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "immediate fire count", 1, count);
        crate::test_complete!("listener_registered_after_cancel_fires_immediately");
    }

    #[test]
    fn dropped_guard_deregisters_listener() {
        init_test("dropped_guard_deregisters_listener");
        let cx = Cx::for_testing();
        let fired = Arc::new(AtomicUsize::new(0));

        {
            let fired_clone = Arc::clone(&fired);
            let _guard = cx.on_cancel(move |_reason: &CancelReason| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        cx.cancel(CancelReason::user("late"));
        let count = fired.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 0, "deregistered fire count", 0, count);
        crate::test_complete!("dropped_guard_deregisters_listener");
    }

    #[test]
    fn clones_share_cancellation_state() {
        init_test("clones_share_cancellation_state");
        let cx = Cx::for_testing();
        let clone = cx.clone();

        clone.cancel(CancelReason::timeout());
        assert!(cx.is_cancel_requested());
        crate::test_complete!("clones_share_cancellation_state");
    }
}
