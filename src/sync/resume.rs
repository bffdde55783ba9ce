//! One-shot suspension slots.
//!
//! A slot couples a [`Suspended`] future with the [`Resumer`] handle that
//! completes it. `Resumer::resume` consumes the handle, so a suspension can
//! be resumed at most once by construction; there is no runtime double-resume
//! check to get wrong.
//!
//! The channel protocol guarantees that every resumer it queues is resumed
//! exactly once. Dropping a resumer without resuming leaves the paired
//! suspension pending forever; don't.

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Slot state shared by the two halves.
struct Slot<E> {
    value: Option<E>,
    waker: Option<Waker>,
}

/// Creates a linked resume-handle / suspension pair.
#[must_use]
pub fn resume_slot<E>() -> (Resumer<E>, Suspended<E>) {
    let slot = Arc::new(Mutex::new(Slot {
        value: None,
        waker: None,
    }));
    (
        Resumer {
            slot: Arc::clone(&slot),
        },
        Suspended { slot },
    )
}

/// Resume handle for a paired [`Suspended`] future.
pub struct Resumer<E> {
    slot: Arc<Mutex<Slot<E>>>,
}

impl<E> Resumer<E> {
    /// Delivers `value` and wakes the suspended side.
    pub fn resume(self, value: E) {
        let waker = {
            let mut slot = self.slot.lock().expect("resume slot lock poisoned");
            slot.value = Some(value);
            slot.waker.take()
        };
        // Wake after the slot lock is released.
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<E> fmt::Debug for Resumer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer").finish_non_exhaustive()
    }
}

/// Future side of a one-shot suspension.
///
/// Resolves exactly once, with the value the [`Resumer`] delivers.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Suspended<E> {
    slot: Arc<Mutex<Slot<E>>>,
}

impl<E> fmt::Debug for Suspended<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspended").finish_non_exhaustive()
    }
}

impl<E> Unpin for Suspended<E> {}

impl<E> Future for Suspended<E> {
    type Output = E;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<E> {
        let mut slot = self.slot.lock().expect("resume slot lock poisoned");
        if let Some(value) = slot.value.take() {
            Poll::Ready(value)
        } else {
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}
