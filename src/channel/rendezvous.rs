//! Rendezvous channel core: state machine and two-step hand-off.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        RENDEZVOUS HAND-OFF                         │
//! │                                                                    │
//! │   Sender                                        Receiver           │
//! │     │                                              │               │
//! │     │── send(v) suspends ──┐                       │               │
//! │     │                      │   ┌── receive() suspends              │
//! │     │                      ▼   ▼                                   │
//! │     │               [ channel pairs them ]                         │
//! │     │                      │                                       │
//! │     │  resumed with ◄──────┘                                       │
//! │     │  receiver handle                                             │
//! │     │                                                              │
//! │     │── handle delivers v ─────────────────────────► resumed with  │
//! │     │                                                Some(v)       │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The hand-off is two-step on purpose: the channel's critical section only
//! pairs waiters and is never held across a resume or an element move. A
//! paired sender is resumed with a handle to its receiver's suspension and
//! performs the delivery itself, outside the lock.
//!
//! # Cancel Safety
//!
//! Each operation owns a status record and registers a hook on its `&Cx`.
//! The hook removes the operation from the waiter queue if it is there and
//! always marks the status; the operation checks the status before
//! registering. Both happen under the channel's critical section, so
//! cancellation and suspension cannot miss each other. A waiter is resumed
//! exactly once: by a partner, by [`Channel::finish`], or by cancellation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cx::Cx;
use crate::sync::resume::{resume_slot, Resumer};
use crate::tracing_compat::{debug, trace};
use crate::types::CancelReason;

/// Resume handle that delivers an element into a paired receiver's
/// suspension.
struct ReceiverHandle<T>(Resumer<Option<T>>);

impl<T> ReceiverHandle<T> {
    fn deliver(self, value: T) {
        self.0.resume(Some(value));
    }
}

type SenderWaiter<T> = Resumer<Option<ReceiverHandle<T>>>;
type ReceiverWaiter<T> = Resumer<Option<T>>;

/// Channel phase. A sender and a receiver can never both be queued: whenever
/// the two sides meet, they annihilate into a hand-off.
enum Phase<T> {
    Idle,
    SendersWaiting(BTreeMap<u64, SenderWaiter<T>>),
    ReceiversWaiting(BTreeMap<u64, ReceiverWaiter<T>>),
    Finished,
}

/// Snapshot of the channel phase, for assertions and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// No waiters.
    Idle,
    /// One or more senders are queued.
    SendersWaiting,
    /// One or more receivers are queued.
    ReceiversWaiting,
    /// Terminal; all operations short-circuit.
    Finished,
}

struct State<T> {
    phase: Phase<T>,
    /// Identity source for suspension attempts. Wraps; identity is only
    /// compared within a live queue, so wrap is harmless.
    generation: u64,
}

/// Caller-owned status record resolving the race between cancellation firing
/// and the suspend path completing registration.
struct OpStatus {
    cancelled: AtomicBool,
}

impl OpStatus {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What an operation must do after releasing the critical section.
enum Resolution<T> {
    /// The operation is queued; stay suspended.
    Waiting,
    /// Resume the operation's own sender-side suspension with `None`
    /// (cancelled or finished).
    AbortSend(SenderWaiter<T>),
    /// Resume the operation's own receiver-side suspension with `None`
    /// (cancelled or finished).
    AbortReceive(ReceiverWaiter<T>),
    /// A sender and a receiver met; hand the sender its receiver's handle.
    Pair {
        sender: SenderWaiter<T>,
        receiver: ReceiverWaiter<T>,
    },
}

/// A rendezvous channel transferring elements of type `T`.
///
/// Cheaply clonable; any number of producer and consumer tasks may share one
/// channel. Created `Idle` and lives until dropped; [`Channel::finish`] is
/// terminal for behavior but not storage.
pub struct Channel<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let (kind, waiters) = match &state.phase {
            Phase::Idle => (PhaseKind::Idle, 0),
            Phase::SendersWaiting(queue) => (PhaseKind::SendersWaiting, queue.len()),
            Phase::ReceiversWaiting(queue) => (PhaseKind::ReceiversWaiting, queue.len()),
            Phase::Finished => (PhaseKind::Finished, 0),
        };
        f.debug_struct("Channel")
            .field("phase", &kind)
            .field("waiters", &waiters)
            .finish_non_exhaustive()
    }
}

impl<T> Channel<T> {
    /// Creates a new channel in the `Idle` phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                phase: Phase::Idle,
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().expect("channel lock poisoned")
    }

    /// Assigns this suspension attempt its identity.
    fn establish(&self) -> u64 {
        let mut state = self.lock();
        let generation = state.generation;
        state.generation = state.generation.wrapping_add(1);
        generation
    }

    /// Terminates the channel.
    ///
    /// Unconditionally moves to `Finished` and resumes every queued waiter
    /// with `None`. Elements of drained senders are not delivered. Does not
    /// suspend; idempotent. A hand-off already in flight (its receiver
    /// dequeued) completes normally.
    pub fn finish(&self) {
        let prior = {
            let mut state = self.lock();
            std::mem::replace(&mut state.phase, Phase::Finished)
        };
        match prior {
            Phase::SendersWaiting(queue) => {
                debug!(drained = queue.len(), "finish: draining queued senders");
                for (_, sender) in queue {
                    sender.resume(None);
                }
            }
            Phase::ReceiversWaiting(queue) => {
                debug!(drained = queue.len(), "finish: draining queued receivers");
                for (_, receiver) in queue {
                    receiver.resume(None);
                }
            }
            Phase::Idle | Phase::Finished => {}
        }
    }

    /// Returns a snapshot of the current phase.
    #[must_use]
    pub fn phase(&self) -> PhaseKind {
        match &self.lock().phase {
            Phase::Idle => PhaseKind::Idle,
            Phase::SendersWaiting(_) => PhaseKind::SendersWaiting,
            Phase::ReceiversWaiting(_) => PhaseKind::ReceiversWaiting,
            Phase::Finished => PhaseKind::Finished,
        }
    }

    /// Returns the number of senders currently queued.
    #[must_use]
    pub fn pending_senders(&self) -> usize {
        match &self.lock().phase {
            Phase::SendersWaiting(queue) => queue.len(),
            _ => 0,
        }
    }

    /// Returns the number of receivers currently queued.
    #[must_use]
    pub fn pending_receivers(&self) -> usize {
        match &self.lock().phase {
            Phase::ReceiversWaiting(queue) => queue.len(),
            _ => 0,
        }
    }

    /// Returns true once [`Channel::finish`] has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.lock().phase, Phase::Finished)
    }

    /// Returns a consumer view that yields elements until the first `None`.
    pub fn iter<'a>(&'a self, cx: &'a Cx) -> Iter<'a, T> {
        Iter {
            channel: self,
            cx,
            finished: false,
        }
    }

    /// Resolves a post-critical-section action. Never called with the
    /// channel lock held.
    fn resolve(action: Resolution<T>) {
        match action {
            Resolution::Waiting => {}
            Resolution::AbortSend(sender) => sender.resume(None),
            Resolution::AbortReceive(receiver) => receiver.resume(None),
            Resolution::Pair { sender, receiver } => {
                sender.resume(Some(ReceiverHandle(receiver)));
            }
        }
    }

    /// Cancellation arbitration for a suspended receive.
    ///
    /// Removes the waiter by generation if it is queued and always marks the
    /// status, both under the critical section. The removed waiter is resumed
    /// outside it.
    fn cancel_receive(state: &Mutex<State<T>>, status: &OpStatus, generation: u64) {
        let removed = {
            let mut state = state.lock().expect("channel lock poisoned");
            let removed = match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::ReceiversWaiting(mut queue) => {
                    let waiter = queue.remove(&generation);
                    if !queue.is_empty() {
                        state.phase = Phase::ReceiversWaiting(queue);
                    }
                    waiter
                }
                other => {
                    state.phase = other;
                    None
                }
            };
            status.mark_cancelled();
            removed
        };
        if let Some(receiver) = removed {
            trace!(generation, "receive: cancelled while queued");
            receiver.resume(None);
        }
    }

    /// Cancellation arbitration for a suspended send.
    fn cancel_send(state: &Mutex<State<T>>, status: &OpStatus, generation: u64) {
        let removed = {
            let mut state = state.lock().expect("channel lock poisoned");
            let removed = match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::SendersWaiting(mut queue) => {
                    let waiter = queue.remove(&generation);
                    if !queue.is_empty() {
                        state.phase = Phase::SendersWaiting(queue);
                    }
                    waiter
                }
                other => {
                    state.phase = other;
                    None
                }
            };
            status.mark_cancelled();
            removed
        };
        if let Some(sender) = removed {
            trace!(generation, "send: cancelled while queued");
            sender.resume(None);
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Receives an element.
    ///
    /// Suspends until a sender hands one off. Returns `None` if the channel
    /// is finished or the owning task is cancelled.
    pub async fn receive(&self, cx: &Cx) -> Option<T> {
        let generation = self.establish();
        let status = Arc::new(OpStatus::new());
        let (resumer, suspended) = resume_slot::<Option<T>>();

        let _hook = cx.on_cancel({
            let state = Arc::downgrade(&self.state);
            let status = Arc::clone(&status);
            move |_reason: &CancelReason| {
                if let Some(state) = state.upgrade() {
                    Self::cancel_receive(&state, &status, generation);
                } else {
                    status.mark_cancelled();
                }
            }
        });

        let action = {
            let mut state = self.lock();
            if status.is_cancelled() {
                Resolution::AbortReceive(resumer)
            } else {
                match std::mem::replace(&mut state.phase, Phase::Idle) {
                    Phase::Idle => {
                        let mut queue = BTreeMap::new();
                        queue.insert(generation, resumer);
                        state.phase = Phase::ReceiversWaiting(queue);
                        Resolution::Waiting
                    }
                    Phase::ReceiversWaiting(mut queue) => {
                        queue.insert(generation, resumer);
                        state.phase = Phase::ReceiversWaiting(queue);
                        Resolution::Waiting
                    }
                    Phase::SendersWaiting(mut queue) => {
                        let (_, sender) =
                            queue.pop_first().expect("senders phase with empty queue");
                        if !queue.is_empty() {
                            state.phase = Phase::SendersWaiting(queue);
                        }
                        Resolution::Pair {
                            sender,
                            receiver: resumer,
                        }
                    }
                    Phase::Finished => {
                        state.phase = Phase::Finished;
                        Resolution::AbortReceive(resumer)
                    }
                }
            }
        };

        if matches!(action, Resolution::Waiting) {
            trace!(generation, "receive: waiting for a sender");
        }
        Self::resolve(action);

        let item = suspended.await;
        if item.is_none() && status.is_cancelled() {
            cx.trace("rendezvous::receive cancelled");
        }
        item
    }

    /// Sends an element.
    ///
    /// Suspends until a receiver accepts it. Completes without delivering if
    /// the channel is finished or the owning task is cancelled; the element
    /// is dropped.
    pub async fn send(&self, cx: &Cx, value: T) {
        let generation = self.establish();
        let status = Arc::new(OpStatus::new());
        let (resumer, suspended) = resume_slot::<Option<ReceiverHandle<T>>>();

        let _hook = cx.on_cancel({
            let state = Arc::downgrade(&self.state);
            let status = Arc::clone(&status);
            move |_reason: &CancelReason| {
                if let Some(state) = state.upgrade() {
                    Self::cancel_send(&state, &status, generation);
                } else {
                    status.mark_cancelled();
                }
            }
        });

        let action = {
            let mut state = self.lock();
            if status.is_cancelled() {
                Resolution::AbortSend(resumer)
            } else {
                match std::mem::replace(&mut state.phase, Phase::Idle) {
                    Phase::Idle => {
                        let mut queue = BTreeMap::new();
                        queue.insert(generation, resumer);
                        state.phase = Phase::SendersWaiting(queue);
                        Resolution::Waiting
                    }
                    Phase::SendersWaiting(mut queue) => {
                        queue.insert(generation, resumer);
                        state.phase = Phase::SendersWaiting(queue);
                        Resolution::Waiting
                    }
                    Phase::ReceiversWaiting(mut queue) => {
                        let (_, receiver) =
                            queue.pop_first().expect("receivers phase with empty queue");
                        if !queue.is_empty() {
                            state.phase = Phase::ReceiversWaiting(queue);
                        }
                        Resolution::Pair {
                            sender: resumer,
                            receiver,
                        }
                    }
                    Phase::Finished => {
                        state.phase = Phase::Finished;
                        Resolution::AbortSend(resumer)
                    }
                }
            }
        };

        if matches!(action, Resolution::Waiting) {
            trace!(generation, "send: waiting for a receiver");
        }
        Self::resolve(action);

        match suspended.await {
            Some(handle) => {
                trace!(generation, "send: delivering element");
                handle.deliver(value);
            }
            None => {
                if status.is_cancelled() {
                    cx.trace("rendezvous::send cancelled");
                }
                // Element dropped: cancelled or finished.
            }
        }
    }
}

/// Consumer view over a channel.
///
/// `next` calls [`Channel::receive`] and caches the first terminal result:
/// after one `None`, later calls return `None` without touching the channel.
pub struct Iter<'a, T> {
    channel: &'a Channel<T>,
    cx: &'a Cx,
    finished: bool,
}

impl<T> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Iter<'_, T> {
    /// Receives the next element, or `None` once the channel terminates for
    /// this consumer.
    pub async fn next(&mut self) -> Option<T> {
        if self.finished {
            return None;
        }
        let item = self.channel.receive(self.cx).await;
        if item.is_none() {
            self.finished = true;
        }
        item
    }
}
