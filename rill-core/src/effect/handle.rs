//! Effect Handles
//!
//! An `EffectHandle` is the cancellable identity of one running effect task
//! (or of a cancellable sub-effect inside a task). Stores retain handles for
//! every task they spawn, and the cancellation registry groups them by ID.
//!
//! # Cancellation
//!
//! Cancelling a handle sets a flag and aborts the wrapped future. The abort
//! is cooperative: the future is dropped the next time the executor polls
//! it, which is at or after its current suspension point. Handles form a
//! tree, and a handle counts as cancelled when it or any ancestor is.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::AbortHandle;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Counter for generating unique handle IDs.
static HANDLE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_handle_id() -> u64 {
    HANDLE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Cancellable identity of a running effect.
#[derive(Clone)]
pub struct EffectHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u64,
    parent: Option<EffectHandle>,
    cancelled: AtomicBool,
    finished: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
    done: Notify,
    in_transit: AtomicUsize,
    taken: Notify,
}

impl EffectHandle {
    pub(crate) fn new() -> Self {
        Self::with_parent(None)
    }

    /// A handle cancelled whenever `self` is.
    pub(crate) fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    fn with_parent(parent: Option<EffectHandle>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: next_handle_id(),
                parent,
                cancelled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                abort: Mutex::new(None),
                done: Notify::new(),
                in_transit: AtomicUsize::new(0),
                taken: Notify::new(),
            }),
        }
    }

    /// Unique identifier of this handle.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Cancel the effect. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(handle = self.inner.id, "cancelling effect");
        if let Some(abort) = self.inner.abort.lock().take() {
            abort.abort();
        }
    }

    /// Whether this handle or one of its ancestors was cancelled.
    pub fn is_cancelled(&self) -> bool {
        let mut current = Some(self);
        while let Some(handle) = current {
            if handle.inner.cancelled.load(Ordering::SeqCst) {
                return true;
            }
            current = handle.inner.parent.as_ref();
        }
        false
    }

    /// Whether the effect has stopped running, by completion or cancellation.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Wait until the effect stops running.
    pub async fn finished(&self) {
        loop {
            let notified = self.inner.done.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    /// Attach the abort switch of the future this handle controls.
    pub(crate) fn set_abort(&self, abort: AbortHandle) {
        let mut slot = self.inner.abort.lock();
        if self.inner.cancelled.load(Ordering::SeqCst) {
            abort.abort();
        } else {
            *slot = Some(abort);
        }
    }

    /// Record an action from this effect entering the store's channel.
    pub(crate) fn enter_transit(&self) {
        self.inner.in_transit.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that the store took an action from this effect off its
    /// channel, whether it reduced or discarded it.
    pub(crate) fn leave_transit(&self) {
        self.inner.in_transit.fetch_sub(1, Ordering::SeqCst);
        self.inner.taken.notify_waiters();
    }

    /// Wait until every action this effect sent has been taken by the store.
    pub(crate) async fn settled(&self) {
        loop {
            let taken = self.inner.taken.notified();
            if self.inner.in_transit.load(Ordering::SeqCst) == 0 {
                return;
            }
            taken.await;
        }
    }

    /// Guard that marks the handle finished when dropped.
    pub(crate) fn finish_guard(&self) -> FinishGuard {
        FinishGuard {
            handle: self.clone(),
        }
    }
}

impl PartialEq for EffectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for EffectHandle {}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Marks a handle finished on drop, whether the future completed or was
/// dropped mid-flight.
pub(crate) struct FinishGuard {
    handle: EffectHandle,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.handle.inner.finished.store(true, Ordering::SeqCst);
        self.handle.inner.done.notify_waiters();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::{abortable, pending};

    #[test]
    fn handle_ids_are_unique() {
        let a = EffectHandle::new();
        let b = EffectHandle::new();
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn cancel_is_idempotent_and_inherited() {
        let parent = EffectHandle::new();
        let child = parent.child();

        assert!(!child.is_cancelled());
        parent.cancel();
        parent.cancel();

        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelling_child_leaves_parent_running() {
        let parent = EffectHandle::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn abort_attached_after_cancel_fires_immediately() {
        let handle = EffectHandle::new();
        handle.cancel();

        let (future, abort) = abortable(pending::<()>());
        handle.set_abort(abort);
        assert!(future.await.is_err());
    }

    #[tokio::test]
    async fn cancel_aborts_attached_future() {
        let handle = EffectHandle::new();
        let (future, abort) = abortable(pending::<()>());
        handle.set_abort(abort);
        handle.cancel();
        assert!(future.await.is_err());
    }

    #[tokio::test]
    async fn finished_resolves_after_guard_drops() {
        let handle = EffectHandle::new();
        let guard = handle.finish_guard();
        assert!(!handle.is_finished());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.finished().await })
        };
        tokio::task::yield_now().await;
        drop(guard);

        waiter.await.unwrap();
        assert!(handle.is_finished());
    }
}
