//! Stores
//!
//! A [`Store`] owns state, runs actions through a reducer, starts the
//! returned effects, and tells observers when state has changed.
//!
//! # How the Send Loop Works
//!
//! `send` appends the action to a FIFO buffer. If the store is already
//! processing (the call came from an observer, or from an effect action
//! delivered while an earlier send is still unwinding), that is all it
//! does. Otherwise it:
//!
//! 1. Marks itself as sending.
//! 2. Pops actions one at a time, reduces each, and starts its effect.
//!    Synchronous effect actions are appended to the same buffer.
//! 3. Notifies observers once the buffer is empty.
//! 4. Repeats from 2 if observers sent more actions, then clears the flag.
//!
//! Mutation is therefore strictly serialized without a lock: a store is
//! `!Send`, so every call reaches it on the thread that created it, and
//! actions produced elsewhere arrive through an [`Emitter`] channel that
//! the store drains on its own thread.
//!
//! # Running Effects
//!
//! Effect tasks are spawned with `tokio::task::spawn_local`, so a store
//! that starts asynchronous effects must be driven inside a
//! [`tokio::task::LocalSet`]. Synchronous effects need no runtime at all.
//!
//! # Scoping
//!
//! [`Store::scope`] derives a child store showing a projection of this
//! store's state and forwarding its actions back through an embedding.
//! See the `scope` module docs for identity and caching rules.
//!
//! [`Emitter`]: crate::effect::Emitter

mod observers;
mod root;
mod scope;

pub use observers::Subscription;
pub use scope::ScopeOptions;

use std::fmt;
use std::rc::Rc;

use crate::dependencies::Dependencies;
use crate::effect::EffectHandle;
use crate::reducer::Reducer;

use observers::Observers;
use root::Root;
use scope::{ScopeCache, Scoped};

/// Runtime owner of state, reducer, and running effects.
///
/// Cloning a `Store` yields another handle to the same store.
pub struct Store<S, A> {
    core: Rc<Core<S, A>>,
}

pub(crate) struct Core<S, A> {
    kind: Kind<S, A>,
    observers: Observers<S>,
    children: ScopeCache,
}

enum Kind<S, A> {
    Root(Root<S, A>),
    Scoped(Scoped<S, A>),
}

/// Type-erased view of a store used by its scoped children.
pub(crate) trait StoreStatus {
    fn in_flight_effects(&self) -> usize;
    fn has_pending_work(&self) -> bool;
    fn is_invalid(&self) -> bool;
}

impl<S: 'static, A: Send + 'static> Store<S, A> {
    /// Create a root store with live dependencies.
    pub fn new<R>(initial: S, reducer: R) -> Self
    where
        R: Reducer<State = S, Action = A> + 'static,
    {
        Self::with_dependencies(initial, reducer, Dependencies::live())
    }

    /// Create a root store whose reducer and effects resolve
    /// dependencies against `dependencies`.
    pub fn with_dependencies<R>(initial: S, reducer: R, dependencies: Dependencies) -> Self
    where
        R: Reducer<State = S, Action = A> + 'static,
    {
        Self {
            core: root::build(initial, reducer, dependencies),
        }
    }
}

impl<S: 'static, A: 'static> Store<S, A> {
    /// Send an action.
    ///
    /// The returned [`StoreTask`] tracks the effect tasks started while
    /// processing it. A send made while the store is already processing is
    /// queued and returns an empty task.
    pub fn send(&self, action: A) -> StoreTask {
        self.core.send(action)
    }

    /// Read the current state.
    ///
    /// Actions sent to this store from inside `read` are queued and reduced
    /// after `read` returns, like sends made from an observer.
    pub fn with_state<T>(&self, read: impl FnOnce(&S) -> T) -> T {
        self.core.with_state(read)
    }

    /// A copy of the current state.
    pub fn state(&self) -> S
    where
        S: Clone,
    {
        self.with_state(S::clone)
    }

    /// Call `observer` with the state after every processed batch of
    /// actions, whether or not it changed.
    pub fn subscribe(&self, observer: impl Fn(&S) + 'static) -> Subscription {
        self.core.observers.subscribe(observer)
    }

    /// Call `observer` only when the state differs from what it last saw,
    /// as judged by `is_duplicate`.
    pub fn subscribe_deduped(
        &self,
        is_duplicate: impl Fn(&S, &S) -> bool + 'static,
        observer: impl Fn(&S) + 'static,
    ) -> Subscription
    where
        S: Clone,
    {
        let last = std::cell::RefCell::new(self.state());
        self.core.observers.subscribe(move |state| {
            if is_duplicate(&last.borrow(), state) {
                return;
            }
            *last.borrow_mut() = state.clone();
            observer(state);
        })
    }

    /// Number of effect tasks still running for the root of this store.
    pub fn in_flight_effects(&self) -> usize {
        self.core.in_flight_effects()
    }

    /// Whether effects are running or actions are waiting to be reduced.
    pub fn has_pending_work(&self) -> bool {
        self.core.has_pending_work()
    }

    /// Whether this scoped store's slice of state no longer exists. Always
    /// `false` for a root store.
    pub fn is_invalid(&self) -> bool {
        self.core.is_invalid()
    }

    /// Number of cached scoped children of this store still referenced
    /// somewhere.
    pub fn live_children(&self) -> usize {
        self.core.children.live()
    }

    /// Whether `self` and `other` are handles to the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Cancel every running effect of the root store.
    pub(crate) fn cancel_effects(&self) {
        if let Kind::Root(root) = &self.core.kind {
            root.cancel_effects();
        }
    }
}

impl<S: 'static, A: 'static> Core<S, A> {
    fn send(&self, action: A) -> StoreTask {
        match &self.kind {
            Kind::Root(root) => root.send(self, action),
            Kind::Scoped(scoped) => scoped.send(action),
        }
    }

    fn with_state<T>(&self, read: impl FnOnce(&S) -> T) -> T {
        match &self.kind {
            Kind::Root(root) => root.with_state(self, read),
            Kind::Scoped(scoped) => scoped.with_state(read),
        }
    }
}

impl<S: 'static, A: 'static> StoreStatus for Core<S, A> {
    fn in_flight_effects(&self) -> usize {
        match &self.kind {
            Kind::Root(root) => root.in_flight_effects(),
            Kind::Scoped(scoped) => scoped.parent().in_flight_effects(),
        }
    }

    fn has_pending_work(&self) -> bool {
        match &self.kind {
            Kind::Root(root) => root.has_pending_work(),
            Kind::Scoped(scoped) => scoped.parent().has_pending_work(),
        }
    }

    fn is_invalid(&self) -> bool {
        match &self.kind {
            Kind::Root(_) => false,
            Kind::Scoped(scoped) => scoped.is_invalid(),
        }
    }
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<S: 'static, A: 'static> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.core.kind {
            Kind::Root(_) => "root",
            Kind::Scoped(_) => "scoped",
        };
        f.debug_struct("Store")
            .field("kind", &kind)
            .field("observers", &self.core.observers.len())
            .field("children", &self.core.children.live())
            .finish()
    }
}

/// The effect tasks started by one [`Store::send`].
#[derive(Debug, Default)]
pub struct StoreTask {
    handles: Vec<EffectHandle>,
}

impl StoreTask {
    pub(crate) fn new(handles: Vec<EffectHandle>) -> Self {
        Self { handles }
    }

    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Wait for every tracked effect to stop.
    pub async fn finish(&self) {
        for handle in &self.handles {
            handle.finished().await;
        }
    }

    /// Cancel every tracked effect.
    pub fn cancel(&self) {
        for handle in &self.handles {
            handle.cancel();
        }
    }

    /// Whether every tracked effect has stopped.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(EffectHandle::is_finished)
    }

    /// Handles of the tracked effect tasks, in start order.
    pub fn handles(&self) -> &[EffectHandle] {
        &self.handles
    }
}
