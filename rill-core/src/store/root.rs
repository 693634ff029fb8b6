//! Root Store
//!
//! The root owns the state and runs the send loop described in the
//! `store` module docs. It also owns every effect task it spawns.
//!
//! # Effect Lifecycle
//!
//! 1. `start` walks a returned effect. Synchronous parts complete on the
//!    spot; everything else is handed to `spawn`.
//! 2. `spawn` gives the task an [`EffectHandle`], registers it under its
//!    cancellation ID if it has one, and records the handle in the retained
//!    set. Registration happens here, before the task is first polled, so
//!    cancel-in-flight between two sends in the same batch is exact.
//! 3. The task removes itself from the retained set and the registry when
//!    it completes or is cancelled.
//! 4. Dropping the root cancels everything still retained.
//!
//! # Delivery of Effect Actions
//!
//! Emitters push into an unbounded channel drained by a local "pump" task
//! that feeds actions back through `send`. The pump is started with the
//! first asynchronous effect. Each handle counts its actions still in the
//! channel, which lets a bounded push bridge wait for the store to catch up. Actions whose originating effect was
//! cancelled while they sat in the channel are discarded, so nothing from
//! a cancelled effect is reduced after the cancellation.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::abortable;
use futures_util::FutureExt;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Core, Kind, Observers, ScopeCache, StoreTask};
use crate::cancellation::{self, CancelId};
use crate::dependencies::{Dependencies, DependencyScope, WithDependencies};
use crate::effect::{self, drive, Effect, EffectHandle, Emitter, Sink, Work};
use crate::issue::report_issue;
use crate::reducer::Reducer;

type Retained = Rc<RefCell<IndexMap<u64, EffectHandle>>>;

type OpenOutlet<A> = Box<dyn Fn() -> (Sink<A>, JoinHandle<()>)>;

struct Envelope<A> {
    action: A,
    origin: EffectHandle,
}

/// The channel effect actions travel through, opened lazily.
struct Outlet<A> {
    sink: OnceCell<Sink<A>>,
    pump: RefCell<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    open: OpenOutlet<A>,
}

pub(crate) struct Root<S, A> {
    state: RefCell<S>,
    reducer: Box<dyn Fn(&mut S, A) -> Effect<A>>,
    buffer: RefCell<VecDeque<A>>,
    is_sending: Cell<bool>,
    reading: Cell<usize>,
    dependencies: Dependencies,
    effects: Retained,
    outlet: Outlet<A>,
}

pub(super) fn build<S, A, R>(initial: S, reducer: R, dependencies: Dependencies) -> Rc<Core<S, A>>
where
    S: 'static,
    A: Send + 'static,
    R: Reducer<State = S, Action = A> + 'static,
{
    Rc::new_cyclic(|this: &Weak<Core<S, A>>| {
        let pending = Arc::new(AtomicUsize::new(0));
        let open: OpenOutlet<A> = {
            let this = this.clone();
            let pending = Arc::clone(&pending);
            Box::new(move || open_outlet(this.clone(), Arc::clone(&pending)))
        };

        Core {
            kind: Kind::Root(Root {
                state: RefCell::new(initial),
                reducer: Box::new(move |state: &mut S, action: A| reducer.reduce(state, action)),
                buffer: RefCell::new(VecDeque::new()),
                is_sending: Cell::new(false),
                reading: Cell::new(0),
                dependencies,
                effects: Rc::new(RefCell::new(IndexMap::new())),
                outlet: Outlet {
                    sink: OnceCell::new(),
                    pump: RefCell::new(None),
                    pending,
                    open,
                },
            }),
            observers: Observers::new(),
            children: ScopeCache::new(),
        }
    })
}

fn open_outlet<S, A>(store: Weak<Core<S, A>>, pending: Arc<AtomicUsize>) -> (Sink<A>, JoinHandle<()>)
where
    S: 'static,
    A: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Envelope<A>>();
    let pump = tokio::task::spawn_local(pump(store, rx, Arc::clone(&pending)));
    tracing::debug!("started effect action pump");

    let sink: Sink<A> = Arc::new(move |action: A, origin: &EffectHandle| {
        pending.fetch_add(1, Ordering::SeqCst);
        origin.enter_transit();
        let envelope = Envelope {
            action,
            origin: origin.clone(),
        };
        if tx.send(envelope).is_err() {
            pending.fetch_sub(1, Ordering::SeqCst);
            origin.leave_transit();
            tracing::trace!(handle = origin.id(), "store released; dropping effect action");
        }
    });
    (sink, pump)
}

async fn pump<S: 'static, A: 'static>(
    store: Weak<Core<S, A>>,
    mut inbox: mpsc::UnboundedReceiver<Envelope<A>>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(Envelope { action, origin }) = inbox.recv().await {
        pending.fetch_sub(1, Ordering::SeqCst);
        if origin.is_cancelled() {
            tracing::trace!(handle = origin.id(), "discarding action from cancelled effect");
            origin.leave_transit();
            continue;
        }
        let Some(core) = store.upgrade() else {
            origin.leave_transit();
            break;
        };
        tracing::trace!(handle = origin.id(), "delivering effect action");
        let _ = core.send(action);
        origin.leave_transit();
    }
}

/// Counts an open `with_state` read until dropped.
struct Reading<'a>(&'a Cell<usize>);

impl<'a> Reading<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for Reading<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Clears the sending flag on drop, including during unwinding.
struct Sending<'a>(&'a Cell<bool>);

impl<'a> Sending<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for Sending<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Removes a task's handle from the retained set when the task ends.
struct Release {
    effects: Retained,
    id: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        if let Ok(mut effects) = self.effects.try_borrow_mut() {
            effects.shift_remove(&self.id);
        }
    }
}

impl<S: 'static, A: 'static> Root<S, A> {
    pub(super) fn send(&self, core: &Core<S, A>, action: A) -> StoreTask {
        self.buffer.borrow_mut().push_back(action);
        if self.is_sending.get() || self.reading.get() > 0 {
            tracing::trace!(queued = self.buffer.borrow().len(), "buffered reentrant send");
            return StoreTask::empty();
        }
        self.drain(core)
    }

    fn drain(&self, core: &Core<S, A>) -> StoreTask {
        let _sending = Sending::enter(&self.is_sending);
        let mut tasks = Vec::new();
        loop {
            while let Some(action) = self.next_action() {
                tracing::trace!("reducing action");
                let effect = {
                    let _scope = DependencyScope::enter(self.dependencies.clone());
                    let mut state = self.state.borrow_mut();
                    (self.reducer)(&mut state, action)
                };
                self.start(effect, &mut tasks);
            }

            core.observers.notify(&self.state.borrow());
            if self.buffer.borrow().is_empty() {
                break;
            }
        }
        StoreTask::new(tasks)
    }

    fn next_action(&self) -> Option<A> {
        self.buffer.borrow_mut().pop_front()
    }

    /// Sends made while `read` runs are queued and reduced once it returns.
    pub(super) fn with_state<T>(&self, core: &Core<S, A>, read: impl FnOnce(&S) -> T) -> T {
        let value = {
            let _reading = Reading::enter(&self.reading);
            read(&self.state.borrow())
        };
        if self.reading.get() == 0 && !self.is_sending.get() && !self.buffer.borrow().is_empty() {
            tracing::trace!("reducing sends queued during a state read");
            let _ = self.drain(core);
        }
        value
    }

    fn start(&self, effect: Effect<A>, tasks: &mut Vec<EffectHandle>) {
        match effect.work {
            Work::None => {}
            Work::Send(actions) => self.buffer.borrow_mut().extend(actions),
            Work::Cancel(id) => effect::cancel_id(&id),
            Work::Merge(children) => {
                for child in children {
                    self.start(child, tasks);
                }
            }
            Work::Concat(children) => {
                let mut children = children.into_iter();
                while let Some(child) = children.next() {
                    if child.is_synchronous() {
                        self.start(child, tasks);
                        continue;
                    }
                    let rest = Effect::concatenate_all(std::iter::once(child).chain(children));
                    self.spawn(rest, None, tasks);
                    break;
                }
            }
            Work::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => {
                if effect.is_synchronous() {
                    if cancel_in_flight {
                        cancellation::cancel(&id);
                    }
                    self.start(*effect, tasks);
                } else {
                    self.spawn(*effect, Some((id, cancel_in_flight)), tasks);
                }
            }
            work @ Work::Run(_) => self.spawn(Effect { work }, None, tasks),
        }
    }

    fn spawn(
        &self,
        effect: Effect<A>,
        registration: Option<(CancelId, bool)>,
        tasks: &mut Vec<EffectHandle>,
    ) {
        if tokio::runtime::Handle::try_current().is_err() {
            report_issue(
                "A store started an asynchronous effect outside a tokio runtime. \
                 Drive stores that run effects inside a tokio LocalSet.",
            );
            return;
        }

        let handle = EffectHandle::new();
        let id = handle.id();
        let registration = registration
            .map(|(cancel_id, cancel_in_flight)| cancellation::register(cancel_id, handle.clone(), cancel_in_flight));

        let (future, abort) = abortable(drive(effect, Emitter::new(self.sink(), handle.clone())));
        handle.set_abort(abort);

        self.effects.borrow_mut().insert(id, handle.clone());
        let finished = handle.finish_guard();
        let release = Release {
            effects: Rc::clone(&self.effects),
            id,
        };

        let task = async move {
            let _finished = finished;
            let _release = release;
            let _registration = registration;
            match future.await {
                Ok(()) => tracing::debug!(handle = id, "effect completed"),
                Err(_) => tracing::debug!(handle = id, "effect cancelled"),
            }
        };
        tokio::task::spawn_local(WithDependencies::new(self.dependencies.clone(), task.boxed_local()));
        tracing::debug!(handle = id, "effect started");
        tasks.push(handle);
    }

    fn sink(&self) -> Sink<A> {
        let sink = self.outlet.sink.get_or_init(|| {
            let (sink, pump) = (self.outlet.open)();
            *self.outlet.pump.borrow_mut() = Some(pump);
            sink
        });
        Arc::clone(sink)
    }

    pub(super) fn in_flight_effects(&self) -> usize {
        self.effects.borrow().len()
    }

    pub(super) fn has_pending_work(&self) -> bool {
        !self.effects.borrow().is_empty()
            || self.outlet.pending.load(Ordering::SeqCst) > 0
            || !self.buffer.borrow().is_empty()
    }

    pub(super) fn cancel_effects(&self) {
        let handles: Vec<EffectHandle> = self.effects.borrow().values().cloned().collect();
        for handle in handles {
            handle.cancel();
        }
    }
}

impl<S, A> Drop for Root<S, A> {
    fn drop(&mut self) {
        let handles: Vec<EffectHandle> = self.effects.borrow().values().cloned().collect();
        if !handles.is_empty() {
            tracing::debug!(count = handles.len(), "store released; cancelling effects");
        }
        for handle in handles {
            handle.cancel();
        }
        if let Some(pump) = self.outlet.pump.get_mut().take() {
            pump.abort();
        }
    }
}
