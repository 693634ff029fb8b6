//! Scoped Stores
//!
//! A scoped store presents a projection of its parent's state and forwards
//! its actions to the parent through an embedding. Reads always project the
//! parent's current state. The child also caches the last projection it
//! notified with, which is compared for deduplication and shown once the
//! slice no longer exists.
//!
//! # How Propagation Works
//!
//! Each scoped store subscribes to its parent's observers. After every batch
//! the parent processes, the child recomputes its projection:
//!
//! 1. If the projection says the slice no longer exists, the child is marked
//!    invalid and keeps showing the last state it had.
//! 2. If a duplicate predicate was supplied and says nothing changed, the
//!    child stops there, so unchanged projections do no downstream work.
//! 3. Otherwise the cached state is replaced and the child notifies its own
//!    observers, which is how grandchildren are refreshed in turn.
//!
//! # Identity
//!
//! Scoping is cached per parent. When both the projection and the embedding
//! are capture-free (fn items or non-capturing closures), their types alone
//! identify the pair and repeated calls return the same store. Capturing
//! closures carry values the type cannot see, so those are only cached when
//! the caller names a key through [`Store::scope_keyed`].
//!
//! The cache holds children weakly. A child keeps its parent alive, never
//! the other way round, and dead entries are swept every
//! `scope_sweep_interval` insertions.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::{Core, Kind, Observers, Store, StoreStatus, StoreTask, Subscription};
use crate::config::RuntimeConfig;
use crate::issue::report_issue;
use crate::key::AnyKey;

type Refresh<S, C> = Rc<dyn Fn(&S) -> Option<C>>;
type IsDuplicate<C> = Box<dyn Fn(&C, &C) -> bool>;

/// Weak cache of the scoped children of one store.
pub(crate) struct ScopeCache {
    entries: RefCell<IndexMap<AnyKey, Weak<dyn Any>>>,
    inserts: Cell<usize>,
}

impl ScopeCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(IndexMap::new()),
            inserts: Cell::new(0),
        }
    }

    /// Number of cached children still referenced somewhere.
    pub(crate) fn live(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    fn get<T: 'static>(&self, key: &AnyKey) -> Option<Rc<T>> {
        let entry = self.entries.borrow().get(key)?.upgrade()?;
        entry.downcast::<T>().ok()
    }

    fn insert<T: 'static>(&self, key: AnyKey, value: &Rc<T>) {
        let erased: Rc<dyn Any> = Rc::clone(value) as Rc<dyn Any>;
        self.entries.borrow_mut().insert(key, Rc::downgrade(&erased));

        let inserts = self.inserts.get() + 1;
        self.inserts.set(inserts);
        let interval = RuntimeConfig::current().scope_sweep_interval.max(1);
        if inserts % interval == 0 {
            self.sweep();
        }
    }

    fn sweep(&self) {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, entry| entry.strong_count() > 0);
        tracing::debug!(
            swept = before - entries.len(),
            remaining = entries.len(),
            "swept scoped store cache"
        );
    }
}

/// State of a scoped store.
pub(crate) struct Scoped<S, A> {
    state: RefCell<S>,
    current: Box<dyn Fn() -> Option<S>>,
    valid: Cell<bool>,
    forward: Box<dyn Fn(A) -> StoreTask>,
    parent: Rc<dyn StoreStatus>,
    _upstream: Subscription,
}

impl<S, A> Scoped<S, A> {
    pub(super) fn send(&self, action: A) -> StoreTask {
        if self.is_invalid() {
            report_issue(
                "An action was sent to a scoped store whose state no longer exists. \
                 The action was not forwarded to the parent store.",
            );
            return StoreTask::empty();
        }
        (self.forward)(action)
    }

    /// Reads project the parent's current state, falling back to the last
    /// cached projection while the slice does not exist.
    pub(super) fn with_state<T>(&self, read: impl FnOnce(&S) -> T) -> T {
        match (self.current)() {
            Some(state) => {
                self.valid.set(true);
                read(&state)
            }
            None => {
                self.valid.set(false);
                read(&self.state.borrow())
            }
        }
    }

    pub(super) fn parent(&self) -> &dyn StoreStatus {
        &*self.parent
    }

    pub(super) fn is_invalid(&self) -> bool {
        !self.valid.get() || self.parent.is_invalid()
    }
}

/// Optional behavior for [`Store::scope_with`].
pub struct ScopeOptions<S, C> {
    is_invalid: Option<Box<dyn Fn(&S) -> bool>>,
    is_duplicate: Option<IsDuplicate<C>>,
}

impl<S, C> ScopeOptions<S, C> {
    pub fn new() -> Self {
        Self {
            is_invalid: None,
            is_duplicate: None,
        }
    }

    /// Stop forwarding sends while `is_invalid` holds for the parent state.
    pub fn invalid_when(mut self, is_invalid: impl Fn(&S) -> bool + 'static) -> Self {
        self.is_invalid = Some(Box::new(is_invalid));
        self
    }

    /// Skip notifying observers when `is_duplicate(old, new)` holds.
    pub fn dedup_by(mut self, is_duplicate: impl Fn(&C, &C) -> bool + 'static) -> Self {
        self.is_duplicate = Some(Box::new(is_duplicate));
        self
    }

    /// Skip notifying observers when the projection compares equal.
    pub fn dedup(self) -> Self
    where
        C: PartialEq,
    {
        self.dedup_by(|old, new| old == new)
    }
}

impl<S, C> Default for ScopeOptions<S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> fmt::Debug for ScopeOptions<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeOptions")
            .field("is_invalid", &self.is_invalid.is_some())
            .field("is_duplicate", &self.is_duplicate.is_some())
            .finish()
    }
}

fn type_key<P: 'static, E: 'static, C: 'static, CA: 'static>() -> Option<AnyKey> {
    let capture_free = std::mem::size_of::<P>() == 0 && std::mem::size_of::<E>() == 0;
    capture_free.then(|| {
        AnyKey::new((
            TypeId::of::<P>(),
            TypeId::of::<E>(),
            TypeId::of::<C>(),
            TypeId::of::<CA>(),
        ))
    })
}

impl<S: 'static, A: 'static> Store<S, A> {
    /// Derive a store showing `project(state)` whose actions are sent to this
    /// store as `embed(action)`.
    pub fn scope<C, CA, P, E>(&self, project: P, embed: E) -> Store<C, CA>
    where
        C: 'static,
        CA: 'static,
        P: Fn(&S) -> C + 'static,
        E: Fn(CA) -> A + 'static,
    {
        self.scope_with(project, embed, ScopeOptions::new())
    }

    /// Like [`Store::scope`], with invalidation and deduplication options.
    ///
    /// Options only apply when the child is created. A cached child keeps the
    /// options it was first built with.
    pub fn scope_with<C, CA, P, E>(
        &self,
        project: P,
        embed: E,
        options: ScopeOptions<S, C>,
    ) -> Store<C, CA>
    where
        C: 'static,
        CA: 'static,
        P: Fn(&S) -> C + 'static,
        E: Fn(CA) -> A + 'static,
    {
        let key = type_key::<P, E, C, CA>();
        self.scope_projection(key, project, embed, options)
    }

    /// Like [`Store::scope_with`], cached under `key` instead of the closure
    /// types. Use this when the projection or embedding captures values.
    pub fn scope_keyed<K, C, CA, P, E>(
        &self,
        key: K,
        project: P,
        embed: E,
        options: ScopeOptions<S, C>,
    ) -> Store<C, CA>
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
        C: 'static,
        CA: 'static,
        P: Fn(&S) -> C + 'static,
        E: Fn(CA) -> A + 'static,
    {
        let key = AnyKey::new((key, TypeId::of::<C>(), TypeId::of::<CA>()));
        self.scope_projection(Some(key), project, embed, options)
    }

    /// Derive a store over optional state. Returns `None` while
    /// `project(state)` is `None`; the returned store becomes invalid once it
    /// does.
    pub fn scope_if_let<C, CA, P, E>(&self, project: P, embed: E) -> Option<Store<C, CA>>
    where
        C: 'static,
        CA: 'static,
        P: Fn(&S) -> Option<C> + 'static,
        E: Fn(CA) -> A + 'static,
    {
        let initial = self.with_state(&project)?;
        let key = type_key::<P, E, C, CA>();
        if let Some(cached) = self.cached(key.as_ref()) {
            return Some(cached);
        }
        Some(self.build_child(key, initial, true, Rc::new(project), embed, None))
    }

    fn scope_projection<C, CA, P, E>(
        &self,
        key: Option<AnyKey>,
        project: P,
        embed: E,
        options: ScopeOptions<S, C>,
    ) -> Store<C, CA>
    where
        C: 'static,
        CA: 'static,
        P: Fn(&S) -> C + 'static,
        E: Fn(CA) -> A + 'static,
    {
        if let Some(cached) = self.cached(key.as_ref()) {
            return cached;
        }

        let ScopeOptions {
            is_invalid,
            is_duplicate,
        } = options;
        let (initial, valid) = self.with_state(|state| {
            let valid = is_invalid.as_ref().map_or(true, |invalid| !invalid(state));
            (project(state), valid)
        });
        let refresh: Refresh<S, C> = Rc::new(move |state: &S| match &is_invalid {
            Some(invalid) if invalid(state) => None,
            _ => Some(project(state)),
        });
        self.build_child(key, initial, valid, refresh, embed, is_duplicate)
    }

    fn cached<C: 'static, CA: 'static>(&self, key: Option<&AnyKey>) -> Option<Store<C, CA>> {
        let core = self.core.children.get::<Core<C, CA>>(key?)?;
        tracing::trace!(key = ?key, "reusing scoped store");
        Some(Store { core })
    }

    fn build_child<C, CA, E>(
        &self,
        key: Option<AnyKey>,
        initial: C,
        valid: bool,
        refresh: Refresh<S, C>,
        embed: E,
        is_duplicate: Option<IsDuplicate<C>>,
    ) -> Store<C, CA>
    where
        C: 'static,
        CA: 'static,
        E: Fn(CA) -> A + 'static,
    {
        let parent = self.clone();
        let status: Rc<dyn StoreStatus> = Rc::clone(&self.core) as Rc<dyn StoreStatus>;
        let current: Box<dyn Fn() -> Option<C>> = {
            let parent = self.clone();
            let refresh = Rc::clone(&refresh);
            Box::new(move || parent.with_state(|state: &S| refresh(state)))
        };

        let core = Rc::new_cyclic(|this: &Weak<Core<C, CA>>| {
            let child = this.clone();
            let upstream = self.core.observers.subscribe(move |state: &S| {
                if let Some(child) = child.upgrade() {
                    child.refresh(state, &refresh, is_duplicate.as_deref());
                }
            });

            Core {
                kind: Kind::Scoped(Scoped {
                    state: RefCell::new(initial),
                    current,
                    valid: Cell::new(valid),
                    forward: Box::new(move |action| parent.send(embed(action))),
                    parent: status,
                    _upstream: upstream,
                }),
                observers: Observers::new(),
                children: ScopeCache::new(),
            }
        });

        match key {
            Some(key) => {
                tracing::debug!(key = ?key, "created scoped store");
                self.core.children.insert(key, &core);
            }
            None => tracing::debug!("created uncached scoped store"),
        }
        Store { core }
    }
}

impl<C: 'static, CA: 'static> Core<C, CA> {
    fn refresh<S>(
        &self,
        parent: &S,
        project: &Refresh<S, C>,
        is_duplicate: Option<&dyn Fn(&C, &C) -> bool>,
    ) {
        let Kind::Scoped(scoped) = &self.kind else {
            return;
        };
        let Some(next) = project(parent) else {
            scoped.valid.set(false);
            return;
        };
        scoped.valid.set(true);

        if is_duplicate.is_some_and(|same| same(&scoped.state.borrow(), &next)) {
            return;
        }
        *scoped.state.borrow_mut() = next;
        self.observers.notify(&scoped.state.borrow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{with_strictness, Strictness};
    use crate::effect::Effect;
    use crate::reducer::reduce_fn;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct App {
        count: i32,
        title: String,
        detail: Option<u32>,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum AppAction {
        Count(i32),
        Rename(String),
        Open(u32),
        Close,
        Detail(u32),
    }

    fn app() -> Store<App, AppAction> {
        Store::new(
            App::default(),
            reduce_fn(|app: &mut App, action: AppAction| {
                match action {
                    AppAction::Count(delta) => app.count += delta,
                    AppAction::Rename(title) => app.title = title,
                    AppAction::Open(id) => app.detail = Some(id),
                    AppAction::Close => app.detail = None,
                    AppAction::Detail(id) => {
                        if let Some(detail) = app.detail.as_mut() {
                            *detail += id;
                        }
                    }
                }
                Effect::none()
            }),
        )
    }

    fn count(app: &App) -> i32 {
        app.count
    }

    fn detail(app: &App) -> Option<u32> {
        app.detail
    }

    #[test]
    fn capture_free_scopes_are_reused() {
        let store = app();
        let first = store.scope(count, AppAction::Count);
        let second = store.scope(count, AppAction::Count);
        assert!(first.ptr_eq(&second));
        assert_eq!(store.live_children(), 1);

        drop((first, second));
        assert_eq!(store.live_children(), 0);
    }

    #[test]
    fn capturing_scopes_need_a_key() {
        let store = app();
        let offset = 10;
        let a = store.scope(move |app: &App| app.count + offset, AppAction::Count);
        let b = store.scope(move |app: &App| app.count + offset, AppAction::Count);
        assert!(!a.ptr_eq(&b));

        let project = move |app: &App| app.count + offset;
        let c = store.scope_keyed("offset", project, AppAction::Count, ScopeOptions::new());
        let d = store.scope_keyed("offset", project, AppAction::Count, ScopeOptions::new());
        assert!(c.ptr_eq(&d));
        assert_eq!(c.state(), 10);
    }

    #[test]
    fn child_sends_reach_the_parent() {
        let store = app();
        let counter = store.scope(count, AppAction::Count);

        counter.send(5);
        counter.send(-2);
        assert_eq!(counter.state(), 3);
        assert_eq!(store.with_state(|app| app.count), 3);
    }

    #[test]
    fn child_sends_while_reading_reach_the_parent() {
        let store = app();
        let counter = store.scope(count, AppAction::Count);
        let before = counter.with_state(|count| {
            counter.send(3);
            *count
        });

        assert_eq!(before, 0);
        assert_eq!(counter.state(), 3);
    }

    #[test]
    fn reads_during_a_parent_batch_see_the_new_slice() {
        let store = app();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let slot: Rc<RefCell<Option<Store<i32, i32>>>> = Rc::new(RefCell::new(None));
        let _subscription = {
            let seen = Rc::clone(&seen);
            let slot = Rc::clone(&slot);
            store.subscribe(move |app: &App| {
                if let Some(counter) = slot.borrow().as_ref() {
                    seen.borrow_mut().push((app.count, counter.state()));
                }
            })
        };
        *slot.borrow_mut() = Some(store.scope(count, AppAction::Count));

        store.send(AppAction::Count(5));
        assert_eq!(*seen.borrow(), vec![(5, 5)]);
    }

    #[test]
    fn dedup_skips_unchanged_projections() {
        let store = app();
        let counter = store.scope_with(count, AppAction::Count, ScopeOptions::new().dedup());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _subscription = {
            let seen = Rc::clone(&seen);
            counter.subscribe(move |count: &i32| seen.borrow_mut().push(*count))
        };

        store.send(AppAction::Rename("inbox".into()));
        store.send(AppAction::Count(1));
        store.send(AppAction::Rename("archive".into()));
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn without_dedup_every_batch_notifies() {
        let store = app();
        let counter = store.scope(count, AppAction::Count);
        let calls = Rc::new(Cell::new(0));
        let _subscription = {
            let calls = Rc::clone(&calls);
            counter.subscribe(move |_: &i32| calls.set(calls.get() + 1))
        };

        store.send(AppAction::Rename("inbox".into()));
        store.send(AppAction::Rename("inbox".into()));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn grandchildren_follow_the_root() {
        let store = app();
        let counter = store.scope(count, AppAction::Count);
        let doubled = counter.scope(|count: &i32| count * 2, |delta: i32| delta);

        store.send(AppAction::Count(4));
        assert_eq!(doubled.state(), 8);

        doubled.send(1);
        assert_eq!(store.with_state(|app| app.count), 5);
        assert_eq!(doubled.state(), 10);
    }

    #[test]
    fn scope_if_let_tracks_presence() {
        let store = app();
        assert!(store.scope_if_let(detail, AppAction::Detail).is_none());

        store.send(AppAction::Open(1));
        let Some(child) = store.scope_if_let(detail, AppAction::Detail) else {
            panic!("detail should be present");
        };
        child.send(2);
        assert_eq!(child.state(), 3);
        assert!(!child.is_invalid());

        store.send(AppAction::Close);
        assert!(child.is_invalid());
        assert_eq!(child.state(), 3);

        with_strictness(Strictness::Lenient, || child.send(5));
        assert_eq!(store.with_state(|app| app.detail), None);
    }

    #[test]
    #[should_panic(expected = "state no longer exists")]
    fn sending_to_invalid_scope_is_reported() {
        let store = app();
        let counter = store.scope_with(
            count,
            AppAction::Count,
            ScopeOptions::new().invalid_when(|app: &App| app.title == "closed"),
        );
        store.send(AppAction::Rename("closed".into()));
        assert!(counter.is_invalid());
        with_strictness(Strictness::Strict, || counter.send(1));
    }

    #[test]
    fn validity_returns_with_the_slice() {
        let store = app();
        let counter = store.scope_with(
            count,
            AppAction::Count,
            ScopeOptions::new().invalid_when(|app: &App| app.title == "closed"),
        );
        store.send(AppAction::Rename("closed".into()));
        assert!(counter.is_invalid());

        store.send(AppAction::Rename("open".into()));
        assert!(!counter.is_invalid());
        counter.send(2);
        assert_eq!(counter.state(), 2);
    }

    #[test]
    fn sweep_evicts_dead_entries() {
        let cache = ScopeCache::new();
        let interval = RuntimeConfig::current().scope_sweep_interval.max(1);
        for n in 1..interval {
            let temporary = Rc::new(0_u8);
            cache.insert(AnyKey::new(n), &temporary);
        }
        let kept = Rc::new(0_u8);
        cache.insert(AnyKey::new(0_usize), &kept);

        assert_eq!(cache.entries.borrow().len(), 1);
        assert_eq!(cache.live(), 1);
        assert!(cache.get::<u8>(&AnyKey::new(0_usize)).is_some());
        assert!(cache.get::<u16>(&AnyKey::new(0_usize)).is_none());
    }
}
