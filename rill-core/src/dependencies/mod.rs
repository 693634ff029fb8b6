//! Dependency Registry
//!
//! Effects reach services (clocks, ID generators, network clients) through
//! typed keys instead of capturing them, so tests can substitute
//! deterministic implementations without touching reducer code.
//!
//! # How Lookup Works
//!
//! A store owns a [`Dependencies`] value. While it runs its reducer, and
//! while any effect task it spawned is being polled, that value sits on a
//! thread-local stack. [`dependency`] reads the top of the stack:
//!
//! 1. An explicit override registered with [`Dependencies::with`] wins.
//! 2. Otherwise the key's `live_value` or `test_value` is used, depending
//!    on the container's [`Mode`].
//!
//! Nested scopes (a scoped override inside an effect, or a store created
//! from inside another store's effect) push onto the stack and pop when
//! their guard drops.

mod clock;
mod ids;

pub use clock::{Clock, ClockKey, ImmediateClock, TokioClock};
pub use ids::{IdGenerator, IdGeneratorKey};

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::{Error, Result};

/// A typed token naming a service.
pub trait DependencyKey: 'static {
    /// The service handle handed to callers.
    type Value: Clone + 'static;

    /// Value used in [`Mode::Live`] when nothing is overridden.
    fn live_value() -> Self::Value;

    /// Value used in [`Mode::Test`] when nothing is overridden.
    fn test_value() -> Self::Value {
        Self::live_value()
    }
}

/// Which default a key falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Test,
}

/// A set of dependency overrides plus a fallback mode.
///
/// Cloning is cheap; [`Dependencies::with`] copies the override table only
/// when it is shared.
#[derive(Clone)]
pub struct Dependencies {
    mode: Mode,
    values: Rc<HashMap<TypeId, Rc<dyn Any>>>,
    names: Rc<Vec<&'static str>>,
}

impl Dependencies {
    /// Empty container falling back to live values.
    pub fn live() -> Self {
        Self::with_mode(Mode::Live)
    }

    /// Empty container falling back to test values.
    pub fn test() -> Self {
        Self::with_mode(Mode::Test)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            values: Rc::new(HashMap::new()),
            names: Rc::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Override `K` with `value`.
    pub fn with<K: DependencyKey>(mut self, value: K::Value) -> Self {
        Rc::make_mut(&mut self.values).insert(TypeId::of::<K>(), Rc::new(value));
        let names = Rc::make_mut(&mut self.names);
        if !names.contains(&type_name::<K>()) {
            names.push(type_name::<K>());
        }
        self
    }

    /// Resolve `K`: the override if present, otherwise the mode's default.
    pub fn get<K: DependencyKey>(&self) -> K::Value {
        match self.overridden::<K>() {
            Some(value) => value,
            None => match self.mode {
                Mode::Live => K::live_value(),
                Mode::Test => K::test_value(),
            },
        }
    }

    /// Resolve `K` only if it was explicitly overridden.
    pub fn get_registered<K: DependencyKey>(&self) -> Result<K::Value> {
        self.overridden::<K>()
            .ok_or(Error::DependencyMissing(type_name::<K>()))
    }

    fn overridden<K: DependencyKey>(&self) -> Option<K::Value> {
        self.values
            .get(&TypeId::of::<K>())
            .and_then(|value| value.downcast_ref::<K::Value>())
            .cloned()
    }
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::live()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("mode", &self.mode)
            .field("overrides", &self.names)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Scoped access
// ----------------------------------------------------------------------------

thread_local! {
    static DEPENDENCY_STACK: RefCell<Vec<Dependencies>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the dependency scope when dropped.
pub(crate) struct DependencyScope {
    depth: usize,
}

impl DependencyScope {
    pub(crate) fn enter(dependencies: Dependencies) -> Self {
        let depth = DEPENDENCY_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(dependencies);
            stack.len()
        });
        Self { depth }
    }
}

impl Drop for DependencyScope {
    fn drop(&mut self) {
        DEPENDENCY_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "dependency scopes dropped out of order");
            stack.pop();
        });
    }
}

/// The dependencies in scope on this thread.
pub fn current() -> Dependencies {
    DEPENDENCY_STACK.with(|stack| stack.borrow().last().cloned().unwrap_or_default())
}

/// Resolve `K` against the dependencies in scope.
pub fn dependency<K: DependencyKey>() -> K::Value {
    DEPENDENCY_STACK.with(|stack| match stack.borrow().last() {
        Some(dependencies) => dependencies.get::<K>(),
        None => K::live_value(),
    })
}

/// Run `f` with the current dependencies modified by `configure`.
pub fn with_dependencies<R>(
    configure: impl FnOnce(Dependencies) -> Dependencies,
    f: impl FnOnce() -> R,
) -> R {
    let _scope = DependencyScope::enter(configure(current()));
    f()
}

/// Future adapter that enters a dependency scope around every poll.
pub(crate) struct WithDependencies<F> {
    dependencies: Dependencies,
    inner: F,
}

impl<F> WithDependencies<F> {
    pub(crate) fn new(dependencies: Dependencies, inner: F) -> Self {
        Self {
            dependencies,
            inner,
        }
    }
}

impl<F: Future + Unpin> Future for WithDependencies<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let _scope = DependencyScope::enter(this.dependencies.clone());
        Pin::new(&mut this.inner).poll(cx)
    }
}
