//! Change observers attached to a store.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

type Observer<S> = Rc<dyn Fn(&S)>;

struct ObserverList<S> {
    next_id: u64,
    entries: IndexMap<u64, Observer<S>>,
}

/// The observers of one store, notified in subscription order.
pub(crate) struct Observers<S> {
    list: Rc<RefCell<ObserverList<S>>>,
}

impl<S: 'static> Observers<S> {
    pub(crate) fn new() -> Self {
        Self {
            list: Rc::new(RefCell::new(ObserverList {
                next_id: 0,
                entries: IndexMap::new(),
            })),
        }
    }

    pub(crate) fn subscribe(&self, observer: impl Fn(&S) + 'static) -> Subscription {
        let id = {
            let mut list = self.list.borrow_mut();
            let id = list.next_id;
            list.next_id += 1;
            list.entries.insert(id, Rc::new(observer));
            id
        };

        let list: Weak<RefCell<ObserverList<S>>> = Rc::downgrade(&self.list);
        Subscription::new(move || {
            if let Some(list) = list.upgrade() {
                list.borrow_mut().entries.shift_remove(&id);
            }
        })
    }

    /// Call every observer with `state`.
    ///
    /// Observers are snapshotted first, so an observer may subscribe or
    /// unsubscribe (including itself) while being notified.
    pub(crate) fn notify(&self, state: &S) {
        let snapshot: Vec<Observer<S>> = self.list.borrow().entries.values().cloned().collect();
        for observer in snapshot {
            observer(state);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.list.borrow().entries.len()
    }
}

/// Keeps an observer registered. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Keep the observer for the lifetime of the store.
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
