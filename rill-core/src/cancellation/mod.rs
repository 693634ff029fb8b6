//! Cancellation Registry
//!
//! A process-wide map from [`CancelId`] to the handles of effects that were
//! made cancellable under that ID.
//!
//! # Locking
//!
//! The map sits behind a single mutex that is held only while the map is
//! mutated. Handles are always cancelled after the lock is released, so an
//! effect that reacts to its own cancellation by touching the registry can
//! never deadlock.
//!
//! # Lifetime of Entries
//!
//! `register` returns a [`Registration`] guard. The guard lives inside the
//! effect's future and removes its entry when dropped, which happens on
//! natural completion as well as on cancellation. Empty buckets are removed
//! so the map does not grow with the number of IDs ever used.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::OnceLock;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::effect::EffectHandle;
use crate::key::AnyKey;

/// Token grouping effects for cancellation.
///
/// Any `Hash + Eq + Debug` value works; string and integer literals convert
/// directly.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CancelId(AnyKey);

impl CancelId {
    /// Wrap any hashable value as a cancellation ID.
    pub fn new<T>(value: T) -> Self
    where
        T: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        Self(AnyKey::new(value))
    }
}

impl fmt::Debug for CancelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelId({:?})", self.0)
    }
}

impl From<&'static str> for CancelId {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CancelId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<u64> for CancelId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

type Bucket = SmallVec<[EffectHandle; 2]>;

static REGISTRY: OnceLock<Mutex<HashMap<CancelId, Bucket>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<CancelId, Bucket>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Removes a handle from the registry when dropped.
#[must_use = "dropping the registration deregisters the handle"]
pub struct Registration {
    id: CancelId,
    handle_id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        deregister(&self.id, self.handle_id);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("handle", &self.handle_id)
            .finish()
    }
}

/// Register `handle` under `id`.
///
/// With `cancel_in_flight`, every handle already under `id` is removed and
/// cancelled first, so only the newest registration survives.
pub fn register(id: CancelId, handle: EffectHandle, cancel_in_flight: bool) -> Registration {
    let handle_id = handle.id();
    let displaced = {
        let mut map = registry().lock();
        let bucket = map.entry(id.clone()).or_default();
        let displaced = if cancel_in_flight {
            std::mem::take(bucket)
        } else {
            Bucket::new()
        };
        bucket.push(handle);
        displaced
    };

    tracing::trace!(?id, handle = handle_id, cancel_in_flight, "registered effect");
    for handle in displaced {
        handle.cancel();
    }

    Registration { id, handle_id }
}

/// Cancel every effect registered under `id`. A no-op when none exist.
pub fn cancel(id: &CancelId) {
    let bucket = registry().lock().remove(id);
    match bucket {
        Some(handles) => {
            tracing::debug!(?id, count = handles.len(), "cancelling effects");
            for handle in handles {
                handle.cancel();
            }
        }
        None => tracing::trace!(?id, "cancel with no registered effects"),
    }
}

/// Number of live registrations under `id`.
pub fn registered(id: &CancelId) -> usize {
    registry().lock().get(id).map_or(0, SmallVec::len)
}

fn deregister(id: &CancelId, handle_id: u64) {
    let mut map = registry().lock();
    if let Some(bucket) = map.get_mut(id) {
        bucket.retain(|handle| handle.id() != handle_id);
        if bucket.is_empty() {
            map.remove(id);
        }
    }
}
