//! ID generator dependency.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::DependencyKey;

static PROCESS_IDS: AtomicU64 = AtomicU64::new(1);

/// Produces unique `u64` identifiers.
#[derive(Clone)]
pub struct IdGenerator {
    next: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl IdGenerator {
    /// IDs unique across the whole process.
    pub fn process_wide() -> Self {
        Self::new(|| PROCESS_IDS.fetch_add(1, Ordering::Relaxed))
    }

    /// `0, 1, 2, ...`, independent of every other generator.
    pub fn incrementing() -> Self {
        let counter = AtomicU64::new(0);
        Self::new(move || counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Always returns `id`.
    pub fn constant(id: u64) -> Self {
        Self::new(move || id)
    }

    pub fn new(next: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            next: Arc::new(next),
        }
    }

    pub fn next_id(&self) -> u64 {
        (self.next)()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdGenerator")
    }
}

/// Key for [`IdGenerator`]: process-wide when live, incrementing in tests.
///
/// The test default is a fresh generator per lookup, so every lookup starts
/// at zero. Register one shared generator with [`Dependencies::with`] to get
/// a sequence.
///
/// [`Dependencies::with`]: super::Dependencies::with
pub struct IdGeneratorKey;

impl DependencyKey for IdGeneratorKey {
    type Value = IdGenerator;

    fn live_value() -> Self::Value {
        IdGenerator::process_wide()
    }

    fn test_value() -> Self::Value {
        IdGenerator::incrementing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incrementing_starts_at_zero_and_shares_across_clones() {
        let ids = IdGenerator::incrementing();
        let clone = ids.clone();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(clone.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn process_wide_ids_are_unique() {
        let a = IdGenerator::process_wide();
        let b = IdGenerator::process_wide();
        assert_ne!(a.next_id(), b.next_id());
    }

    #[test]
    fn constant_repeats() {
        let ids = IdGenerator::constant(7);
        assert_eq!((ids.next_id(), ids.next_id()), (7, 7));
    }
}
