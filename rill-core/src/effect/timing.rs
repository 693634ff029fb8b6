//! Timing Operators
//!
//! `delay`, `debounce` and `throttle` read time from the [`ClockKey`]
//! dependency at the moment they run, so a store configured with a test
//! clock (or a tokio runtime with paused time) controls them fully.
//!
//! # Throttle Windows
//!
//! Throttling is keyed by cancellation ID and spans effects: each throttled
//! effect returned for the same ID cancels the previous one and consults a
//! process-wide window table to decide whether its action goes out now or
//! when the current window closes. With `latest = false`, the first action
//! seen during a window is the one eventually delivered.
//!
//! A held action belongs to the window it arrived in and is discarded once
//! that window closes without delivering it. `Effect::cancel` removes the
//! window for its ID, held action included.

use std::any::Any;
use std::sync::OnceLock;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{drive, Effect, EffectHandle};
use crate::cancellation::CancelId;
use crate::dependencies::{dependency, ClockKey};

struct Window {
    opened: Instant,
    interval: Duration,
    pending: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Window {
    fn open(now: Instant, interval: Duration) -> Self {
        Self {
            opened: now,
            interval,
            pending: Mutex::new(None),
        }
    }

    fn is_closed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.opened) >= self.interval
    }
}

static WINDOWS: OnceLock<DashMap<CancelId, Window>> = OnceLock::new();

fn windows() -> &'static DashMap<CancelId, Window> {
    WINDOWS.get_or_init(DashMap::new)
}

enum Pace<A> {
    Now(A),
    After(Duration, A),
}

fn pace<A: Clone + Send + 'static>(
    id: &CancelId,
    interval: Duration,
    latest: bool,
    value: A,
    now: Instant,
) -> Pace<A> {
    match windows().entry(id.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(Window::open(now, interval));
            Pace::Now(value)
        }
        Entry::Occupied(mut slot) => {
            let window = slot.get_mut();
            window.interval = interval;
            if window.is_closed(now) {
                *window = Window::open(now, interval);
                return Pace::Now(value);
            }

            let pending = window.pending.get_mut();
            let value = if latest {
                value
            } else {
                pending
                    .as_ref()
                    .and_then(|held| held.downcast_ref::<A>())
                    .cloned()
                    .unwrap_or(value)
            };
            *pending = Some(Box::new(value.clone()));
            let elapsed = now.saturating_duration_since(window.opened);
            Pace::After(interval.saturating_sub(elapsed), value)
        }
    }
}

fn reopen(id: &CancelId, now: Instant) {
    if let Some(mut window) = windows().get_mut(id) {
        window.opened = now;
        *window.pending.get_mut() = None;
    }
}

/// Discards the throttle window under `id`, along with any held action.
pub(crate) fn clear_window(id: &CancelId) {
    if windows().remove(id).is_some() {
        tracing::trace!(?id, "cleared throttle window");
    }
}

impl<A: 'static> Effect<A> {
    /// Waits `duration` on the clock dependency, emitting nothing.
    fn sleep(duration: Duration) -> Self {
        Self::run(move |_| async move {
            dependency::<ClockKey>().sleep(duration).await;
            Ok(())
        })
    }

    /// Starts this effect after `duration`.
    pub fn delay(self, duration: Duration) -> Self {
        if self.is_none() {
            return self;
        }
        Self::sleep(duration).concatenate(self)
    }

    /// Starts this effect after `duration` unless another effect is
    /// debounced under `id` first, in which case this one is cancelled.
    pub fn debounce(self, id: impl Into<CancelId>, duration: Duration) -> Self {
        self.delay(duration).cancellable(id, true)
    }

    /// Delivers at most one action per `interval` for effects under `id`.
    ///
    /// With `latest`, the most recent action of a window is delivered;
    /// otherwise the first.
    pub fn throttle(self, id: impl Into<CancelId>, interval: Duration, latest: bool) -> Self
    where
        A: Clone + Send,
    {
        if self.is_none() {
            return self;
        }
        let id = id.into();
        let window_id = id.clone();

        Self::run(move |emitter| async move {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let upstream = drive(
                self,
                emitter.with_sink(std::sync::Arc::new(move |action: A, _: &EffectHandle| {
                    let _ = tx.send(action);
                })),
            );

            let relay = async {
                let clock = dependency::<ClockKey>();
                while let Some(action) = rx.recv().await {
                    match pace(&window_id, interval, latest, action, clock.now()) {
                        Pace::Now(action) => emitter.send(action),
                        Pace::After(wait, action) => {
                            clock.sleep(wait).await;
                            reopen(&window_id, clock.now());
                            emitter.send(action);
                        }
                    }
                }
            };

            futures_util::future::join(upstream, relay).await;
            Ok(())
        })
        .cancellable(id, true)
    }
}
