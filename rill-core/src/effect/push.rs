//! Push Bridge
//!
//! Adapts callback-style sources (observers, OS notifications, channels
//! owned by another library) into an effect.
//!
//! # How Buffering Works
//!
//! The source pushes into a [`Pusher`], which appends to a queue and wakes
//! the effect. When the source outpaces the store, actions wait in the
//! queue; [`BufferPolicy`] decides whether the queue may grow without limit
//! or drops actions once it reaches a capacity.
//!
//! An unbounded bridge hands over the whole queue each time it runs. A
//! bounded bridge hands over one action and waits until the store has taken
//! it before the next, so at most `capacity` actions wait in the queue plus
//! one on its way to the reducer.
//!
//! The teardown closure returned by the subscriber runs exactly once, when
//! the effect completes or is cancelled.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::Effect;

/// How a push bridge buffers actions the store has not taken yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPolicy {
    /// Keep every action.
    #[default]
    Unbounded,
    /// Keep at most `capacity` actions, resolving overflow per `overflow`.
    Bounded { capacity: usize, overflow: Overflow },
}

/// Which action a full bounded buffer gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    DropOldest,
    DropNewest,
}

struct Queue<A> {
    actions: VecDeque<A>,
    finished: bool,
    closed: bool,
    dropped: u64,
}

struct Shared<A> {
    policy: BufferPolicy,
    queue: Mutex<Queue<A>>,
    wake: Notify,
}

/// Producer side of a push bridge. Cheap to clone and safe to share.
pub struct Pusher<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Pusher<A> {
    /// Queue `action`. Returns `false` if it was dropped, either by the
    /// buffer policy or because the effect is no longer running.
    pub fn push(&self, action: A) -> bool {
        let accepted = {
            let mut queue = self.shared.queue.lock();
            if queue.closed || queue.finished {
                return false;
            }
            match self.shared.policy {
                BufferPolicy::Unbounded => {
                    queue.actions.push_back(action);
                    true
                }
                BufferPolicy::Bounded { capacity, overflow } => {
                    if queue.actions.len() < capacity {
                        queue.actions.push_back(action);
                        true
                    } else {
                        queue.dropped += 1;
                        tracing::warn!(
                            capacity,
                            ?overflow,
                            dropped = queue.dropped,
                            "push buffer full; dropping action"
                        );
                        match overflow {
                            Overflow::DropOldest => {
                                queue.actions.pop_front();
                                queue.actions.push_back(action);
                                true
                            }
                            Overflow::DropNewest => false,
                        }
                    }
                }
            }
        };
        self.shared.wake.notify_one();
        accepted
    }

    /// Complete the effect once queued actions are delivered.
    pub fn finish(&self) {
        self.shared.queue.lock().finished = true;
        self.shared.wake.notify_one();
    }

    /// Whether the effect has stopped accepting actions.
    pub fn is_closed(&self) -> bool {
        let queue = self.shared.queue.lock();
        queue.closed || queue.finished
    }
}

impl<A> Clone for Pusher<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A> fmt::Debug for Pusher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pusher")
            .field("policy", &self.shared.policy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the queue and runs the teardown when the effect stops.
struct Teardown<A> {
    shared: Arc<Shared<A>>,
    teardown: Option<Box<dyn FnOnce()>>,
}

impl<A> Drop for Teardown<A> {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
            queue.actions.clear();
        }
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl<A: 'static> Effect<A> {
    /// Bridges a push-based source.
    ///
    /// `subscribe` is called when the effect starts. It receives a
    /// [`Pusher`] and returns a teardown closure that unsubscribes from the
    /// source.
    pub fn from_push<S, T>(policy: BufferPolicy, subscribe: S) -> Self
    where
        S: FnOnce(Pusher<A>) -> T + 'static,
        T: FnOnce() + 'static,
    {
        Self::run(move |emitter| async move {
            let shared = Arc::new(Shared {
                policy,
                queue: Mutex::new(Queue {
                    actions: VecDeque::new(),
                    finished: false,
                    closed: false,
                    dropped: 0,
                }),
                wake: Notify::new(),
            });
            let teardown = subscribe(Pusher {
                shared: Arc::clone(&shared),
            });
            let _teardown = Teardown {
                shared: Arc::clone(&shared),
                teardown: Some(Box::new(teardown)),
            };

            let bounded = matches!(policy, BufferPolicy::Bounded { .. });
            loop {
                let (batch, finished) = {
                    let mut queue = shared.queue.lock();
                    let batch: Vec<A> = if bounded {
                        queue.actions.pop_front().into_iter().collect()
                    } else {
                        queue.actions.drain(..).collect()
                    };
                    (batch, queue.finished)
                };
                let delivered = !batch.is_empty();
                for action in batch {
                    emitter.send(action);
                }
                if bounded && delivered {
                    emitter.handle().settled().await;
                    continue;
                }
                if finished && shared.queue.lock().actions.is_empty() {
                    break;
                }
                shared.wake.notified().await;
            }
            Ok(())
        })
    }
}
