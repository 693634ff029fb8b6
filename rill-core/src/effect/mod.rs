//! Effects
//!
//! An [`Effect`] describes work a reducer wants done after it returns: zero
//! or more actions delivered over time, eventually completing (or not).
//! Effects are plain values. Nothing runs until a store starts them.
//!
//! # How Effects Run
//!
//! A store starts a returned effect in two phases:
//!
//! 1. **Synchronous prefix.** `none`, `send`, `cancel` and any merge or
//!    concatenation built only from those complete on the spot. Their
//!    actions go into the store's FIFO buffer and are reduced before
//!    `send` returns.
//!
//! 2. **Tasks.** Anything containing `run` is spawned as a local task with
//!    its own [`EffectHandle`]. The task drives the effect tree and feeds
//!    actions back through an [`Emitter`].
//!
//! # Composition
//!
//! - `merge` runs children concurrently and completes when all have.
//! - `concatenate` runs children one after another; a child starts only
//!   after the previous one has completed.
//! - `map` converts emitted actions.
//! - `cancellable` registers the effect under a [`CancelId`].
//!
//! Combining with [`Effect::none`] returns the other operand unchanged, and
//! nested merges (or concatenations) are flattened, so effect trees stay as
//! shallow as the work they describe.

mod drive;
mod emitter;
mod handle;
mod push;
mod timing;

pub use emitter::Emitter;
pub use handle::EffectHandle;
pub use push::{BufferPolicy, Overflow, Pusher};

pub(crate) use drive::drive;
pub(crate) use emitter::Sink;

/// Cancels every effect under `id` and discards any action a throttle is
/// holding for it.
pub(crate) fn cancel_id(id: &CancelId) {
    crate::cancellation::cancel(id);
    timing::clear_window(id);
}

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::LocalBoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use smallvec::SmallVec;

use crate::cancellation::CancelId;
use crate::error::is_cancellation;
use crate::issue::report_issue;

/// Scheduling hint for [`Effect::run_with_priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Start on the task's first poll.
    #[default]
    Normal,
    /// Yield once before starting, letting already-queued work go first.
    Low,
}

type Operation<A> = Box<dyn FnOnce(Emitter<A>) -> LocalBoxFuture<'static, ()>>;

type CatchHandler<A> = Box<dyn FnOnce(anyhow::Error, &Emitter<A>)>;

pub(crate) struct RunTask<A> {
    pub(crate) priority: Priority,
    pub(crate) operation: Operation<A>,
}

pub(crate) enum Work<A> {
    None,
    Send(SmallVec<[A; 1]>),
    Run(RunTask<A>),
    Merge(Vec<Effect<A>>),
    Concat(Vec<Effect<A>>),
    Cancellable {
        id: CancelId,
        cancel_in_flight: bool,
        effect: Box<Effect<A>>,
    },
    Cancel(CancelId),
}

/// A description of side-effecting work that may produce actions.
#[must_use = "effects do nothing unless returned to a store"]
pub struct Effect<A> {
    pub(crate) work: Work<A>,
}

impl<A: 'static> Effect<A> {
    /// Does nothing and completes immediately.
    pub fn none() -> Self {
        Self { work: Work::None }
    }

    /// Delivers `action` synchronously, then completes.
    pub fn send(action: A) -> Self {
        Self {
            work: Work::Send(smallvec::smallvec![action]),
        }
    }

    /// Delivers every action in order, then completes.
    pub fn send_all(actions: impl IntoIterator<Item = A>) -> Self {
        let actions: SmallVec<[A; 1]> = actions.into_iter().collect();
        if actions.is_empty() {
            Self::none()
        } else {
            Self {
                work: Work::Send(actions),
            }
        }
    }

    /// Runs `operation` as a task.
    ///
    /// The operation receives an [`Emitter`] for delivering actions. An
    /// `Err` that is not a cancellation is reported as an issue; use
    /// [`Effect::run_catching`] or [`Effect::task`] to turn failures into
    /// actions instead.
    pub fn run<F, Fut>(operation: F) -> Self
    where
        F: FnOnce(Emitter<A>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Self::build_run(Priority::Normal, operation, None)
    }

    /// [`Effect::run`] with an explicit [`Priority`].
    pub fn run_with_priority<F, Fut>(priority: Priority, operation: F) -> Self
    where
        F: FnOnce(Emitter<A>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Self::build_run(priority, operation, None)
    }

    /// [`Effect::run`] whose non-cancellation errors go to `handler`.
    pub fn run_catching<F, Fut, H>(operation: F, handler: H) -> Self
    where
        F: FnOnce(Emitter<A>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
        H: FnOnce(anyhow::Error, &Emitter<A>) + 'static,
    {
        Self::build_run(Priority::Normal, operation, Some(Box::new(handler)))
    }

    fn build_run<F, Fut>(priority: Priority, operation: F, catch: Option<CatchHandler<A>>) -> Self
    where
        F: FnOnce(Emitter<A>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let operation: Operation<A> = Box::new(move |emitter: Emitter<A>| {
            async move {
                let Err(error) = operation(emitter.clone()).await else {
                    return;
                };
                if is_cancellation(&error) || emitter.is_cancelled() {
                    tracing::trace!(handle = emitter.handle().id(), "effect stopped by cancellation");
                    return;
                }
                match catch {
                    Some(handler) => handler(error, &emitter),
                    None => report_issue(format!(
                        "An effect returned an error that was not handled: {error:#}. \
                         Catch it with Effect::run_catching or turn it into an action."
                    )),
                }
            }
            .boxed_local()
        });

        Self {
            work: Work::Run(RunTask {
                priority,
                operation,
            }),
        }
    }

    /// Runs `future` for its side effects and emits nothing.
    pub fn fire_and_forget<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = ()> + 'static,
    {
        Self::run(move |_| async move {
            future.await;
            Ok(())
        })
    }

    /// Awaits `future` and delivers its output converted by `into_action`.
    ///
    /// This is the usual way to surface fallible work: give it a future
    /// yielding a `Result` and an action that carries it.
    pub fn task<T, Fut, F>(future: Fut, into_action: F) -> Self
    where
        T: 'static,
        Fut: Future<Output = T> + 'static,
        F: FnOnce(T) -> A + 'static,
    {
        Self::run(move |emitter| async move {
            let output = future.await;
            emitter.send(into_action(output));
            Ok(())
        })
    }

    /// Delivers every item of `stream`. Cancelling the effect drops it.
    pub fn stream<St>(stream: St) -> Self
    where
        St: Stream<Item = A> + 'static,
    {
        Self::run(move |emitter| async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(action) = stream.next().await {
                emitter.send(action);
            }
            Ok(())
        })
    }

    /// Cancels every effect registered under `id` when started.
    pub fn cancel(id: impl Into<CancelId>) -> Self {
        Self {
            work: Work::Cancel(id.into()),
        }
    }

    /// Runs `self` and `other` concurrently.
    pub fn merge(self, other: Self) -> Self {
        match (self.work, other.work) {
            (Work::None, work) | (work, Work::None) => Self { work },
            (Work::Send(mut first), Work::Send(second)) => {
                first.extend(second);
                Self {
                    work: Work::Send(first),
                }
            }
            (Work::Merge(mut first), Work::Merge(second)) => {
                first.extend(second);
                Self {
                    work: Work::Merge(first),
                }
            }
            (Work::Merge(mut first), work) => {
                first.push(Self { work });
                Self {
                    work: Work::Merge(first),
                }
            }
            (work, Work::Merge(second)) => {
                let mut merged = Vec::with_capacity(second.len() + 1);
                merged.push(Self { work });
                merged.extend(second);
                Self {
                    work: Work::Merge(merged),
                }
            }
            (first, second) => Self {
                work: Work::Merge(vec![Self { work: first }, Self { work: second }]),
            },
        }
    }

    /// Merges any number of effects.
    pub fn merge_all(effects: impl IntoIterator<Item = Self>) -> Self {
        effects.into_iter().fold(Self::none(), Self::merge)
    }

    /// Runs `other` once `self` has completed.
    pub fn concatenate(self, other: Self) -> Self {
        match (self.work, other.work) {
            (Work::None, work) | (work, Work::None) => Self { work },
            (Work::Send(mut first), Work::Send(second)) => {
                first.extend(second);
                Self {
                    work: Work::Send(first),
                }
            }
            (Work::Concat(mut first), Work::Concat(second)) => {
                first.extend(second);
                Self {
                    work: Work::Concat(first),
                }
            }
            (Work::Concat(mut first), work) => {
                first.push(Self { work });
                Self {
                    work: Work::Concat(first),
                }
            }
            (work, Work::Concat(second)) => {
                let mut sequence = Vec::with_capacity(second.len() + 1);
                sequence.push(Self { work });
                sequence.extend(second);
                Self {
                    work: Work::Concat(sequence),
                }
            }
            (first, second) => Self {
                work: Work::Concat(vec![Self { work: first }, Self { work: second }]),
            },
        }
    }

    /// Concatenates any number of effects.
    pub fn concatenate_all(effects: impl IntoIterator<Item = Self>) -> Self {
        effects.into_iter().fold(Self::none(), Self::concatenate)
    }

    /// Converts every action this effect emits.
    pub fn map<B, F>(self, transform: F) -> Effect<B>
    where
        B: 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        self.map_shared(Arc::new(transform))
    }

    fn map_shared<B: 'static>(self, transform: Arc<dyn Fn(A) -> B + Send + Sync>) -> Effect<B> {
        let work = match self.work {
            Work::None => Work::None,
            Work::Send(actions) => Work::Send(actions.into_iter().map(|a| transform(a)).collect()),
            Work::Run(task) => {
                let operation = task.operation;
                Work::Run(RunTask {
                    priority: task.priority,
                    operation: Box::new(move |emitter: Emitter<B>| {
                        operation(emitter.contramap(transform))
                    }),
                })
            }
            Work::Merge(children) => Work::Merge(
                children
                    .into_iter()
                    .map(|child| child.map_shared(Arc::clone(&transform)))
                    .collect(),
            ),
            Work::Concat(children) => Work::Concat(
                children
                    .into_iter()
                    .map(|child| child.map_shared(Arc::clone(&transform)))
                    .collect(),
            ),
            Work::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => Work::Cancellable {
                id,
                cancel_in_flight,
                effect: Box::new(effect.map_shared(transform)),
            },
            Work::Cancel(id) => Work::Cancel(id),
        };
        Effect { work }
    }

    /// Registers this effect under `id` while it runs.
    ///
    /// With `cancel_in_flight`, starting it first cancels every effect
    /// already running under `id`.
    pub fn cancellable(self, id: impl Into<CancelId>, cancel_in_flight: bool) -> Self {
        if self.is_none() {
            return self;
        }
        Self {
            work: Work::Cancellable {
                id: id.into(),
                cancel_in_flight,
                effect: Box::new(self),
            },
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.work, Work::None)
    }

    /// Whether starting this effect completes it without spawning a task.
    pub(crate) fn is_synchronous(&self) -> bool {
        match &self.work {
            Work::None | Work::Send(_) | Work::Cancel(_) => true,
            Work::Run(_) => false,
            Work::Merge(children) | Work::Concat(children) => {
                children.iter().all(Self::is_synchronous)
            }
            Work::Cancellable { effect, .. } => effect.is_synchronous(),
        }
    }
}

impl<A: 'static> Default for Effect<A> {
    fn default() -> Self {
        Self::none()
    }
}

impl<A: fmt::Debug> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.work {
            Work::None => f.write_str("Effect::None"),
            Work::Send(actions) => f.debug_tuple("Effect::Send").field(actions).finish(),
            Work::Run(task) => f
                .debug_struct("Effect::Run")
                .field("priority", &task.priority)
                .finish_non_exhaustive(),
            Work::Merge(children) => f.debug_tuple("Effect::Merge").field(children).finish(),
            Work::Concat(children) => f.debug_tuple("Effect::Concat").field(children).finish(),
            Work::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => f
                .debug_struct("Effect::Cancellable")
                .field("id", id)
                .field("cancel_in_flight", cancel_in_flight)
                .field("effect", effect)
                .finish(),
            Work::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{with_strictness, Strictness};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// An emitter that appends to a shared log, for driving effects directly.
    pub(crate) fn recorder<A: Send + 'static>() -> (Emitter<A>, Arc<Mutex<Vec<A>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&log);
        let emitter = Emitter::new(
            Arc::new(move |action, _: &EffectHandle| sink_log.lock().push(action)),
            EffectHandle::new(),
        );
        (emitter, log)
    }

    fn after(ms: u64, action: u32) -> Effect<u32> {
        Effect::run(move |emitter| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            emitter.send(action);
            Ok(())
        })
    }

    #[test]
    fn none_is_elided_by_combinators() {
        let merged = Effect::none().merge(Effect::send(1)).merge(Effect::none());
        assert!(matches!(merged.work, Work::Send(ref a) if a.as_slice() == [1]));

        let concatenated = Effect::<u32>::none().concatenate(Effect::none());
        assert!(concatenated.is_none());

        assert!(Effect::<u32>::none().cancellable("id", true).is_none());
        assert!(Effect::<u32>::send_all([]).is_none());
    }

    #[test]
    fn nested_merges_flatten() {
        let effect = after(1, 1).merge(after(2, 2)).merge(after(3, 3).merge(after(4, 4)));
        match effect.work {
            Work::Merge(children) => assert_eq!(children.len(), 4),
            _ => panic!("expected a flat merge"),
        }
    }

    #[test]
    fn synchronous_sends_coalesce_in_order() {
        let effect = Effect::concatenate_all([Effect::send(1), Effect::send(2), Effect::send(3)]);
        assert!(matches!(effect.work, Work::Send(ref a) if a.as_slice() == [1, 2, 3]));
    }

    #[test]
    fn synchronous_classification() {
        assert!(Effect::<u32>::none().is_synchronous());
        assert!(Effect::send(1).merge(Effect::cancel("x")).is_synchronous());
        assert!(!after(1, 1).is_synchronous());
        assert!(!Effect::send(1).concatenate(after(1, 2)).is_synchronous());
        assert!(!after(1, 1).cancellable("x", false).is_synchronous());
    }

    #[test]
    fn map_converts_sent_actions() {
        let effect = Effect::send_all([1, 2]).map(|n: u32| n * 10);
        assert!(matches!(effect.work, Work::Send(ref a) if a.as_slice() == [10, 20]));
    }

    #[tokio::test(start_paused = true)]
    async fn merge_interleaves_by_arrival() {
        let (emitter, log) = recorder();
        drive(after(20, 1).merge(after(10, 2)), emitter).await;
        assert_eq!(*log.lock(), vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn concatenate_waits_for_each_child() {
        let (emitter, log) = recorder();
        drive(after(20, 1).concatenate(after(10, 2)), emitter).await;
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn map_applies_to_running_effects() {
        let (emitter, log) = recorder();
        drive(after(0, 4).map(|n| format!("got {n}")), emitter).await;
        assert_eq!(*log.lock(), vec!["got 4".to_string()]);
    }

    #[tokio::test]
    async fn task_delivers_result_shaped_action() {
        let (emitter, log) = recorder::<Result<u32, String>>();
        let effect = Effect::task(async { Err::<u32, _>("offline".to_string()) }, |result| result);
        drive(effect, emitter).await;
        assert_eq!(*log.lock(), vec![Err("offline".to_string())]);
    }

    #[tokio::test]
    async fn stream_delivers_every_item() {
        let (emitter, log) = recorder();
        drive(Effect::stream(futures_util::stream::iter([1, 2, 3])), emitter).await;
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn caught_errors_reach_the_handler() {
        let (emitter, log) = recorder();
        let effect = Effect::run_catching(
            |_| async { Err::<(), _>(anyhow::anyhow!("boom")) },
            |error, emitter: &Emitter<String>| emitter.send(error.to_string()),
        );
        drive(effect, emitter).await;
        assert_eq!(*log.lock(), vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn cancellation_errors_are_not_reported() {
        let (emitter, log) = recorder::<u32>();
        let effect = Effect::run(|_| async { Err(crate::Error::Cancelled.into()) });
        with_strictness(Strictness::Strict, || {
            futures_util::FutureExt::now_or_never(drive(effect, emitter))
        });
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    #[should_panic(expected = "not handled: boom")]
    async fn unhandled_errors_are_reported() {
        let (emitter, _log) = recorder::<u32>();
        let effect = Effect::run(|_| async { Err::<(), _>(anyhow::anyhow!("boom")) });
        with_strictness(Strictness::Strict, || {
            futures_util::FutureExt::now_or_never(drive(effect, emitter))
        });
    }

    #[test]
    fn debug_shows_structure() {
        let effect = Effect::send(1).merge(after(1, 2)).cancellable("load", true);
        let rendered = format!("{effect:?}");
        assert!(rendered.starts_with("Effect::Cancellable"));
        assert!(rendered.contains("Effect::Send([1])"));
        assert!(rendered.contains("Effect::Run"));
    }
}
