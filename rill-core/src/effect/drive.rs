//! Async interpreter for effect trees.
//!
//! `drive` runs an effect to completion inside a task, delivering actions
//! through the given emitter. Nested cancellable effects get a child handle
//! of the emitter's handle, so cancelling the task also stops them while
//! cancelling their ID stops only them.

use futures_util::future::{abortable, join_all, LocalBoxFuture};
use futures_util::FutureExt;

use super::{Effect, Emitter, Priority, Work};
use crate::cancellation;

pub(crate) fn drive<A: 'static>(effect: Effect<A>, emitter: Emitter<A>) -> LocalBoxFuture<'static, ()> {
    async move {
        match effect.work {
            Work::None => {}
            Work::Send(actions) => {
                for action in actions {
                    emitter.send(action);
                }
            }
            Work::Run(task) => {
                if task.priority == Priority::Low {
                    tokio::task::yield_now().await;
                }
                (task.operation)(emitter).await;
            }
            Work::Merge(children) => {
                join_all(children.into_iter().map(|child| drive(child, emitter.clone()))).await;
            }
            Work::Concat(children) => {
                for child in children {
                    drive(child, emitter.clone()).await;
                }
            }
            Work::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => {
                let handle = emitter.handle().child();
                let _registration = cancellation::register(id, handle.clone(), cancel_in_flight);
                let _finished = handle.finish_guard();

                let (future, abort) = abortable(drive(*effect, emitter.with_handle(handle.clone())));
                handle.set_abort(abort);
                if future.await.is_err() {
                    tracing::trace!(handle = handle.id(), "cancellable effect aborted");
                }
            }
            Work::Cancel(id) => super::cancel_id(&id),
        }
    }
    .boxed_local()
}
