//! The sink handed to running effect operations.

use std::fmt;
use std::sync::Arc;

use super::EffectHandle;

pub(crate) type Sink<A> = Arc<dyn Fn(A, &EffectHandle) + Send + Sync>;

/// Feeds actions from a running effect back into its store.
///
/// An `Emitter` may be cloned and moved to any thread; actions are marshalled
/// onto the store's own context before they are reduced. Once the owning
/// effect is cancelled, [`Emitter::send`] does nothing.
pub struct Emitter<A> {
    sink: Sink<A>,
    handle: EffectHandle,
}

impl<A: 'static> Emitter<A> {
    pub(crate) fn new(sink: Sink<A>, handle: EffectHandle) -> Self {
        Self { sink, handle }
    }

    /// Deliver `action` to the store.
    pub fn send(&self, action: A) {
        if self.handle.is_cancelled() {
            tracing::trace!(handle = self.handle.id(), "dropping action from cancelled effect");
            return;
        }
        if self.handle.is_finished() {
            tracing::warn!(
                handle = self.handle.id(),
                "emitter used after its effect completed; deliver actions before returning"
            );
        }
        (self.sink)(action, &self.handle);
    }

    /// Whether the effect that owns this emitter has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub(crate) fn handle(&self) -> &EffectHandle {
        &self.handle
    }

    /// Same sink, attributed to `handle`.
    pub(crate) fn with_handle(&self, handle: EffectHandle) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            handle,
        }
    }

    /// Same handle, different destination.
    pub(crate) fn with_sink(&self, sink: Sink<A>) -> Self {
        Self {
            sink,
            handle: self.handle.clone(),
        }
    }

    /// An emitter of `B` that converts through `transform` before sending.
    pub(crate) fn contramap<B: 'static>(
        &self,
        transform: Arc<dyn Fn(B) -> A + Send + Sync>,
    ) -> Emitter<B> {
        let sink = Arc::clone(&self.sink);
        Emitter {
            sink: Arc::new(move |action: B, origin: &EffectHandle| sink(transform(action), origin)),
            handle: self.handle.clone(),
        }
    }
}

impl<A> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            handle: self.handle.clone(),
        }
    }
}

impl<A> fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").field("handle", &self.handle).finish()
    }
}
