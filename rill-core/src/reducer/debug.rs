//! Logging wrapper for reducers.

use std::fmt::Debug;

use super::Reducer;
use crate::diff::{diff, Diffable};
use crate::effect::Effect;

/// Logs every action it receives and the state change it caused.
///
/// Output goes to `tracing` at `debug` level under the given label, so it
/// costs nothing unless a subscriber enables it.
pub struct Debugged<R> {
    label: &'static str,
    inner: R,
}

impl<R> Debugged<R> {
    pub fn new(label: &'static str, inner: R) -> Self {
        Self { label, inner }
    }
}

impl<R> Reducer for Debugged<R>
where
    R: Reducer,
    R::State: Clone + Diffable,
    R::Action: Debug,
{
    type State = R::State;
    type Action = R::Action;

    fn reduce(&self, state: &mut Self::State, action: Self::Action) -> Effect<Self::Action> {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return self.inner.reduce(state, action);
        }

        let described = format!("{action:?}");
        let before = state.clone();
        let effect = self.inner.reduce(state, action);

        match diff(&before, &*state) {
            Some(difference) => tracing::debug!(
                label = self.label,
                action = %described,
                path = %difference.path,
                "received action\n{}",
                difference.rendered
            ),
            None => tracing::debug!(
                label = self.label,
                action = %described,
                "received action (no state change)"
            ),
        }
        effect
    }
}
