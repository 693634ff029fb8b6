//! Reducers
//!
//! A reducer mutates state in place for one action and returns the
//! [`Effect`] describing any follow-up work. Reducers are the only place
//! where state changes, and a store never runs two reductions at once.
//!
//! # Composition
//!
//! Larger features are built from smaller reducers:
//!
//! - [`Scope`] runs a child reducer on a field of the parent state, for
//!   the parent actions a [`CasePath`] recognises as child actions.
//! - [`IfLet`] does the same for optional child state.
//! - [`ForEach`] runs it on one element of an ID-keyed collection.
//! - [`Combined`] runs two reducers over the same state in order.
//! - [`Debugged`] logs every action and the state diff it caused.
//!
//! ```rust,ignore
//! let app = Scope::new(|s: &mut App| &mut s.counter, case_path!(AppAction::Counter), counter())
//!     .combine(reduce_fn(app_core))
//!     .debug("app");
//! ```

mod case_path;
mod debug;
mod scope;

pub use case_path::CasePath;
pub use debug::Debugged;
pub use scope::{ForEach, IfLet, Scope};

use std::marker::PhantomData;

use crate::effect::Effect;

/// Transforms state in response to actions.
pub trait Reducer {
    /// The state this reducer operates on.
    type State;

    /// The actions this reducer handles.
    type Action;

    /// Apply `action` to `state` and return follow-up work.
    ///
    /// Must not block or perform I/O; anything asynchronous belongs in the
    /// returned effect.
    fn reduce(&self, state: &mut Self::State, action: Self::Action) -> Effect<Self::Action>;
}

/// A reducer backed by a function or closure. Built by [`reduce_fn`].
pub struct ReduceFn<S, A, F> {
    reduce: F,
    _marker: PhantomData<fn(&mut S, A)>,
}

/// Wrap a function as a [`Reducer`].
pub fn reduce_fn<S, A, F>(reduce: F) -> ReduceFn<S, A, F>
where
    F: Fn(&mut S, A) -> Effect<A>,
{
    ReduceFn {
        reduce,
        _marker: PhantomData,
    }
}

impl<S, A, F> Reducer for ReduceFn<S, A, F>
where
    F: Fn(&mut S, A) -> Effect<A>,
{
    type State = S;
    type Action = A;

    fn reduce(&self, state: &mut S, action: A) -> Effect<A> {
        (self.reduce)(state, action)
    }
}

impl<R: Reducer + ?Sized> Reducer for Box<R> {
    type State = R::State;
    type Action = R::Action;

    fn reduce(&self, state: &mut Self::State, action: Self::Action) -> Effect<Self::Action> {
        (**self).reduce(state, action)
    }
}

/// Runs `first` then `second`, merging their effects.
pub struct Combined<R1, R2> {
    first: R1,
    second: R2,
}

impl<R1, R2> Reducer for Combined<R1, R2>
where
    R1: Reducer,
    R2: Reducer<State = R1::State, Action = R1::Action>,
    R1::Action: Clone + 'static,
{
    type State = R1::State;
    type Action = R1::Action;

    fn reduce(&self, state: &mut Self::State, action: Self::Action) -> Effect<Self::Action> {
        let first = self.first.reduce(state, action.clone());
        let second = self.second.reduce(state, action);
        first.merge(second)
    }
}

/// Combinators available on every reducer.
pub trait ReducerExt: Reducer + Sized {
    /// Run `self`, then `other`, on every action.
    fn combine<R>(self, other: R) -> Combined<Self, R>
    where
        R: Reducer<State = Self::State, Action = Self::Action>,
    {
        Combined {
            first: self,
            second: other,
        }
    }

    /// Log each action and the resulting state diff under `label`.
    fn debug(self, label: &'static str) -> Debugged<Self> {
        Debugged::new(label, self)
    }
}

impl<R: Reducer> ReducerExt for R {}
