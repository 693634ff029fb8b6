//! Rill Core
//!
//! This crate provides the core runtime for Rill, a unidirectional
//! state-management architecture. It implements:
//!
//! - Effects: composable, cancellable descriptions of asynchronous work
//! - A process-wide cancellation registry keyed by arbitrary hashable IDs
//! - Stores that serialize every state mutation through a reducer
//! - Scoped stores presenting a slice of a parent store
//! - A dependency registry with scoped overrides for tests
//! - A test harness that asserts every state change and effect action
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `effect`: The `Effect` value, its combinators and the task interpreter
//! - `cancellation`: The registry behind `Effect::cancellable`
//! - `store`: The send loop, observers and scoped stores
//! - `reducer`: The `Reducer` trait and composition helpers
//! - `dependencies`: Typed service lookup for reducers and effects
//! - `testing`: `TestStore`, `Exhaustivity`
//! - `diff`: Structural diffs used in failures and debug logging
//!
//! # Example
//!
//! ```rust
//! use rill_core::{reduce_fn, Effect, Store};
//!
//! #[derive(Debug)]
//! enum Action {
//!     Increment,
//!     Decrement,
//! }
//!
//! let store = Store::new(
//!     0_i32,
//!     reduce_fn(|count: &mut i32, action: Action| {
//!         match action {
//!             Action::Increment => *count += 1,
//!             Action::Decrement => *count -= 1,
//!         }
//!         Effect::none()
//!     }),
//! );
//!
//! store.send(Action::Increment);
//! store.send(Action::Increment);
//! store.send(Action::Decrement);
//! assert_eq!(store.state(), 1);
//! ```

pub mod cancellation;
pub mod config;
pub mod dependencies;
pub mod diff;
pub mod effect;
pub mod error;
pub mod issue;
pub mod key;
pub mod reducer;
pub mod store;
pub mod testing;

pub use cancellation::CancelId;
pub use config::{RuntimeConfig, Strictness};
pub use dependencies::{dependency, Dependencies, DependencyKey};
pub use diff::{diff, Diffable};
pub use effect::{Effect, EffectHandle, Emitter, Priority};
pub use error::{Error, Result};
pub use issue::report_issue;
pub use reducer::{
    reduce_fn, CasePath, Combined, Debugged, ForEach, IfLet, Reducer, ReducerExt, Scope,
};
pub use store::{ScopeOptions, Store, StoreTask, Subscription};
pub use testing::{Exhaustivity, TestStore};
