//! Test Harness
//!
//! [`TestStore`] runs a reducer in a real [`Store`] and makes a test assert
//! every step of what happens:
//!
//! - each sent action, together with the exact state change it causes,
//! - each action an effect feeds back, in order, with its state change,
//! - that no effect is still running when the test ends.
//!
//! Anything left unasserted fails the test, so a passing test is a complete
//! account of the feature's behavior.
//!
//! # How It Works
//!
//! The reducer under test is wrapped so that every action is tagged as sent
//! by the test or received from an effect, and the state after each one is
//! recorded. `send` compares the recorded state against the last asserted
//! state with the caller's update applied. `receive` waits (on tokio time,
//! so paused clocks advance on their own) until an effect action has been
//! recorded, then compares both the action and the state it produced.
//!
//! Issues reported while the harness is alive (an effect error nobody
//! caught, a send to an invalid scoped store) are captured and turned into
//! failures at the next assertion, including those raised inside effect
//! tasks.
//!
//! Effects run on `spawn_local`, so async tests drive the harness inside a
//! [`tokio::task::LocalSet`].
//!
//! # Exhaustivity
//!
//! With [`Exhaustivity::Off`] the harness checks only what a test mentions.
//! An update closure is applied to the actual state and must not change it,
//! so it asserts the fields it sets and nothing else. `receive` skips ahead to
//! the first matching action, sends drop received actions nobody asserted,
//! and effects still running at the end are cancelled quietly. Reported
//! issues fail the test in both modes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RuntimeConfig;
use crate::dependencies::Dependencies;
use crate::diff::{diff, diff_debug, Diffable};
use crate::effect::Effect;
use crate::error::{Error, Result};
use crate::issue::IssueCapture;
use crate::reducer::Reducer;
use crate::store::{Store, StoreTask};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How completely a [`TestStore`] requires a test to account for behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exhaustivity {
    /// Every state change, received action and running effect is asserted.
    #[default]
    On,
    /// Only what the test mentions is asserted.
    Off,
}

struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    fn check(&self) -> Result<()> {
        if Instant::now() >= self.at {
            return Err(Error::Timeout(self.timeout));
        }
        Ok(())
    }
}

enum Step<A> {
    Sent(A),
    Received(A),
}

struct Received<A, S> {
    action: A,
    state: S,
    described: String,
}

struct Log<S, A> {
    sent: Option<S>,
    received: VecDeque<Received<A, S>>,
}

impl<S, A> Log<S, A> {
    fn new() -> Self {
        Self {
            sent: None,
            received: VecDeque::new(),
        }
    }
}

type SharedLog<S, A> = Rc<RefCell<Log<S, A>>>;

/// Records the state after every action the inner reducer handles.
struct Recording<R: Reducer> {
    inner: R,
    log: SharedLog<R::State, R::Action>,
}

impl<R> Reducer for Recording<R>
where
    R: Reducer,
    R::State: Clone,
    R::Action: Clone + Debug + 'static,
{
    type State = R::State;
    type Action = Step<R::Action>;

    fn reduce(&self, state: &mut Self::State, step: Self::Action) -> Effect<Self::Action> {
        let effect = match step {
            Step::Sent(action) => {
                let effect = self.inner.reduce(state, action);
                self.log.borrow_mut().sent = Some(state.clone());
                effect
            }
            Step::Received(action) => {
                let described = format!("{action:?}");
                let effect = self.inner.reduce(state, action.clone());
                self.log.borrow_mut().received.push_back(Received {
                    action,
                    state: state.clone(),
                    described,
                });
                effect
            }
        };
        effect.map(Step::Received)
    }
}

/// A store that checks every state change and effect action.
pub struct TestStore<S: 'static, A: 'static> {
    store: Store<S, Step<A>>,
    log: SharedLog<S, A>,
    expected: S,
    timeout: Duration,
    exhaustivity: Exhaustivity,
    issues: IssueCapture,
}

impl<S, A> TestStore<S, A>
where
    S: Clone + PartialEq + Diffable + 'static,
    A: Clone + PartialEq + Debug + Send + 'static,
{
    /// Create a harness whose dependencies use their test values.
    pub fn new<R>(initial: S, reducer: R) -> Self
    where
        R: Reducer<State = S, Action = A> + 'static,
    {
        Self::with_dependencies(initial, reducer, |dependencies| dependencies)
    }

    /// Create a harness, overriding test dependencies with `configure`.
    pub fn with_dependencies<R>(
        initial: S,
        reducer: R,
        configure: impl FnOnce(Dependencies) -> Dependencies,
    ) -> Self
    where
        R: Reducer<State = S, Action = A> + 'static,
    {
        let log = Rc::new(RefCell::new(Log::new()));
        let recording = Recording {
            inner: reducer,
            log: Rc::clone(&log),
        };
        let dependencies = configure(Dependencies::test());

        Self {
            store: Store::with_dependencies(initial.clone(), recording, dependencies),
            log,
            expected: initial,
            timeout: RuntimeConfig::current().test_timeout(),
            exhaustivity: Exhaustivity::On,
            issues: IssueCapture::begin(),
        }
    }

    /// How long `receive` and `finish` wait before failing.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Switch between exhaustive and partial assertions.
    pub fn with_exhaustivity(mut self, exhaustivity: Exhaustivity) -> Self {
        self.exhaustivity = exhaustivity;
        self
    }

    /// Send `action` and assert the resulting state equals the last asserted
    /// state with `update` applied.
    #[track_caller]
    pub fn send(&mut self, action: A, update: impl FnOnce(&mut S)) -> StoreTask {
        self.send_step(action, Some(update))
    }

    /// Send `action` and assert that it leaves the state unchanged.
    #[track_caller]
    pub fn send_unchanged(&mut self, action: A) -> StoreTask {
        self.send_step(action, None::<fn(&mut S)>)
    }

    /// Wait for the next effect action, assert it equals `expected`, and
    /// assert its state change like [`TestStore::send`].
    pub async fn receive(&mut self, expected: A, update: impl FnOnce(&mut S)) {
        self.receive_step(expected, Some(update)).await;
    }

    /// Wait for the next effect action and assert it left state unchanged.
    pub async fn receive_unchanged(&mut self, expected: A) {
        self.receive_step(expected, None::<fn(&mut S)>).await;
    }

    /// Wait until no effect is running and no action is in transit.
    pub async fn finish(&mut self) {
        let deadline = Deadline::after(self.timeout);
        loop {
            self.check_issues();
            if !self.store.has_pending_work() {
                return;
            }
            if let Err(error) = deadline.check() {
                fail(format!(
                    "Expected effects to finish, but there are still effects in-flight \
                     ({} running, {error}).",
                    self.store.in_flight_effects()
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Discard received actions nobody asserted and accept the current state.
    pub fn skip_received_actions(&mut self) {
        let skipped = {
            let mut log = self.log.borrow_mut();
            let skipped = log.received.len();
            log.received.clear();
            skipped
        };
        tracing::debug!(skipped, "skipping received actions");
        self.expected = self.store.state();
    }

    /// Cancel every effect still running.
    pub fn skip_in_flight_effects(&mut self) {
        tracing::debug!(
            running = self.store.in_flight_effects(),
            "skipping in-flight effects"
        );
        self.store.cancel_effects();
    }

    /// The store's current state.
    pub fn state(&self) -> S {
        self.store.state()
    }

    /// Number of effect tasks still running.
    pub fn in_flight_effects(&self) -> usize {
        self.store.in_flight_effects()
    }

    #[track_caller]
    fn send_step(&mut self, action: A, update: Option<impl FnOnce(&mut S)>) -> StoreTask {
        self.check_issues();
        let unhandled = unhandled(&self.log);
        if self.exhaustivity == Exhaustivity::Off {
            if !unhandled.is_empty() {
                tracing::debug!(skipped = unhandled.len(), "skipping unasserted received actions");
                self.log.borrow_mut().received.clear();
            }
        } else if !unhandled.is_empty() {
            fail(format!(
                "Must handle {} received actions before sending an action:\n{}",
                unhandled.len(),
                unhandled.join("\n")
            ));
        }

        let described = format!("{action:?}");
        let task = self.store.send(Step::Sent(action));
        let recorded = self.log.borrow_mut().sent.take();
        let Some(actual) = recorded else {
            fail(format!("The store did not process {described}."));
        };
        self.expect_state(&described, actual, update);
        self.check_issues();
        task
    }

    async fn receive_step(&mut self, expected: A, update: Option<impl FnOnce(&mut S)>) {
        let next = match self.exhaustivity {
            Exhaustivity::On => self.next_received().await,
            Exhaustivity::Off => self.next_matching(&expected).await,
        };
        let Received {
            action,
            state,
            described,
        } = next;

        if action != expected {
            fail(format!(
                "Received unexpected action:\n\n  (Expected: −, Received: +)\n{}",
                diff_debug(&expected, &action)
            ));
        }
        self.expect_state(&described, state, update);
    }

    async fn next_received(&mut self) -> Received<A, S> {
        let deadline = Deadline::after(self.timeout);
        loop {
            self.check_issues();
            let next = self.log.borrow_mut().received.pop_front();
            if let Some(received) = next {
                return received;
            }
            if !self.store.has_pending_work() {
                fail("Expected to receive an action, but received none.");
            }
            if let Err(error) = deadline.check() {
                fail(format!(
                    "Expected to receive an action, but received none ({error}). \
                     {} effects are still in-flight.",
                    self.store.in_flight_effects()
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Skips received actions up to the first one equal to `expected`.
    async fn next_matching(&mut self, expected: &A) -> Received<A, S> {
        let deadline = Deadline::after(self.timeout);
        loop {
            self.check_issues();
            let found = {
                let mut log = self.log.borrow_mut();
                let position = log.received.iter().position(|received| received.action == *expected);
                position.and_then(|position| {
                    if position > 0 {
                        tracing::debug!(skipped = position, "skipping received actions");
                    }
                    log.received.drain(..=position).last()
                })
            };
            if let Some(received) = found {
                return received;
            }
            if !self.store.has_pending_work() {
                fail(format!(
                    "Expected to receive {expected:?}, but it was never received."
                ));
            }
            if let Err(error) = deadline.check() {
                fail(format!(
                    "Expected to receive {expected:?}, but it was never received ({error})."
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    #[track_caller]
    fn expect_state(&mut self, described: &str, actual: S, update: Option<impl FnOnce(&mut S)>) {
        if self.exhaustivity == Exhaustivity::Off {
            self.expect_partial_state(described, actual, update);
            return;
        }

        let mut expected = self.expected.clone();
        let modified = match update {
            Some(update) => {
                update(&mut expected);
                true
            }
            None => false,
        };

        if expected != actual {
            let headline = if modified {
                "A state change does not match expectation"
            } else {
                "State was not expected to change, but a change occurred"
            };
            let detail = diff(&expected, &actual)
                .map(|difference| difference.to_string())
                .unwrap_or_default();
            fail(format!("{headline} after {described}: {detail}"));
        }
        if modified && expected == self.expected {
            fail(format!(
                "Expected state to change, but no change occurred after {described}. \
                 The update made no observable change to state; use the `_unchanged` \
                 variant when none is expected."
            ));
        }
        self.expected = actual;
    }

    /// The update must hold for the actual state: applying it changes nothing.
    #[track_caller]
    fn expect_partial_state(&mut self, described: &str, actual: S, update: Option<impl FnOnce(&mut S)>) {
        if let Some(update) = update {
            let mut expected = actual.clone();
            update(&mut expected);
            if expected != actual {
                let detail = diff(&expected, &actual)
                    .map(|difference| difference.to_string())
                    .unwrap_or_default();
                fail(format!(
                    "A state change does not match expectation after {described}: {detail}"
                ));
            }
        }
        self.expected = actual;
    }

    #[track_caller]
    fn check_issues(&self) {
        let issues = self.issues.take();
        if !issues.is_empty() {
            fail(format!(
                "{} issue(s) reported while the store was running:\n{}",
                issues.len(),
                issues.join("\n")
            ));
        }
    }
}

fn unhandled<S, A>(log: &SharedLog<S, A>) -> Vec<String> {
    log.borrow()
        .received
        .iter()
        .map(|received| received.described.clone())
        .collect()
}

#[track_caller]
fn fail(message: impl fmt::Display) -> ! {
    panic!("{message}")
}

impl<S: 'static, A: 'static> Drop for TestStore<S, A> {
    fn drop(&mut self) {
        let running = self.store.in_flight_effects();
        self.store.cancel_effects();
        if std::thread::panicking() {
            return;
        }

        let exhaustive = self.exhaustivity == Exhaustivity::On;
        let unhandled = unhandled(&self.log);
        if exhaustive && !unhandled.is_empty() {
            fail(format!(
                "The store received {} unexpected actions that were never asserted:\n{}",
                unhandled.len(),
                unhandled.join("\n")
            ));
        }
        if exhaustive && running > 0 {
            fail(format!(
                "An effect returned for this action is still running. It must complete \
                 before the end of the test ({running} in-flight). Await `finish`, or \
                 call `skip_in_flight_effects` to cancel it."
            ));
        }
        let issues = self.issues.take();
        if !issues.is_empty() {
            fail(format!(
                "{} issue(s) reported while the store was running:\n{}",
                issues.len(),
                issues.join("\n")
            ));
        }
    }
}

impl<S: 'static, A: 'static> fmt::Debug for TestStore<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestStore")
            .field("received", &self.log.borrow().received.len())
            .field("in_flight", &self.store.in_flight_effects())
            .field("timeout", &self.timeout)
            .field("exhaustivity", &self.exhaustivity)
            .finish()
    }
}

// ---- Tests ----
