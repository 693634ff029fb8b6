//! Integration Tests for Scoped Stores and Reducer Composition

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use rill_core::{
    case_path, reduce_fn, Effect, ForEach, IfLet, Reducer, ReducerExt, Scope, ScopeOptions, Store,
    TestStore,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
struct Counter {
    count: i32,
}

#[derive(Debug, Clone, PartialEq)]
enum CounterAction {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
struct App {
    counter: Counter,
    settings: Option<Counter>,
    title: String,
}

#[derive(Debug, Clone, PartialEq)]
enum AppAction {
    Counter(CounterAction),
    Settings(CounterAction),
    OpenSettings,
    CloseSettings,
    Rename(String),
}

fn counter() -> impl Reducer<State = Counter, Action = CounterAction> {
    reduce_fn(|counter: &mut Counter, action: CounterAction| {
        match action {
            CounterAction::Increment => counter.count += 1,
            CounterAction::Decrement => counter.count -= 1,
        }
        Effect::none()
    })
}

fn counter_state(app: &mut App) -> &mut Counter {
    &mut app.counter
}

fn settings_state(app: &mut App) -> &mut Option<Counter> {
    &mut app.settings
}

fn app() -> impl Reducer<State = App, Action = AppAction> {
    let shell = reduce_fn(|app: &mut App, action: AppAction| {
        match action {
            AppAction::OpenSettings => app.settings = Some(Counter::default()),
            AppAction::CloseSettings => app.settings = None,
            AppAction::Rename(title) => app.title = title,
            AppAction::Counter(_) | AppAction::Settings(_) => {}
        }
        Effect::none()
    });

    shell
        .combine(Scope::new(counter_state, case_path!(AppAction::Counter), counter()))
        .combine(IfLet::new(settings_state, case_path!(AppAction::Settings), counter()))
}

fn project_counter(app: &App) -> Counter {
    app.counter.clone()
}

fn project_settings(app: &App) -> Option<Counter> {
    app.settings.clone()
}

/// Test that scoping twice with the same functions yields one store.
#[test]
fn scoping_is_referentially_stable() {
    init_tracing();
    let store = Store::new(App::default(), app());
    let first = store.scope(project_counter, AppAction::Counter);
    let second = store.scope(project_counter, AppAction::Counter);

    assert!(first.ptr_eq(&second));
    assert_eq!(store.live_children(), 1);
}

/// Test that a scoped store reads its slice and writes through its parent.
#[test]
fn scoped_sends_update_the_parent() {
    init_tracing();
    let store = Store::new(App::default(), app());
    let counter = store.scope(project_counter, AppAction::Counter);

    counter.send(CounterAction::Increment);
    counter.send(CounterAction::Increment);
    counter.send(CounterAction::Decrement);

    assert_eq!(counter.state().count, 1);
    assert_eq!(store.with_state(|app| app.counter.count), 1);
}

/// Test that a parent observer registered before a child existed reads the
/// child's slice as of the batch it is being told about.
#[test]
fn scoped_state_is_current_inside_parent_observers() {
    init_tracing();
    let store = Store::new(App::default(), app());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let child: Rc<RefCell<Option<Store<Counter, CounterAction>>>> = Rc::new(RefCell::new(None));
    let _subscription = {
        let seen = Rc::clone(&seen);
        let child = Rc::clone(&child);
        store.subscribe(move |app: &App| {
            if let Some(counter) = child.borrow().as_ref() {
                seen.borrow_mut().push((app.counter.count, counter.state().count));
            }
        })
    };
    *child.borrow_mut() = Some(store.scope(project_counter, AppAction::Counter));

    store.send(AppAction::Counter(CounterAction::Increment));
    store.send(AppAction::Counter(CounterAction::Increment));
    assert_eq!(*seen.borrow(), vec![(1, 1), (2, 2)]);
}

/// Test that an unchanged projection never notifies when deduplicated.
#[test]
fn deduplicated_scope_ignores_unrelated_changes() {
    init_tracing();
    let store = Store::new(App::default(), app());
    let counter = store.scope_with(
        project_counter,
        AppAction::Counter,
        ScopeOptions::new().dedup(),
    );
    let notified = Rc::new(Cell::new(0));
    let _subscription = {
        let notified = Rc::clone(&notified);
        counter.subscribe(move |_: &Counter| notified.set(notified.get() + 1))
    };

    store.send(AppAction::Rename("home".into()));
    store.send(AppAction::Rename("away".into()));
    assert_eq!(notified.get(), 0);

    store.send(AppAction::Counter(CounterAction::Increment));
    assert_eq!(notified.get(), 1);
}

/// Test that optional child stores exist only while their state does, and
/// stop forwarding once it is gone.
#[test]
fn optional_scope_follows_presence() {
    init_tracing();
    let store = Store::new(App::default(), app());
    assert!(store.scope_if_let(project_settings, AppAction::Settings).is_none());

    store.send(AppAction::OpenSettings);
    let settings = store
        .scope_if_let(project_settings, AppAction::Settings)
        .expect("settings are open");
    settings.send(CounterAction::Increment);
    assert_eq!(settings.state().count, 1);

    store.send(AppAction::CloseSettings);
    assert!(settings.is_invalid());
    assert_eq!(settings.state().count, 1);
}

/// Test that composed reducers route child actions through their case paths.
#[test]
fn composed_reducers_route_actions() {
    init_tracing();
    let mut store = TestStore::new(App::default(), app());

    store.send(AppAction::Counter(CounterAction::Increment), |app| {
        app.counter.count = 1;
    });
    store.send(AppAction::OpenSettings, |app| {
        app.settings = Some(Counter::default());
    });
    store.send(AppAction::Settings(CounterAction::Decrement), |app| {
        app.settings = Some(Counter { count: -1 });
    });
    store.send(AppAction::CloseSettings, |app| app.settings = None);
}

/// Test that a child action for absent optional state is reported.
#[test]
#[should_panic(expected = "while its state was absent")]
fn child_action_without_state_is_reported() {
    init_tracing();
    let mut store = TestStore::new(App::default(), app());
    store.send_unchanged(AppAction::Settings(CounterAction::Increment));
}

#[derive(Debug, Default)]
struct Board {
    counters: IndexMap<u32, Counter>,
}

#[derive(Debug, Clone, PartialEq)]
enum BoardAction {
    Add(u32),
    Remove(u32),
    Counter((u32, CounterAction)),
}

fn board_counters(board: &mut Board) -> &mut IndexMap<u32, Counter> {
    &mut board.counters
}

fn board() -> impl Reducer<State = Board, Action = BoardAction> {
    let rows = ForEach::new(board_counters, case_path!(BoardAction::Counter), counter());
    let shell = reduce_fn(|board: &mut Board, action: BoardAction| {
        match action {
            BoardAction::Add(id) => {
                board.counters.insert(id, Counter::default());
            }
            BoardAction::Remove(id) => {
                board.counters.shift_remove(&id);
            }
            BoardAction::Counter(_) => {}
        }
        Effect::none()
    });
    rows.combine(shell)
}

/// Test that a collection reducer drives each element by its ID, and that
/// scoping into one element follows it.
#[test]
fn collection_elements_are_reduced_by_id() {
    init_tracing();
    let store = Store::new(Board::default(), board());
    store.send(BoardAction::Add(1));
    store.send(BoardAction::Add(2));

    let second = store.scope_keyed(
        2_u32,
        |board: &Board| board.counters.get(&2).map_or(0, |counter| counter.count),
        |action: CounterAction| BoardAction::Counter((2, action)),
        ScopeOptions::new(),
    );
    second.send(CounterAction::Increment);
    second.send(CounterAction::Increment);
    store.send(BoardAction::Counter((1, CounterAction::Decrement)));

    assert_eq!(second.state(), 2);
    assert_eq!(store.with_state(|board| board.counters[&1].count), -1);
}

/// Test that an action for a removed element is reported.
#[test]
#[should_panic(expected = "which is not in the collection")]
fn action_for_removed_element_is_reported() {
    init_tracing();
    let store = Store::new(Board::default(), board());
    store.send(BoardAction::Add(1));
    store.send(BoardAction::Remove(1));
    rill_core::config::with_strictness(rill_core::Strictness::Strict, || {
        store.send(BoardAction::Counter((1, CounterAction::Increment)))
    });
}
