//! Child reducers embedded in a parent's state and actions.

use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexMap;

use super::{CasePath, Reducer};
use crate::effect::Effect;
use crate::issue::report_issue;

/// Runs `child` on the field selected by `state` for actions selected by
/// `action`. Other parent actions pass through untouched.
pub struct Scope<P, PA, R: Reducer> {
    state: fn(&mut P) -> &mut R::State,
    action: CasePath<PA, R::Action>,
    child: R,
}

impl<P, PA, R: Reducer> Scope<P, PA, R> {
    pub fn new(
        state: fn(&mut P) -> &mut R::State,
        action: CasePath<PA, R::Action>,
        child: R,
    ) -> Self {
        Self {
            state,
            action,
            child,
        }
    }
}

impl<P, PA, R> Reducer for Scope<P, PA, R>
where
    R: Reducer,
    R::Action: 'static,
    PA: 'static,
{
    type State = P;
    type Action = PA;

    fn reduce(&self, state: &mut P, action: PA) -> Effect<PA> {
        match self.action.extract(action) {
            Ok(child_action) => self
                .child
                .reduce((self.state)(state), child_action)
                .map(self.action.embedder()),
            Err(_) => Effect::none(),
        }
    }
}

/// Runs `child` on optional state selected by `state`.
///
/// A child action arriving while the state is `None` is reported as an
/// issue and ignored.
pub struct IfLet<P, PA, R: Reducer> {
    state: fn(&mut P) -> &mut Option<R::State>,
    action: CasePath<PA, R::Action>,
    child: R,
}

impl<P, PA, R: Reducer> IfLet<P, PA, R> {
    pub fn new(
        state: fn(&mut P) -> &mut Option<R::State>,
        action: CasePath<PA, R::Action>,
        child: R,
    ) -> Self {
        Self {
            state,
            action,
            child,
        }
    }
}

impl<P, PA, R> Reducer for IfLet<P, PA, R>
where
    R: Reducer,
    R::Action: Debug + 'static,
    PA: 'static,
{
    type State = P;
    type Action = PA;

    fn reduce(&self, state: &mut P, action: PA) -> Effect<PA> {
        let child_action = match self.action.extract(action) {
            Ok(child_action) => child_action,
            Err(_) => return Effect::none(),
        };
        match (self.state)(state) {
            Some(child_state) => self
                .child
                .reduce(child_state, child_action)
                .map(self.action.embedder()),
            None => {
                report_issue(format!(
                    "An optional reducer received {child_action:?} while its state was absent. \
                     Run optional reducers before reducers that clear their state, and cancel \
                     long-living child effects before clearing it."
                ));
                Effect::none()
            }
        }
    }
}

/// Runs `child` on one element of an ID-keyed collection selected by
/// `state`, for parent actions carrying an `(id, child action)` pair.
///
/// An action for an ID not in the collection is reported as an issue and
/// ignored. Child effects are tagged with the element's ID on the way back.
pub struct ForEach<P, PA, Id, R: Reducer> {
    state: fn(&mut P) -> &mut IndexMap<Id, R::State>,
    action: CasePath<PA, (Id, R::Action)>,
    child: R,
}

impl<P, PA, Id, R: Reducer> ForEach<P, PA, Id, R> {
    pub fn new(
        state: fn(&mut P) -> &mut IndexMap<Id, R::State>,
        action: CasePath<PA, (Id, R::Action)>,
        child: R,
    ) -> Self {
        Self {
            state,
            action,
            child,
        }
    }
}

impl<P, PA, Id, R> Reducer for ForEach<P, PA, Id, R>
where
    R: Reducer,
    R::Action: Debug + 'static,
    PA: 'static,
    Id: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    type State = P;
    type Action = PA;

    fn reduce(&self, state: &mut P, action: PA) -> Effect<PA> {
        let (id, child_action) = match self.action.extract(action) {
            Ok(pair) => pair,
            Err(_) => return Effect::none(),
        };
        match (self.state)(state).get_mut(&id) {
            Some(element) => {
                let embed = self.action.embedder();
                self.child
                    .reduce(element, child_action)
                    .map(move |action| embed((id.clone(), action)))
            }
            None => {
                report_issue(format!(
                    "A collection reducer received {child_action:?} for element {id:?}, which \
                     is not in the collection. Run collection reducers before reducers that \
                     remove elements, and cancel element effects when removing them."
                ));
                Effect::none()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{with_strictness, Strictness};
    use crate::reducer::reduce_fn;

    #[derive(Debug, Default)]
    struct App {
        counter: i32,
        editor: Option<String>,
        rows: IndexMap<u32, i32>,
        other: u32,
    }

    #[derive(Debug)]
    enum AppAction {
        Counter(i32),
        Editor(char),
        Row((u32, i32)),
        Other,
    }

    fn counter() -> impl Reducer<State = i32, Action = i32> {
        reduce_fn(|count: &mut i32, delta: i32| {
            *count += delta;
            if *count > 10 {
                Effect::send(-10)
            } else {
                Effect::none()
            }
        })
    }

    fn editor() -> impl Reducer<State = String, Action = char> {
        reduce_fn(|text: &mut String, c: char| {
            text.push(c);
            Effect::none()
        })
    }

    #[test]
    fn scope_routes_child_actions() {
        let reducer = Scope::new(
            |app: &mut App| &mut app.counter,
            crate::case_path!(AppAction::Counter),
            counter(),
        );
        let mut app = App::default();

        let _ = reducer.reduce(&mut app, AppAction::Counter(3));
        let _ = reducer.reduce(&mut app, AppAction::Other);
        assert_eq!(app.counter, 3);
        assert_eq!(app.other, 0);
    }

    #[test]
    fn scope_embeds_child_effects() {
        let reducer = Scope::new(
            |app: &mut App| &mut app.counter,
            crate::case_path!(AppAction::Counter),
            counter(),
        );
        let mut app = App::default();

        let effect = reducer.reduce(&mut app, AppAction::Counter(11));
        let rendered = format!("{effect:?}");
        assert_eq!(rendered, "Effect::Send([Counter(-10)])");
    }

    #[test]
    fn if_let_runs_when_present() {
        let reducer = IfLet::new(
            |app: &mut App| &mut app.editor,
            crate::case_path!(AppAction::Editor),
            editor(),
        );
        let mut app = App {
            editor: Some("h".into()),
            ..App::default()
        };

        let _ = reducer.reduce(&mut app, AppAction::Editor('i'));
        assert_eq!(app.editor.as_deref(), Some("hi"));
    }

    #[test]
    fn if_let_ignores_absent_state_leniently() {
        let reducer = IfLet::new(
            |app: &mut App| &mut app.editor,
            crate::case_path!(AppAction::Editor),
            editor(),
        );
        let mut app = App::default();

        let effect = with_strictness(Strictness::Lenient, || {
            reducer.reduce(&mut app, AppAction::Editor('x'))
        });
        assert!(effect.is_none());
        assert!(app.editor.is_none());
    }

    #[test]
    #[should_panic(expected = "while its state was absent")]
    fn if_let_reports_absent_state() {
        let reducer = IfLet::new(
            |app: &mut App| &mut app.editor,
            crate::case_path!(AppAction::Editor),
            editor(),
        );
        let mut app = App::default();
        let _ = with_strictness(Strictness::Strict, || {
            reducer.reduce(&mut app, AppAction::Editor('x'))
        });
    }

    fn rows() -> ForEach<App, AppAction, u32, impl Reducer<State = i32, Action = i32>> {
        ForEach::new(
            |app: &mut App| &mut app.rows,
            crate::case_path!(AppAction::Row),
            counter(),
        )
    }

    #[test]
    fn for_each_updates_only_the_addressed_element() {
        let reducer = rows();
        let mut app = App::default();
        app.rows.insert(1, 0);
        app.rows.insert(2, 5);

        let _ = reducer.reduce(&mut app, AppAction::Row((2, 3)));
        let _ = reducer.reduce(&mut app, AppAction::Other);
        assert_eq!(app.rows.get(&1), Some(&0));
        assert_eq!(app.rows.get(&2), Some(&8));
    }

    #[test]
    fn for_each_tags_child_effects_with_the_id() {
        let reducer = rows();
        let mut app = App::default();
        app.rows.insert(7, 9);

        let effect = reducer.reduce(&mut app, AppAction::Row((7, 2)));
        assert_eq!(format!("{effect:?}"), "Effect::Send([Row((7, -10))])");
    }

    #[test]
    #[should_panic(expected = "which is not in the collection")]
    fn for_each_reports_missing_element() {
        let reducer = rows();
        let mut app = App::default();
        let _ = with_strictness(Strictness::Strict, || {
            reducer.reduce(&mut app, AppAction::Row((3, 1)))
        });
    }
}
