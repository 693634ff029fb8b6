//! Structural Diffing
//!
//! Test failures and debug logging need to show *where* two values differ.
//! Types opt in by implementing [`Diffable`], which renders a value as a
//! `serde_json::Value` tree; every `Serialize` type gets it for free.
//!
//! # How Diffing Works
//!
//! 1. Both values are rendered to JSON trees.
//! 2. The trees are walked in parallel (object keys in sorted order, array
//!    elements by index) to find the first mismatching node, which gives a
//!    path such as `$.todos[2].title`.
//! 3. Both trees are pretty-printed and compared line by line, marking
//!    lines only in the expected value with `−` and lines only in the actual
//!    value with `+`.

use std::fmt::{self, Write as _};

use serde::Serialize;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

/// A value that can render itself for diffing.
pub trait Diffable {
    fn render(&self) -> Value;
}

impl<T: Serialize + ?Sized> Diffable for T {
    fn render(&self) -> Value {
        serde_json::to_value(self)
            .unwrap_or_else(|error| Value::String(format!("<unrenderable: {error}>")))
    }
}

/// Where and how two values differ.
#[derive(Debug, Clone, PartialEq)]
pub struct Difference {
    /// Path of the first mismatching node, rooted at `$`.
    pub path: String,
    /// Node at `path` in the expected value; `None` if absent there.
    pub expected: Option<Value>,
    /// Node at `path` in the actual value; `None` if absent there.
    pub actual: Option<Value>,
    /// Line diff of both values.
    pub rendered: String,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "first difference at {}: expected {}, actual {}",
            self.path,
            describe(self.expected.as_ref()),
            describe(self.actual.as_ref())
        )?;
        writeln!(f)?;
        writeln!(f, "  (Expected: −, Actual: +)")?;
        f.write_str(&self.rendered)
    }
}

fn describe(node: Option<&Value>) -> String {
    match node {
        Some(value) => value.to_string(),
        None => "<absent>".to_string(),
    }
}

/// Compare two values. `None` when they render identically.
pub fn diff<T: Diffable + ?Sized>(expected: &T, actual: &T) -> Option<Difference> {
    let expected = expected.render();
    let actual = actual.render();
    let (path, expected_node, actual_node) =
        first_mismatch("$".to_string(), Some(&expected), Some(&actual))?;

    Some(Difference {
        path,
        expected: expected_node.cloned(),
        actual: actual_node.cloned(),
        rendered: line_diff(&pretty(&expected), &pretty(&actual)),
    })
}

/// Pretty multi-line rendering of a value.
pub fn render_pretty<T: Diffable + ?Sized>(value: &T) -> String {
    pretty(&value.render())
}

/// Line diff of the pretty `Debug` renderings of two values.
///
/// Used for values, such as actions, that are compared but not rendered
/// structurally.
pub fn diff_debug<T: fmt::Debug + ?Sized>(expected: &T, actual: &T) -> String {
    line_diff(&format!("{expected:#?}\n"), &format!("{actual:#?}\n"))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

type Mismatch<'a> = (String, Option<&'a Value>, Option<&'a Value>);

fn first_mismatch<'a>(
    path: String,
    expected: Option<&'a Value>,
    actual: Option<&'a Value>,
) -> Option<Mismatch<'a>> {
    match (expected, actual) {
        (Some(Value::Object(left)), Some(Value::Object(right))) => {
            let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
            keys.sort();
            keys.dedup();
            keys.into_iter().find_map(|key| {
                first_mismatch(field_path(&path, key), left.get(key), right.get(key))
            })
        }
        (Some(Value::Array(left)), Some(Value::Array(right))) => (0..left.len().max(right.len()))
            .find_map(|index| {
                first_mismatch(format!("{path}[{index}]"), left.get(index), right.get(index))
            }),
        (left, right) if left == right => None,
        (left, right) => Some((path, left, right)),
    }
}

fn field_path(parent: &str, key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        format!("{parent}.{key}")
    } else {
        format!("{parent}[{key:?}]")
    }
}

fn line_diff(expected: &str, actual: &str) -> String {
    let mut out = String::new();
    for change in TextDiff::from_lines(expected, actual).iter_all_changes() {
        let marker = match change.tag() {
            ChangeTag::Delete => '−',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        let _ = write!(out, "{marker} {}", change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Todo {
        title: String,
        done: bool,
    }

    #[derive(Serialize)]
    struct Todos {
        items: Vec<Todo>,
        filter: &'static str,
    }

    fn todos(titles: &[(&str, bool)]) -> Todos {
        Todos {
            items: titles
                .iter()
                .map(|(title, done)| Todo {
                    title: (*title).to_string(),
                    done: *done,
                })
                .collect(),
            filter: "all",
        }
    }

    #[test]
    fn equal_values_have_no_difference() {
        assert!(diff(&todos(&[("a", false)]), &todos(&[("a", false)])).is_none());
        assert!(diff(&3, &3).is_none());
    }

    #[test]
    fn finds_first_mismatching_field() {
        let expected = todos(&[("milk", false), ("eggs", true)]);
        let actual = todos(&[("milk", false), ("eggs", false)]);

        let difference = diff(&expected, &actual).unwrap();
        assert_eq!(difference.path, "$.items[1].done");
        assert_eq!(difference.expected, Some(Value::Bool(true)));
        assert_eq!(difference.actual, Some(Value::Bool(false)));
        assert!(difference.rendered.contains("−       \"done\": true"));
        assert!(difference.rendered.contains("+       \"done\": false"));
    }

    #[test]
    fn reports_missing_elements() {
        let difference = diff(&vec![1, 2], &vec![1, 2, 3]).unwrap();
        assert_eq!(difference.path, "$[2]");
        assert_eq!(difference.expected, None);
        assert_eq!(difference.actual, Some(Value::from(3)));
    }

    #[test]
    fn quotes_unusual_keys() {
        let expected = serde_json::json!({ "two words": 1 });
        let actual = serde_json::json!({ "two words": 2 });
        assert_eq!(diff(&expected, &actual).unwrap().path, "$[\"two words\"]");
    }

    #[test]
    fn debug_diff_marks_changed_lines() {
        let rendered = diff_debug(&Some(1), &Some(2));
        assert!(rendered.contains("−     1,"));
        assert!(rendered.contains("+     2,"));
        assert!(rendered.contains("  Some("));
    }

    #[test]
    fn display_includes_path_and_markers() {
        let rendered = diff(&1, &2).unwrap().to_string();
        assert!(rendered.starts_with("first difference at $: expected 1, actual 2"));
        assert!(rendered.contains("− 1"));
        assert!(rendered.contains("+ 2"));
    }
}
