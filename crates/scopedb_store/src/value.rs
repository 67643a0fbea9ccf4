//! Dynamic field values and rows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamic field value.
///
/// Covers the field types the entity layer stores. Floats are
/// intentionally not supported: rows must compare exactly for
/// snapshot-based dirty detection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Text string (UTF-8).
    Text(String),
}

impl Value {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Checks whether this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// A stored record: an ordered map of field name to value.
///
/// Field order is deterministic (sorted by name) so dirty detection and
/// flush ordering are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    fields: BTreeMap<String, Value>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a field value, returning the previous value if any.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Gets a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Checks whether a field is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the field names that differ between this row and `other`.
    ///
    /// A field counts as different if it is present in only one row or
    /// present in both with unequal values.
    #[must_use]
    pub fn diff(&self, other: &Row) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, value) in &self.fields {
            if other.fields.get(name) != Some(value) {
                changed.push(name.clone());
            }
        }
        for name in other.fields.keys() {
            if !self.fields.contains_key(name) {
                changed.push(name.clone());
            }
        }
        changed.sort();
        changed.dedup();
        changed
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Checks if the row has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_accessors() {
        assert_eq!(Value::Integer(7).as_integer(), Some(7));
        assert_eq!(Value::text("x").as_text(), Some("x"));
        assert!(Value::Null.is_null());
        assert_eq!(Value::text("x").as_integer(), None);
    }

    #[test]
    fn row_builder_and_get() {
        let row = Row::new()
            .with("title", Value::text("Dune"))
            .with("author_id", 3i64);

        assert_eq!(row.get("title"), Some(&Value::text("Dune")));
        assert_eq!(row.get("author_id"), Some(&Value::Integer(3)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn row_set_returns_previous() {
        let mut row = Row::new().with("title", "A");
        let prev = row.set("title", "B");
        assert_eq!(prev, Some(Value::text("A")));
        assert_eq!(row.get("title"), Some(&Value::text("B")));
    }

    #[test]
    fn diff_empty_for_equal_rows() {
        let row = Row::new().with("a", 1i64).with("b", "x");
        assert!(row.diff(&row.clone()).is_empty());
    }

    #[test]
    fn diff_lists_changed_fields() {
        let original = Row::new().with("title", "A").with("isbn", "111");
        let current = Row::new().with("title", "B").with("isbn", "111");
        assert_eq!(original.diff(&current), vec!["title".to_owned()]);
    }

    #[test]
    fn diff_includes_added_and_removed_fields() {
        let original = Row::new().with("title", "A");
        let current = Row::new().with("isbn", "111");
        let mut changed = original.diff(&current);
        changed.sort();
        assert_eq!(changed, vec!["isbn".to_owned(), "title".to_owned()]);
    }

    #[test]
    fn iteration_is_name_ordered() {
        let row = Row::new().with("b", 2i64).with("a", 1i64).with("c", 3i64);
        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn value_strategy() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Integer),
                "[a-z]{0,8}".prop_map(Value::Text),
            ]
        }

        fn row_strategy() -> impl Strategy<Value = Row> {
            prop::collection::btree_map("[a-z]{1,6}", value_strategy(), 0..5).prop_map(
                |fields| {
                    let mut row = Row::new();
                    for (name, value) in fields {
                        row.set(name, value);
                    }
                    row
                },
            )
        }

        proptest! {
            #[test]
            fn diff_is_symmetric(a in row_strategy(), b in row_strategy()) {
                prop_assert_eq!(a.diff(&b), b.diff(&a));
            }

            #[test]
            fn diff_of_row_with_itself_is_empty(row in row_strategy()) {
                prop_assert!(row.diff(&row).is_empty());
            }

            // Field names in the generator stay in [a-z]{1,6}, so the
            // underscored name below never collides.
            #[test]
            fn adding_a_field_diffs_exactly_that_field(
                row in row_strategy(),
                value in value_strategy(),
            ) {
                let mut grown = row.clone();
                grown.set("added_field", value);
                prop_assert_eq!(row.diff(&grown), vec!["added_field".to_owned()]);
            }
        }
    }
}
