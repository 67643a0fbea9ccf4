//! Entity mapping trait.

use crate::error::{CoreError, CoreResult};
use scopedb_store::{RecordKey, Row};

/// A typed record that can be stored and tracked.
///
/// The trait is the mapping seam between application structs and stored
/// rows. Implementations include the key in the row (`id` field, by
/// convention) so raw scans return complete records.
///
/// Relationships are modeled as foreign-key fields, never as object
/// pointers: a `Book` carries `author_id`, and an author's book list is
/// derived by scanning, which keeps the object graph acyclic.
pub trait Entity: Sized {
    /// Table the entity's rows live in.
    const TABLE: &'static str;

    /// The entity's key. Immutable once assigned.
    fn key(&self) -> RecordKey;

    /// Converts the entity to a stored row.
    fn to_row(&self) -> Row;

    /// Reconstructs an entity from a stored row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Mapping`] if a required field is missing or
    /// has the wrong type.
    fn from_row(key: RecordKey, row: &Row) -> CoreResult<Self>;
}

/// Reads a required text field from a row.
///
/// # Errors
///
/// Returns [`CoreError::Mapping`] if the field is absent or not text.
pub fn required_text(table: &str, row: &Row, name: &str) -> CoreResult<String> {
    row.get(name)
        .and_then(|v| v.as_text())
        .map(str::to_owned)
        .ok_or_else(|| CoreError::mapping(table, format!("missing text field `{name}`")))
}

/// Reads a required integer field from a row.
///
/// # Errors
///
/// Returns [`CoreError::Mapping`] if the field is absent or not an integer.
pub fn required_integer(table: &str, row: &Row, name: &str) -> CoreResult<i64> {
    row.get(name)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| CoreError::mapping(table, format!("missing integer field `{name}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopedb_store::Value;

    #[test]
    fn required_text_reads_field() {
        let row = Row::new().with("title", "Dune");
        assert_eq!(required_text("books", &row, "title").unwrap(), "Dune");
    }

    #[test]
    fn required_text_rejects_missing_field() {
        let row = Row::new();
        let err = required_text("books", &row, "title").unwrap_err();
        assert!(matches!(err, CoreError::Mapping { .. }));
    }

    #[test]
    fn required_integer_rejects_wrong_type() {
        let row = Row::new().with("author_id", Value::text("three"));
        let err = required_integer("books", &row, "author_id").unwrap_err();
        assert!(matches!(err, CoreError::Mapping { .. }));
    }
}
