//! Property-based test generators using proptest.

use crate::fixtures::Book;
use proptest::prelude::*;
use scopedb_core::{RecordKey, Row, ScopeOption, Value};

/// One step of a scope lifecycle sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeAction {
    /// Open a scope with the given propagation option.
    Open(ScopeOption),
    /// Vote commit on the innermost open scope.
    Complete,
    /// Dispose the innermost open scope.
    Dispose,
}

/// Strategy for a single scope action.
pub fn scope_action_strategy() -> impl Strategy<Value = ScopeAction> {
    prop_oneof![
        Just(ScopeAction::Open(ScopeOption::Required)),
        Just(ScopeAction::Open(ScopeOption::RequiresNew)),
        Just(ScopeAction::Complete),
        Just(ScopeAction::Dispose),
    ]
}

/// Strategy for arbitrary scope lifecycle sequences, well-formed or not.
pub fn scope_sequence_strategy() -> impl Strategy<Value = Vec<ScopeAction>> {
    prop::collection::vec(scope_action_strategy(), 0..24)
}

/// Strategy for record keys in the range tests actually use.
pub fn record_key_strategy() -> impl Strategy<Value = RecordKey> {
    1i64..10_000
}

/// Strategy for plausible book titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,12}( [A-Z][a-z]{2,12}){0,3}")
        .expect("valid regex")
}

/// Strategy for ISBN-13 strings.
pub fn isbn_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("97[89]-[0-9]{10}").expect("valid regex")
}

/// Strategy for arbitrary field values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Text),
    ]
}

/// Strategy for rows with a handful of named fields.
pub fn row_strategy() -> impl Strategy<Value = Row> {
    prop::collection::btree_map("[a-z_]{1,12}", value_strategy(), 1..6).prop_map(|fields| {
        let mut row = Row::new();
        for (name, value) in fields {
            row.set(name, value);
        }
        row
    })
}

/// Strategy for complete book entities.
pub fn book_strategy() -> impl Strategy<Value = Book> {
    (
        record_key_strategy(),
        title_strategy(),
        "[a-zA-Z ]{0,40}",
        isbn_strategy(),
        1i64..100,
    )
        .prop_map(|(id, title, description, isbn, author_id)| Book {
            id,
            title,
            description,
            isbn,
            author_id,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopedb_core::Entity;

    proptest! {
        #[test]
        fn generated_books_survive_row_mapping(book in book_strategy()) {
            let row = book.to_row();
            let back = Book::from_row(book.id, &row).unwrap();
            prop_assert_eq!(back, book);
        }

        #[test]
        fn generated_rows_diff_self_empty(row in row_strategy()) {
            prop_assert!(row.diff(&row).is_empty());
        }
    }
}
