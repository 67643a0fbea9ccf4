//! Seeded library fixtures.
//!
//! Provides the `Book`/`Author` entities used across the test suites
//! and a pre-populated in-memory store to run scenarios against.

use scopedb_core::{
    required_integer, required_text, AmbientContext, ConnectionId, CoreResult, Entity,
    IsolationLevel, MemoryStore, RecordKey, Row, Store, UnitOfWork,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A book record. Relationship to its author is by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Key of the book.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Back-cover description.
    pub description: String,
    /// ISBN, as printed.
    pub isbn: String,
    /// Key of the book's author.
    pub author_id: i64,
}

impl Entity for Book {
    const TABLE: &'static str = "books";

    fn key(&self) -> RecordKey {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("title", self.title.as_str())
            .with("description", self.description.as_str())
            .with("isbn", self.isbn.as_str())
            .with("author_id", self.author_id)
    }

    fn from_row(key: RecordKey, row: &Row) -> CoreResult<Self> {
        Ok(Self {
            id: key,
            title: required_text(Self::TABLE, row, "title")?,
            description: required_text(Self::TABLE, row, "description")?,
            isbn: required_text(Self::TABLE, row, "isbn")?,
            author_id: required_integer(Self::TABLE, row, "author_id")?,
        })
    }
}

/// An author record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Key of the author.
    pub id: i64,
    /// Full name.
    pub name: String,
    /// Postal address.
    pub address: String,
}

impl Entity for Author {
    const TABLE: &'static str = "authors";

    fn key(&self) -> RecordKey {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("address", self.address.as_str())
    }

    fn from_row(key: RecordKey, row: &Row) -> CoreResult<Self> {
        Ok(Self {
            id: key,
            name: required_text(Self::TABLE, row, "name")?,
            address: required_text(Self::TABLE, row, "address")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Seed {
    authors: Vec<Author>,
    books: Vec<Book>,
}

const SEED_JSON: &str = include_str!("../data/seed.json");

/// A seeded in-memory library with its ambient context.
pub struct TestLibrary {
    /// The underlying store.
    pub store: Arc<MemoryStore>,
    /// The ambient context every unit of work in the test shares.
    pub ctx: AmbientContext,
}

impl TestLibrary {
    /// Creates a library pre-populated with the standard seed data:
    /// two authors and three books.
    #[must_use]
    pub fn new() -> Self {
        let lib = Self::empty();
        let seed: Seed = serde_json::from_str(SEED_JSON).expect("seed data must parse");
        let conn = lib.store.connect();
        let tx = lib
            .store
            .begin(conn, IsolationLevel::ReadCommitted)
            .expect("seed transaction must begin");
        for author in &seed.authors {
            lib.store
                .insert(tx, Author::TABLE, author.id, author.to_row())
                .expect("seed author must insert");
        }
        for book in &seed.books {
            lib.store
                .insert(tx, Book::TABLE, book.id, book.to_row())
                .expect("seed book must insert");
        }
        lib.store.commit(tx).expect("seed transaction must commit");
        lib
    }

    /// Creates a library with no data.
    #[must_use]
    pub fn empty() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ctx = AmbientContext::new(store.clone());
        Self { store, ctx }
    }

    /// Opens a unit of work on a fresh connection.
    #[must_use]
    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(&self.ctx)
    }

    /// Opens a unit of work sharing `conn`.
    #[must_use]
    pub fn unit_of_work_on(&self, conn: ConnectionId) -> UnitOfWork {
        UnitOfWork::on_connection(&self.ctx, conn)
    }

    /// Creates an independent context over the same store, standing in
    /// for a second logical caller.
    #[must_use]
    pub fn second_caller(&self) -> AmbientContext {
        AmbientContext::new(self.store.clone())
    }
}

impl Default for TestLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against a freshly seeded library.
pub fn with_library<F, R>(f: F) -> R
where
    F: FnOnce(&TestLibrary) -> R,
{
    crate::init_tracing();
    let lib = TestLibrary::new();
    f(&lib)
}

/// An author's books, derived by scanning the books table.
///
/// # Errors
///
/// Propagates the scan's store or mapping errors.
pub fn books_by_author(uow: &mut UnitOfWork, author_id: RecordKey) -> CoreResult<Vec<Book>> {
    let mut books: Vec<Book> = uow.scan()?;
    books.retain(|book| book.author_id == author_id);
    Ok(books)
}
