//! State tree of the book catalogue.
//!
//! ```text
//! AppState
//! ├── books: Arc<BooksState>       collection + selected book
//! └── api:   Arc<ApiStatusState>   last collaborator failure
//! ```
//!
//! Every branch sits behind an `Arc`. A reducer that leaves a branch alone
//! returns the same `Arc`, which is what selectors use to skip work.

use crate::actions::ApiOperation;
use crate::model::{Book, BookId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stately_core::selector::Identity;
use std::sync::Arc;

/// The books slice
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BooksState {
    /// Every loaded book, in display order
    pub collection: Arc<Vec<Book>>,
    /// The book open in the editor
    ///
    /// A weak reference: the book may have been deleted since.
    pub active_book_id: Option<BookId>,
}

impl BooksState {
    /// Creates a books slice holding `books`
    #[must_use]
    pub fn with_books(books: Vec<Book>) -> Self {
        Self {
            collection: Arc::new(books),
            active_book_id: None,
        }
    }

    /// Looks a book up by identifier
    #[must_use]
    pub fn get(&self, id: &BookId) -> Option<&Book> {
        self.collection.iter().find(|book| &book.id == id)
    }

    /// True when a book with this identifier is loaded
    #[must_use]
    pub fn contains(&self, id: &BookId) -> bool {
        self.get(id).is_some()
    }
}

/// A failed collaborator call, as recorded in state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiFailure {
    /// Operation that failed
    pub operation: ApiOperation,
    /// Failure description
    pub message: String,
    /// When the failure was observed
    pub at: DateTime<Utc>,
}

impl Identity for ApiFailure {
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

/// The API status slice
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiStatusState {
    /// Most recent failure, cleared by the next successful call
    pub last_failure: Option<ApiFailure>,
    /// Failures observed since startup
    pub failures: u64,
}

/// Root of the state tree
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppState {
    /// Books slice
    pub books: Arc<BooksState>,
    /// API status slice
    pub api: Arc<ApiStatusState>,
}

impl AppState {
    /// Creates a root state with the given books slice
    #[must_use]
    pub fn with_books(books: BooksState) -> Self {
        Self {
            books: Arc::new(books),
            ..Self::default()
        }
    }
}

pub(crate) fn books_slice(state: &AppState) -> &Arc<BooksState> {
    &state.books
}

pub(crate) fn with_books_slice(state: &AppState, books: Arc<BooksState>) -> AppState {
    AppState {
        books,
        api: Arc::clone(&state.api),
    }
}

pub(crate) fn api_slice(state: &AppState) -> &Arc<ApiStatusState> {
    &state.api
}

pub(crate) fn with_api_slice(state: &AppState, api: Arc<ApiStatusState>) -> AppState {
    AppState {
        books: Arc::clone(&state.books),
        api,
    }
}
