//! Actions of the books page and of the books API.
//!
//! Page intents are commands issued by the presentation layer. API
//! completions are events dispatched by the book effects once the
//! collaborator answered.
//!
//! Actions travel as `{"type": "...", "payload": {...}}`.

use crate::model::{Book, BookId, BookRequiredProps};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stately_macros::Action;

/// Collaborator operation a failure belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiOperation {
    /// `all()`
    Load,
    /// `create()`
    Create,
    /// `update()`
    Update,
    /// `delete()`
    Delete,
}

impl ApiOperation {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every action of the book catalogue
#[derive(Action, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum BookAction {
    // ========== Books page ==========
    /// The user opened the books page
    #[command]
    #[serde(rename = "[User on Books Page] Enter")]
    Enter,

    /// The user selected a book for editing
    #[command]
    #[serde(rename = "[User on Books Page] Select a Book")]
    SelectBook {
        /// Selected book
        book_id: BookId,
    },

    /// The user dismissed the editor
    #[command]
    #[serde(rename = "[User on Books Page] Clear Selected Book")]
    ClearSelectedBook,

    /// The user saved a new book
    #[command]
    #[serde(rename = "[User on Books Page] Create Book")]
    CreateBook {
        /// Fields of the new book
        book: BookRequiredProps,
    },

    /// The user saved changes to an existing book
    #[command]
    #[serde(rename = "[User on Books Page] Update Book")]
    UpdateBook {
        /// Book being edited
        book_id: BookId,
        /// New field values
        changes: BookRequiredProps,
    },

    /// The user deleted a book
    #[command]
    #[serde(rename = "[User on Books Page] Delete Book")]
    DeleteBook {
        /// Book to delete
        book_id: BookId,
    },

    // ========== Books API ==========
    /// The full collection was fetched
    #[event]
    #[serde(rename = "[Books API] Books Loaded Success")]
    BooksLoaded {
        /// Every book, in service order
        books: Vec<Book>,
    },

    /// A book was created by the service
    #[event]
    #[serde(rename = "[Books API] Book Created")]
    BookCreated {
        /// The stored book, with its assigned identifier
        book: Book,
    },

    /// A book was updated by the service
    #[event]
    #[serde(rename = "[Books API] Book Updated")]
    BookUpdated {
        /// The stored book
        book: Book,
    },

    /// A book was deleted by the service
    #[event]
    #[serde(rename = "[Books API] Book Deleted")]
    BookDeleted {
        /// Deleted book
        book_id: BookId,
    },

    /// A call to the books service failed
    #[event]
    #[serde(rename = "[Books API] Request Failed")]
    RequestFailed {
        /// Operation that failed
        operation: ApiOperation,
        /// Failure description
        message: String,
        /// When the failure was observed
        at: DateTime<Utc>,
    },
}

impl BookAction {
    /// True for completions reporting a successful collaborator call
    #[must_use]
    pub const fn is_api_success(&self) -> bool {
        matches!(
            self,
            Self::BooksLoaded { .. } | Self::BookCreated { .. } | Self::BookUpdated { .. } | Self::BookDeleted { .. }
        )
    }
}
