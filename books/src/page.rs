//! The books page as seen by its template.
//!
//! [`BooksPage`] turns user gestures into page intents. It owns no state:
//! everything it shows comes from the store through the selectors.

use crate::actions::BookAction;
use crate::app::BooksApp;
use crate::model::{Book, BookRequiredProps};
use stately_runtime::StoreError;

/// What the editor form submits
#[derive(Clone, Debug, PartialEq)]
pub enum BookForm {
    /// A book that has no identifier yet
    New(BookRequiredProps),
    /// Edited fields of a loaded book
    Existing(Book),
}

/// Page intents bound to a running [`BooksApp`]
#[derive(Debug, Clone, Copy)]
pub struct BooksPage<'a> {
    app: &'a BooksApp,
}

impl<'a> BooksPage<'a> {
    /// Binds the page to an application
    #[must_use]
    pub const fn new(app: &'a BooksApp) -> Self {
        Self { app }
    }

    /// Opens the page: closes the editor, then loads the collection
    ///
    /// # Errors
    ///
    /// See [`stately_runtime::Store::dispatch`].
    pub fn init(&self) -> Result<(), StoreError> {
        self.cancel()?;
        self.app.dispatch(BookAction::Enter)
    }

    /// Opens `book` in the editor
    ///
    /// # Errors
    ///
    /// See [`stately_runtime::Store::dispatch`].
    pub fn select(&self, book: &Book) -> Result<(), StoreError> {
        self.app.dispatch(BookAction::SelectBook {
            book_id: book.id.clone(),
        })
    }

    /// Closes the editor
    ///
    /// # Errors
    ///
    /// See [`stately_runtime::Store::dispatch`].
    pub fn cancel(&self) -> Result<(), StoreError> {
        self.app.dispatch(BookAction::ClearSelectedBook)
    }

    /// Submits the editor form
    ///
    /// # Errors
    ///
    /// See [`stately_runtime::Store::dispatch`].
    pub fn save(&self, form: BookForm) -> Result<(), StoreError> {
        let action = match form {
            BookForm::New(book) => BookAction::CreateBook { book },
            BookForm::Existing(book) => BookAction::UpdateBook {
                changes: book.props(),
                book_id: book.id,
            },
        };
        self.app.dispatch(action)
    }

    /// Deletes `book`
    ///
    /// # Errors
    ///
    /// See [`stately_runtime::Store::dispatch`].
    pub fn delete(&self, book: &Book) -> Result<(), StoreError> {
        self.app.dispatch(BookAction::DeleteBook {
            book_id: book.id.clone(),
        })
    }
}
