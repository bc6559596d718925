//! Memoized read views over [`AppState`].

use crate::model::{Book, BookId, calculate_books_gross_earnings};
use crate::state::{ApiFailure, ApiStatusState, AppState, BooksState};
use stately_core::selector::{Selector, create_selector1, create_selector2, select_root};
use std::sync::Arc;

/// A selector shared between the views derived from it
pub type SharedSelector<O> = Arc<dyn Selector<AppState, Output = O>>;

/// The selectors of the books page
///
/// Feature selectors project a slice off the root; every other selector
/// derives from them and only recomputes when its inputs changed identity.
///
/// ```ignore
/// let selectors = BookSelectors::new();
/// let total = store.select(&selectors.earnings_total);
/// ```
#[derive(Clone)]
pub struct BookSelectors {
    /// The books slice
    pub books_state: SharedSelector<Arc<BooksState>>,
    /// The API status slice
    pub api_state: SharedSelector<Arc<ApiStatusState>>,
    /// Every book, in display order
    pub all_books: SharedSelector<Arc<Vec<Book>>>,
    /// Identifier of the book open in the editor
    pub active_book_id: SharedSelector<Option<BookId>>,
    /// The book open in the editor, if it is still loaded
    pub active_book: SharedSelector<Option<Book>>,
    /// Sum of the earnings of every book
    pub earnings_total: SharedSelector<f64>,
    /// Most recent collaborator failure
    pub last_api_failure: SharedSelector<Option<ApiFailure>>,
}

impl BookSelectors {
    /// Builds the selector graph with empty caches
    #[must_use]
    pub fn new() -> Self {
        let books_state: SharedSelector<Arc<BooksState>> =
            Arc::new(select_root(|state: &AppState| Arc::clone(&state.books)));
        let api_state: SharedSelector<Arc<ApiStatusState>> =
            Arc::new(select_root(|state: &AppState| Arc::clone(&state.api)));

        let all_books: SharedSelector<Arc<Vec<Book>>> = Arc::new(create_selector1(
            Arc::clone(&books_state),
            |books: &Arc<BooksState>| Arc::clone(&books.collection),
        ));
        let active_book_id: SharedSelector<Option<BookId>> = Arc::new(create_selector1(
            Arc::clone(&books_state),
            |books: &Arc<BooksState>| books.active_book_id.clone(),
        ));
        let active_book: SharedSelector<Option<Book>> = Arc::new(create_selector2(
            Arc::clone(&all_books),
            Arc::clone(&active_book_id),
            |books: &Arc<Vec<Book>>, active: &Option<BookId>| {
                active
                    .as_ref()
                    .and_then(|id| books.iter().find(|book| &book.id == id))
                    .cloned()
            },
        ));
        let earnings_total: SharedSelector<f64> = Arc::new(create_selector1(
            Arc::clone(&all_books),
            |books: &Arc<Vec<Book>>| calculate_books_gross_earnings(books),
        ));
        let last_api_failure: SharedSelector<Option<ApiFailure>> = Arc::new(create_selector1(
            Arc::clone(&api_state),
            |api: &Arc<ApiStatusState>| api.last_failure.clone(),
        ));

        Self {
            books_state,
            api_state,
            all_books,
            active_book_id,
            active_book,
            earnings_total,
            last_api_failure,
        }
    }
}

impl Default for BookSelectors {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BookSelectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookSelectors")
            .field("all_books", &self.all_books.recomputations())
            .field("active_book", &self.active_book.recomputations())
            .field("earnings_total", &self.earnings_total.recomputations())
            .finish_non_exhaustive()
    }
}
