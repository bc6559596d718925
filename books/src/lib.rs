//! Book catalogue built on the Stately state pipeline.
//!
//! The books page lists a collection of books, lets the user select one for
//! editing, and creates, updates or deletes books through a [`BooksService`].
//! It demonstrates:
//!
//! - Two independently reduced slices (`books`, `api`) behind `Arc`
//! - Memoized selectors deriving the active book and the earnings total
//! - One effect per collaborator call, each with its own concurrency policy
//! - Testing with `ReducerTest` and `proptest`
//!
//! # Quick Start
//!
//! ```no_run
//! use stately_books::{BookAction, BooksApp, BooksEnvironment, InMemoryBooksService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = Arc::new(InMemoryBooksService::new());
//! let app = BooksApp::start(BooksEnvironment::new(service))?;
//!
//! app.store()
//!     .dispatch_and_wait_for(
//!         BookAction::Enter,
//!         |a| matches!(a, BookAction::BooksLoaded { .. } | BookAction::RequestFailed { .. }),
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! println!("{} books, {:.2} earned", app.books().len(), app.earnings_total());
//!
//! app.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod app;
pub mod effects;
pub mod model;
pub mod page;
pub mod reducer;
pub mod selectors;
pub mod service;
pub mod state;

// Re-export commonly used types
pub use actions::{ApiOperation, BookAction};
pub use app::BooksApp;
pub use effects::{BooksEnvironment, register_book_effects};
pub use model::{Book, BookId, BookRequiredProps, calculate_books_gross_earnings};
pub use page::{BookForm, BooksPage};
pub use reducer::{ApiStatusReducer, BooksReducer, root_reducer};
pub use selectors::BookSelectors;
pub use service::{BooksService, InMemoryBooksService, ServiceError};
pub use state::{ApiFailure, ApiStatusState, AppState, BooksState};
