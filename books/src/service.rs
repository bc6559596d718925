//! The books service collaborator.
//!
//! Effects reach the outside world only through [`BooksService`]. The
//! in-memory implementation backs the demo binary and the tests.

use crate::model::{Book, BookId, BookRequiredProps};
use async_trait::async_trait;
use stately_core::effect::EffectError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`BooksService`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No book with this identifier exists
    #[error("book {0} not found")]
    NotFound(BookId),

    /// The service could not be reached; retrying may help
    #[error("books service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<ServiceError> for EffectError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Unavailable(_) => Self::transient(error.to_string()),
            ServiceError::NotFound(_) | ServiceError::Rejected(_) => Self::collaborator(error.to_string()),
        }
    }
}

/// Book CRUD operations
///
/// # Errors
///
/// Every operation may fail with a [`ServiceError`].
#[async_trait]
pub trait BooksService: Send + Sync + 'static {
    /// Fetch every book
    async fn all(&self) -> Result<Vec<Book>, ServiceError>;

    /// Store a new book and return it with its assigned identifier
    async fn create(&self, book: BookRequiredProps) -> Result<Book, ServiceError>;

    /// Replace the fields of an existing book
    async fn update(&self, book_id: &BookId, changes: BookRequiredProps) -> Result<Book, ServiceError>;

    /// Delete a book
    async fn delete(&self, book_id: &BookId) -> Result<(), ServiceError>;
}

/// Per-operation call counters of an [`InMemoryBooksService`]
#[derive(Debug, Default)]
struct CallCounters {
    all: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

/// Snapshot of the calls an [`InMemoryBooksService`] received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceCalls {
    /// `all()` calls
    pub all: usize,
    /// `create()` calls
    pub create: usize,
    /// `update()` calls
    pub update: usize,
    /// `delete()` calls
    pub delete: usize,
}

/// In-memory [`BooksService`]
///
/// Assigns uuid-v4 identifiers. Can simulate latency and an outage.
///
/// # Example
///
/// ```ignore
/// let service = InMemoryBooksService::new()
///     .with_books(vec![book_a, book_b])
///     .with_latency(Duration::from_millis(20));
///
/// service.set_available(false); // every call now fails with Unavailable
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBooksService {
    books: Mutex<Vec<Book>>,
    latency: Duration,
    unavailable: AtomicBool,
    calls: CallCounters,
}

impl InMemoryBooksService {
    /// Creates an empty service
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the stored books
    #[must_use]
    pub fn with_books(self, books: Vec<Book>) -> Self {
        *self.books.lock().unwrap_or_else(PoisonError::into_inner) = books;
        self
    }

    /// Delays every call by `latency`
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Simulates an outage (`false`) or a recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Books currently stored
    #[must_use]
    pub fn stored(&self) -> Vec<Book> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Calls received so far
    #[must_use]
    pub fn calls(&self) -> ServiceCalls {
        ServiceCalls {
            all: self.calls.all.load(Ordering::SeqCst),
            create: self.calls.create.load(Ordering::SeqCst),
            update: self.calls.update.load(Ordering::SeqCst),
            delete: self.calls.delete.load(Ordering::SeqCst),
        }
    }

    async fn round_trip(&self, counter: &AtomicUsize) -> Result<(), ServiceError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BooksService for InMemoryBooksService {
    async fn all(&self) -> Result<Vec<Book>, ServiceError> {
        self.round_trip(&self.calls.all).await?;
        Ok(self.stored())
    }

    async fn create(&self, book: BookRequiredProps) -> Result<Book, ServiceError> {
        self.round_trip(&self.calls.create).await?;
        if book.name.trim().is_empty() {
            return Err(ServiceError::Rejected("book name must not be empty".to_string()));
        }

        let created = Book::from_props(BookId::generate(), book);
        self.books
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(created.clone());
        Ok(created)
    }

    async fn update(&self, book_id: &BookId, changes: BookRequiredProps) -> Result<Book, ServiceError> {
        self.round_trip(&self.calls.update).await?;

        let mut books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = books
            .iter_mut()
            .find(|book| &book.id == book_id)
            .ok_or_else(|| ServiceError::NotFound(book_id.clone()))?;
        *stored = stored.with_changes(changes);
        Ok(stored.clone())
    }

    async fn delete(&self, book_id: &BookId) -> Result<(), ServiceError> {
        self.round_trip(&self.calls.delete).await?;

        let mut books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        let before = books.len();
        books.retain(|book| &book.id != book_id);
        if books.len() == before {
            return Err(ServiceError::NotFound(book_id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn id(value: &str) -> BookId {
        value.parse().unwrap()
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let service = InMemoryBooksService::new();

        let created = service
            .create(BookRequiredProps::new("Dune", 12.5, "Sand"))
            .await
            .unwrap();
        assert_eq!(service.all().await.unwrap(), vec![created.clone()]);

        let updated = service
            .update(&created.id, BookRequiredProps::new("Dune Messiah", 8.0, "More sand"))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name, "Dune Messiah");

        service.delete(&created.id).await.unwrap();
        assert!(service.all().await.unwrap().is_empty());
        assert_eq!(
            service.calls(),
            ServiceCalls {
                all: 2,
                create: 1,
                update: 1,
                delete: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_missing_books_are_not_found() {
        let service = InMemoryBooksService::new();

        assert_eq!(
            service.delete(&id("9")).await,
            Err(ServiceError::NotFound(id("9")))
        );
        assert_eq!(
            service.update(&id("9"), BookRequiredProps::new("x", 0.0, "")).await,
            Err(ServiceError::NotFound(id("9")))
        );
    }

    #[tokio::test]
    async fn test_outage_is_transient() {
        let service = InMemoryBooksService::new();
        service.set_available(false);

        let error = service.all().await.unwrap_err();
        assert!(matches!(error, ServiceError::Unavailable(_)));
        assert!(EffectError::from(error).is_retryable());

        service.set_available(true);
        assert!(service.all().await.is_ok());
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected() {
        let service = InMemoryBooksService::new();
        let error = service.create(BookRequiredProps::new(" ", 1.0, "")).await.unwrap_err();

        assert_eq!(error, ServiceError::Rejected("book name must not be empty".to_string()));
        assert!(!EffectError::from(error).is_retryable());
    }
}
