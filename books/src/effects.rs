//! Effects bridging book intents to the [`BooksService`].
//!
//! | effect        | trigger       | policy  | success          |
//! |---------------|---------------|---------|------------------|
//! | `load_books`  | `Enter`       | exhaust | `BooksLoaded`    |
//! | `create_book` | `CreateBook`  | concat  | `BookCreated`    |
//! | `update_book` | `UpdateBook`  | concat  | `BookUpdated`    |
//! | `delete_book` | `DeleteBook`  | merge   | `BookDeleted`    |
//!
//! Every failure becomes a `RequestFailed` completion.

use crate::actions::{ApiOperation, BookAction};
use crate::service::BooksService;
use crate::state::AppState;
use stately_core::action::Action as _;
use stately_core::async_effect;
use stately_core::effect::{ConcurrencyPolicy, Effect, EffectError};
use stately_core::environment::{Clock, SystemClock};
use stately_runtime::{EffectDefinition, EffectOrchestrator, OrchestratorError, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators handed to the book effects
#[derive(Clone)]
pub struct BooksEnvironment {
    /// Books service
    pub service: Arc<dyn BooksService>,
    /// Timestamps failure completions
    pub clock: Arc<dyn Clock>,
    /// Retry policy of `load_books`
    pub load_retry: RetryPolicy,
}

impl BooksEnvironment {
    /// Environment with the system clock and the default load retry
    #[must_use]
    pub fn new(service: Arc<dyn BooksService>) -> Self {
        Self {
            service,
            clock: Arc::new(SystemClock),
            load_retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(50))
                .build(),
        }
    }

    /// Replaces the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the retry policy of `load_books`
    #[must_use]
    pub fn with_load_retry(mut self, policy: RetryPolicy) -> Self {
        self.load_retry = policy;
        self
    }

    fn request_failed(&self, operation: ApiOperation, error: &EffectError) -> BookAction {
        let message = match error {
            EffectError::Collaborator { message, .. } => message.clone(),
            EffectError::Panicked(_) => error.to_string(),
        };
        BookAction::RequestFailed {
            operation,
            message,
            at: self.clock.now(),
        }
    }
}

impl std::fmt::Debug for BooksEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BooksEnvironment")
            .field("load_retry", &self.load_retry)
            .finish_non_exhaustive()
    }
}

fn failure_handler(
    env: &BooksEnvironment,
    operation: ApiOperation,
) -> impl Fn(&EffectError, &BookAction) -> Option<BookAction> + Send + Sync + 'static {
    let env = env.clone();
    move |error, trigger| {
        tracing::warn!(
            operation = %operation,
            trigger = trigger.action_type(),
            error = %error,
            "Books request failed"
        );
        Some(env.request_failed(operation, error))
    }
}

/// Fetches the collection when the page is entered
///
/// Re-entering while a load is in flight does not start a second one.
#[must_use]
pub fn load_books(env: &BooksEnvironment) -> EffectDefinition<BookAction> {
    let service = Arc::clone(&env.service);
    EffectDefinition::new("load_books", ConcurrencyPolicy::Exhaust, move |_| {
        let service = Arc::clone(&service);
        async_effect! {
            let books = service.all().await.map_err(EffectError::from)?;
            Ok(BookAction::BooksLoaded { books })
        }
    })
    .triggered_by([BookAction::ENTER])
    .emits([BookAction::BOOKS_LOADED, BookAction::REQUEST_FAILED])
    .on_error(failure_handler(env, ApiOperation::Load))
    .with_retry(env.load_retry.clone())
}

/// Creates books one at a time, in the order they were saved
#[must_use]
pub fn create_book(env: &BooksEnvironment) -> EffectDefinition<BookAction> {
    let service = Arc::clone(&env.service);
    EffectDefinition::new("create_book", ConcurrencyPolicy::Concat, move |action| {
        let BookAction::CreateBook { book } = action else {
            return Effect::None;
        };
        let service = Arc::clone(&service);
        async_effect! {
            let book = service.create(book).await.map_err(EffectError::from)?;
            Ok(BookAction::BookCreated { book })
        }
    })
    .triggered_by([BookAction::CREATE_BOOK])
    .emits([BookAction::BOOK_CREATED, BookAction::REQUEST_FAILED])
    .on_error(failure_handler(env, ApiOperation::Create))
    .with_retry(RetryPolicy::none())
}

/// Applies edits one at a time, in the order they were saved
#[must_use]
pub fn update_book(env: &BooksEnvironment) -> EffectDefinition<BookAction> {
    let service = Arc::clone(&env.service);
    EffectDefinition::new("update_book", ConcurrencyPolicy::Concat, move |action| {
        let BookAction::UpdateBook { book_id, changes } = action else {
            return Effect::None;
        };
        let service = Arc::clone(&service);
        async_effect! {
            let book = service.update(&book_id, changes).await.map_err(EffectError::from)?;
            Ok(BookAction::BookUpdated { book })
        }
    })
    .triggered_by([BookAction::UPDATE_BOOK])
    .emits([BookAction::BOOK_UPDATED, BookAction::REQUEST_FAILED])
    .on_error(failure_handler(env, ApiOperation::Update))
    .with_retry(RetryPolicy::none())
}

/// Deletes books concurrently
#[must_use]
pub fn delete_book(env: &BooksEnvironment) -> EffectDefinition<BookAction> {
    let service = Arc::clone(&env.service);
    EffectDefinition::new("delete_book", ConcurrencyPolicy::Merge, move |action| {
        let BookAction::DeleteBook { book_id } = action else {
            return Effect::None;
        };
        let service = Arc::clone(&service);
        async_effect! {
            service.delete(&book_id).await.map_err(EffectError::from)?;
            Ok(BookAction::BookDeleted { book_id })
        }
    })
    .triggered_by([BookAction::DELETE_BOOK])
    .emits([BookAction::BOOK_DELETED, BookAction::REQUEST_FAILED])
    .on_error(failure_handler(env, ApiOperation::Delete))
    .with_retry(RetryPolicy::none())
}

/// Registers the four book effects
///
/// # Errors
///
/// Returns [`OrchestratorError`] when an effect is already registered.
pub fn register_book_effects(
    orchestrator: &mut EffectOrchestrator<AppState, BookAction>,
    env: &BooksEnvironment,
) -> Result<(), OrchestratorError> {
    orchestrator.register(load_books(env))?;
    orchestrator.register(create_book(env))?;
    orchestrator.register(update_book(env))?;
    orchestrator.register(delete_book(env))?;
    Ok(())
}
