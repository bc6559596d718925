//! Wiring of the books application: store, selectors and effects.

use crate::actions::BookAction;
use crate::effects::{BooksEnvironment, register_book_effects};
use crate::model::Book;
use crate::reducer::root_reducer;
use crate::selectors::BookSelectors;
use crate::state::{ApiFailure, AppState};
use stately_runtime::{
    DeadLetterQueue, EffectOrchestrator, OrchestratorConfig, OrchestratorError, Store, StoreConfig,
    StoreError,
};
use std::sync::Arc;

/// A running books application
///
/// # Example
///
/// ```ignore
/// let app = BooksApp::start(BooksEnvironment::new(service))?;
/// app.dispatch(BookAction::Enter)?;
/// // ... once BooksLoaded has been reduced
/// println!("{} books, {:.2} earned", app.books().len(), app.earnings_total());
/// app.shutdown().await?;
/// ```
#[derive(Debug)]
pub struct BooksApp {
    store: Store<AppState, BookAction>,
    selectors: BookSelectors,
    orchestrator: EffectOrchestrator<AppState, BookAction>,
}

impl BooksApp {
    /// Starts the application with default configuration
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the book effects fail to register.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(env: BooksEnvironment) -> Result<Self, OrchestratorError> {
        Self::start_with(
            env,
            StoreConfig::default().with_label("books"),
            OrchestratorConfig::default(),
        )
    }

    /// Starts the application with explicit store and orchestrator configuration
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the book effects fail to register.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start_with(
        env: BooksEnvironment,
        store_config: StoreConfig,
        orchestrator_config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        let store = Store::with_config(AppState::default(), root_reducer(), store_config);
        let mut orchestrator = EffectOrchestrator::with_config(store.clone(), orchestrator_config);
        register_book_effects(&mut orchestrator, &env)?;

        tracing::info!(effects = orchestrator.effects().len(), "Books application started");
        Ok(Self {
            store,
            selectors: BookSelectors::new(),
            orchestrator,
        })
    }

    /// Dispatches an action to the store
    ///
    /// # Errors
    ///
    /// See [`Store::dispatch`].
    pub fn dispatch(&self, action: BookAction) -> Result<(), StoreError> {
        self.store.dispatch(action)
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &Store<AppState, BookAction> {
        &self.store
    }

    /// The selector graph
    #[must_use]
    pub const fn selectors(&self) -> &BookSelectors {
        &self.selectors
    }

    /// Every loaded book
    #[must_use]
    pub fn books(&self) -> Arc<Vec<Book>> {
        self.store.select(&self.selectors.all_books)
    }

    /// The book open in the editor
    #[must_use]
    pub fn active_book(&self) -> Option<Book> {
        self.store.select(&self.selectors.active_book)
    }

    /// Sum of the earnings of every loaded book
    #[must_use]
    pub fn earnings_total(&self) -> f64 {
        self.store.select(&self.selectors.earnings_total)
    }

    /// Most recent failed request, until the next success
    #[must_use]
    pub fn last_failure(&self) -> Option<ApiFailure> {
        self.store.select(&self.selectors.last_api_failure)
    }

    /// Failures no effect handled
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<BookAction> {
        self.orchestrator.dead_letters()
    }

    /// Stops the effects, then the store
    ///
    /// # Errors
    ///
    /// Returns the first wiring error raised by any effect.
    pub async fn shutdown(self) -> Result<(), OrchestratorError> {
        let result = self.orchestrator.shutdown().await;
        self.store.shutdown();
        result
    }
}
