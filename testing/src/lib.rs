//! # Stately Testing
//!
//! Testing utilities and helpers for the Stately state pipeline.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - Controllable collaborators for effect concurrency tests
//! - Helpers for awaiting actions on a store's action stream
//! - Given-When-Then reducer tests and property checks
//!
//! ## Example
//!
//! ```ignore
//! use stately_testing::helpers::wait_for_action;
//!
//! #[tokio::test]
//! async fn test_enter_loads_books() {
//!     let app = BooksApp::in_memory(seeded_service());
//!     let mut actions = app.store.actions();
//!
//!     app.store.dispatch(BookAction::Enter)?;
//!
//!     let loaded = wait_for_action(&mut actions, |a| matches!(a, BookAction::BooksLoaded { .. }), TIMEOUT).await;
//!     assert!(loaded.is_some());
//! }
//! ```

use chrono::{DateTime, Utc};
use stately_core::environment::Clock;


/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::Semaphore;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use stately_testing::mocks::FixedClock;
    /// use stately_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Holds collaborator calls until the test lets them through
    ///
    /// A gate starts closed. Every [`Gate::pass`] waits for one permit;
    /// [`Gate::open`] hands out permits. Useful to keep an effect invocation
    /// in flight while more triggers arrive.
    #[derive(Debug, Clone)]
    pub struct Gate {
        permits: Arc<Semaphore>,
        waiting: Arc<AtomicUsize>,
    }

    impl Gate {
        /// A gate with no permits
        #[must_use]
        pub fn closed() -> Self {
            Self {
                permits: Arc::new(Semaphore::new(0)),
                waiting: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// A gate that never blocks
        #[must_use]
        pub fn opened() -> Self {
            let gate = Self::closed();
            gate.permits.add_permits(Semaphore::MAX_PERMITS / 2);
            gate
        }

        /// Wait until a permit is available and consume it
        pub async fn pass(&self) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.permits.acquire().await {
                permit.forget();
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        /// Let `count` waiting or future calls through
        pub fn open(&self, count: usize) {
            self.permits.add_permits(count);
        }

        /// Calls currently blocked on the gate
        #[must_use]
        pub fn waiting(&self) -> usize {
            self.waiting.load(Ordering::SeqCst)
        }
    }

    /// Ordered, thread-safe log of named events
    ///
    /// Collaborator mocks record when calls start and finish so tests can
    /// assert interleavings.
    #[derive(Debug, Clone, Default)]
    pub struct EventLog {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl EventLog {
        /// Create an empty log
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Append an entry
        pub fn record(&self, entry: impl Into<String>) {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry.into());
        }

        /// Snapshot of all entries in recording order
        #[must_use]
        pub fn entries(&self) -> Vec<String> {
            self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Number of entries equal to `entry`
        #[must_use]
        pub fn count(&self, entry: &str) -> usize {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|recorded| recorded.as_str() == entry)
                .count()
        }
    }

    /// Records every state a store listener receives
    ///
    /// ```ignore
    /// let recorder = StateRecorder::new();
    /// let _subscription = store.subscribe(recorder.listener());
    /// store.dispatch(action)?;
    /// assert_eq!(recorder.len(), 1);
    /// ```
    #[derive(Debug)]
    pub struct StateRecorder<S> {
        snapshots: Arc<Mutex<Vec<Arc<S>>>>,
    }

    impl<S> Clone for StateRecorder<S> {
        fn clone(&self) -> Self {
            Self {
                snapshots: Arc::clone(&self.snapshots),
            }
        }
    }

    impl<S> Default for StateRecorder<S> {
        fn default() -> Self {
            Self {
                snapshots: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl<S: Send + Sync + 'static> StateRecorder<S> {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A listener to pass to `Store::subscribe`
        pub fn listener(&self) -> impl Fn(&Arc<S>) + Send + Sync + 'static {
            let snapshots = Arc::clone(&self.snapshots);
            move |state| {
                snapshots
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Arc::clone(state));
            }
        }

        /// Every state received, in notification order
        #[must_use]
        pub fn snapshots(&self) -> Vec<Arc<S>> {
            self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Number of notifications received
        #[must_use]
        pub fn len(&self) -> usize {
            self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        /// True when no notification was received
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// The most recent state received
        #[must_use]
        pub fn last(&self) -> Option<Arc<S>> {
            self.snapshots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .last()
                .cloned()
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use stately_runtime::ActionStream;
    use std::time::Duration;
    use tracing_subscriber::EnvFilter;

    /// Wait for the first action matching `predicate`
    ///
    /// Non-matching actions are consumed. Returns `None` on timeout or when
    /// the stream closes.
    pub async fn wait_for_action<A, F>(
        stream: &mut ActionStream<A>,
        predicate: F,
        timeout: Duration,
    ) -> Option<A>
    where
        F: Fn(&A) -> bool,
    {
        tokio::time::timeout(timeout, async {
            while let Some(action) = stream.recv().await {
                if predicate(&action) {
                    return Some(action);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Collect up to `count` actions, stopping early on timeout
    pub async fn collect_actions<A>(
        stream: &mut ActionStream<A>,
        count: usize,
        timeout: Duration,
    ) -> Vec<A> {
        let mut collected = Vec::with_capacity(count);
        let deadline = tokio::time::Instant::now() + timeout;

        while collected.len() < count {
            match tokio::time::timeout_at(deadline, stream.recv()).await {
                Ok(Some(action)) => collected.push(action),
                Ok(None) | Err(_) => break,
            }
        }

        collected
    }

    /// Poll `condition` until it holds or `timeout` expires
    pub async fn eventually<F>(condition: F, timeout: Duration) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Install a test-friendly tracing subscriber (`RUST_LOG`, default `warn`)
    ///
    /// Safe to call from every test; only the first call installs it.
    pub fn init_test_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use stately_core::reducer::Reducer;
    use std::fmt::Debug;
    use std::sync::Arc;

    /// Check that a reducer is pure for one input
    ///
    /// Reduces the same state and action twice and requires equal outcomes
    /// and an untouched input. Meant for use inside `proptest!` blocks.
    ///
    /// # Errors
    ///
    /// Returns a [`TestCaseError`] describing the first violated property.
    pub fn check_pure<R>(reducer: &R, state: &Arc<R::State>, action: &R::Action) -> Result<(), TestCaseError>
    where
        R: Reducer,
        R::State: Clone + PartialEq + Debug,
    {
        let snapshot = (**state).clone();
        let first = reducer.reduce(state, action);
        let second = reducer.reduce(state, action);

        prop_assert_eq!(&**state, &snapshot, "reducer mutated its input");

        match (first, second) {
            (Ok(first), Ok(second)) => prop_assert_eq!(&*first, &*second),
            (Err(first), Err(second)) => prop_assert_eq!(first, second),
            (first, second) => {
                return Err(TestCaseError::fail(format!(
                    "reducer outcome differs between runs: {first:?} vs {second:?}"
                )));
            }
        }

        Ok(())
    }

    /// Check that a reducer returns the very same `Arc` for an action it
    /// does not handle
    ///
    /// # Errors
    ///
    /// Returns a [`TestCaseError`] when the reducer fails or allocates a new
    /// state.
    pub fn check_identity_no_op<R>(reducer: &R, state: &Arc<R::State>, action: &R::Action) -> Result<(), TestCaseError>
    where
        R: Reducer,
        R::Action: Debug,
    {
        match reducer.reduce(state, action) {
            Ok(next) => {
                prop_assert!(Arc::ptr_eq(state, &next), "{action:?} produced a new state");
                Ok(())
            }
            Err(error) => Err(TestCaseError::fail(format!("{action:?} was rejected: {error}"))),
        }
    }
}

// Re-export commonly used items
pub use mocks::{EventLog, FixedClock, Gate, StateRecorder, test_clock};
pub use reducer_test::ReducerTest;
