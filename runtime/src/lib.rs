//! # Stately Runtime
//!
//! Runtime implementation for the Stately state pipeline.
//!
//! This crate provides the Store that owns the state tree and applies
//! reducers, and the Effect Orchestrator that bridges actions to external
//! collaborators under per-effect concurrency policies.
//!
//! ## Core Components
//!
//! - **Store**: Owns state, runs the root reducer on every dispatch, notifies
//!   listeners and publishes the action stream
//! - **Effect Orchestrator**: Subscribes to the action stream, runs matching
//!   effects (exhaust/concat/merge) and dispatches follow-up actions
//! - **Dead Letter Queue**: Keeps effect failures that no handler claimed
//!
//! ## Example
//!
//! ```ignore
//! use stately_runtime::{EffectDefinition, EffectOrchestrator, Store};
//!
//! let store = Store::new(AppState::default(), root_reducer());
//! let mut orchestrator = EffectOrchestrator::new(store.clone());
//! orchestrator.register(load_books(env.clone()))?;
//!
//! store.dispatch(BookAction::Enter)?;
//! let books = store.select(&selectors.all_books);
//! ```

use crate::metrics::DlqMetrics;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// The Store: state ownership, dispatch, subscriptions, action stream
pub mod store;

/// The Effect Orchestrator: effect definitions and policy workers
pub mod orchestrator;

/// Error types for the Store and the Effect Orchestrator
pub mod error {
    use stately_core::action::ActionTypeError;
    use stately_core::composition::SliceFailure;
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// One or more slice reducers rejected an action
        ///
        /// Slices that did not fail have committed their changes. The
        /// failures cover every action drained by this dispatch call,
        /// including actions queued by listeners while it was running.
        #[error("{} slice reducer failure(s), first: {}", .failures.len(), first_failure(.failures))]
        ReducerFailed {
            /// Every failure, in processing order
            failures: Vec<SliceFailure>,
        },

        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Timeout waiting for a matching action
        ///
        /// Returned by `dispatch_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action stream closed before a matching action arrived
        #[error("Action stream closed")]
        ChannelClosed,
    }

    fn first_failure(failures: &[SliceFailure]) -> String {
        failures
            .first()
            .map_or_else(|| "none".to_string(), ToString::to_string)
    }

    /// Errors raised by the Effect Orchestrator
    ///
    /// Every variant is a programming error: the effect wiring is
    /// inconsistent with the action enum or with the reducers.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum OrchestratorError {
        /// The effect declares no triggering action type
        #[error("effect `{effect}` has no triggering action type")]
        NoTriggers {
            /// Effect name
            effect: &'static str,
        },

        /// A trigger or emitted type is not declared by the action enum
        #[error("effect `{effect}` references an invalid action type: {source}")]
        InvalidActionType {
            /// Effect name
            effect: &'static str,
            /// Validation failure
            #[source]
            source: ActionTypeError,
        },

        /// Another effect is already registered under this name
        #[error("effect `{0}` is already registered")]
        DuplicateEffect(&'static str),

        /// The effect produced an action outside its declared output types
        #[error("effect `{effect}` produced undeclared action type `{action_type}`")]
        UndeclaredOutput {
            /// Effect name
            effect: &'static str,
            /// The offending action type
            action_type: &'static str,
        },

        /// Dispatching a follow-up action failed in the reducers
        #[error("effect `{effect}` follow-up dispatch failed: {source}")]
        Dispatch {
            /// Effect name
            effect: &'static str,
            /// The store failure
            #[source]
            source: StoreError,
        },
    }
}

/// Runtime configuration (store and orchestrator)
pub mod config;

/// Dead letter queue entry
///
/// Represents an effect failure that no error handler claimed.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The action that triggered the failed invocation
    pub payload: T,

    /// Name of the effect that failed
    pub effect: &'static str,

    /// Number of attempts made (1 when no retry was configured)
    pub attempts: usize,

    /// The error message from the last failure
    pub error_message: String,

    /// When the failure was recorded
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

/// Bounded, shared queue of effect failures no error handler claimed
///
/// Clones share the same entries. Once `max_size` entries are held, each
/// push evicts the oldest one.
///
/// # Example
///
/// ```ignore
/// let dlq = orchestrator.dead_letters();
///
/// for entry in dlq.drain() {
///     println!("{} failed on {:?}: {}", entry.effect, entry.payload, entry.error_message);
/// }
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a new dead letter queue with the given max size
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Push a failed invocation onto the queue
    ///
    /// If the queue is full, the oldest entry is dropped.
    pub fn push(&self, payload: T, effect: &'static str, error_message: String, attempts: usize) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if self.max_size == 0 {
            DlqMetrics::record_drop(effect);
            return;
        }

        // Drop oldest if at capacity
        if queue.len() >= self.max_size {
            queue.pop_front();
            DlqMetrics::record_drop(effect);
            tracing::warn!(
                max_size = self.max_size,
                "DLQ at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            payload,
            effect,
            attempts,
            error_message,
            failed_at: chrono::Utc::now(),
        });

        DlqMetrics::record_push(effect, queue.len());

        tracing::warn!(
            effect,
            attempts,
            queue_size = queue.len(),
            "Effect failure added to dead letter queue"
        );
    }

    /// Get the current queue size
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all entries from the queue
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        DlqMetrics::record_drain(entries.len());

        tracing::info!(count = entries.len(), "Drained dead letter queue");

        entries
    }

    /// Peek at the oldest entry without removing it
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Get the maximum queue size
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Guard that decrements an atomic counter on drop (in-flight tracking)
#[derive(Debug)]
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl AtomicCounterGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub use config::{ConfigError, OrchestratorConfig, StoreConfig};
pub use error::{OrchestratorError, StoreError};
pub use orchestrator::{EffectDefinition, EffectOrchestrator};
pub use retry::RetryPolicy;
pub use store::{ActionStream, Store, Subscription};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlq_drops_oldest_when_full() {
        let dlq = DeadLetterQueue::new(2);
        dlq.push("a", "load", "timeout".to_string(), 1);
        dlq.push("b", "load", "timeout".to_string(), 1);
        dlq.push("c", "delete", "refused".to_string(), 3);

        assert_eq!(dlq.len(), 2);
        let oldest = dlq.peek().map(|entry| entry.payload);
        assert_eq!(oldest, Some("b"));

        let drained = dlq.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].effect, "delete");
        assert_eq!(drained[1].attempts, 3);
        assert!(dlq.is_empty());
    }

    #[test]
    fn test_dlq_clone_shares_storage() {
        let dlq = DeadLetterQueue::default();
        let view = dlq.clone();
        dlq.push(1_u8, "merge", "boom".to_string(), 1);

        assert_eq!(view.len(), 1);
        assert_eq!(view.max_size(), 1000);
    }

    #[test]
    fn test_zero_capacity_dlq_keeps_nothing() {
        let dlq = DeadLetterQueue::new(0);
        dlq.push((), "load", "boom".to_string(), 1);
        assert!(dlq.is_empty());
    }

    #[test]
    fn test_counter_guard_releases_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = AtomicCounterGuard::acquire(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_store_error_display_names_first_failure() {
        use stately_core::composition::SliceFailure;
        use stately_core::reducer::ReducerError;

        let error = StoreError::ReducerFailed {
            failures: vec![SliceFailure {
                slice: "books",
                action_type: "[Books API] Book Created",
                error: ReducerError::invariant("duplicate book id 1"),
            }],
        };

        let message = error.to_string();
        assert!(message.starts_with("1 slice reducer failure(s)"));
        assert!(message.contains("slice `books` rejected `[Books API] Book Created`"));
    }
}
