//! # Stately Core
//!
//! Core traits and types for a unidirectional state pipeline.
//!
//! State changes only through pure reducers driven by discrete actions.
//! Derived views are read through memoized selectors, and asynchronous side
//! effects are described as values that the runtime executes under a
//! per-effect concurrency policy.
//!
//! ## Core Concepts
//!
//! - **Action**: Immutable, uniquely-typed event record (intent or completion)
//! - **State**: Immutable tree of independently reducible slices behind `Arc`
//! - **Reducer**: Pure function `(&Arc<State>, &Action) → Arc<State>`
//! - **Selector**: Memoized derivation of a read view from state
//! - **Effect**: Description of asynchronous work that produces follow-up actions
//!
//! ## Architecture Principles
//!
//! - Unidirectional Data Flow
//! - Referential identity as the change signal (`Arc::ptr_eq`)
//! - Explicit Effects (no hidden I/O in reducers)
//! - Dependency Injection via Environment traits
//!
//! ## Example
//!
//! ```ignore
//! use stately_core::reducer::{Reducer, ReducerError};
//! use std::sync::Arc;
//!
//! impl Reducer for CounterReducer {
//!     type State = CounterState;
//!     type Action = CounterAction;
//!
//!     fn reduce(
//!         &self,
//!         state: &Arc<CounterState>,
//!         action: &CounterAction,
//!     ) -> Result<Arc<CounterState>, ReducerError> {
//!         match action {
//!             CounterAction::Increment => Ok(Arc::new(CounterState { count: state.count + 1 })),
//!             _ => Ok(Arc::clone(state)),
//!         }
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};

#[doc(hidden)]
pub mod __private {
    pub use futures;
}

/// Reducer composition utilities (slice scoping and combination)
pub mod composition;

/// Memoized selectors
pub mod selector;

/// Declarative macros for effect construction
pub mod effect_macros;

/// Action module - the discriminated event records that drive every transition
///
/// Actions are plain enums. Each variant carries a unique, non-empty type
/// string (its discriminator across the whole system) and a payload whose
/// shape is fixed by the variant. `#[derive(Action)]` from `stately-macros`
/// implements [`Action`](action::Action) and rejects empty or duplicated
/// type strings at compile time.
pub mod action {
    use thiserror::Error;

    /// The Action trait - uniquely typed, immutable event records
    ///
    /// Implementations are normally generated by `#[derive(Action)]`.
    pub trait Action: Clone + std::fmt::Debug + Send + Sync + 'static {
        /// Every type string this action enum can carry, in declaration order
        const ACTION_TYPES: &'static [&'static str];

        /// The discriminator of this action
        fn action_type(&self) -> &'static str;

        /// True for intents (requests issued by the presentation layer)
        fn is_command(&self) -> bool;

        /// True for completions (facts reported back by collaborators)
        fn is_event(&self) -> bool;
    }

    /// Errors raised when a runtime type string is validated
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ActionTypeError {
        /// The type string is empty or whitespace
        #[error("action type must not be empty")]
        Empty,

        /// The type string is not declared by the action enum
        #[error("unknown action type: {0}")]
        Unknown(String),
    }

    /// Validate a type string against the types declared by `A`
    ///
    /// Returns the canonical `'static` type string on success.
    ///
    /// # Errors
    ///
    /// Returns [`ActionTypeError::Empty`] for blank input and
    /// [`ActionTypeError::Unknown`] when `A` does not declare the type.
    pub fn validate_action_type<A: Action>(candidate: &str) -> Result<&'static str, ActionTypeError> {
        if candidate.trim().is_empty() {
            return Err(ActionTypeError::Empty);
        }

        A::ACTION_TYPES
            .iter()
            .copied()
            .find(|known| *known == candidate)
            .ok_or_else(|| ActionTypeError::Unknown(candidate.to_string()))
    }
}

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure functions: `(State, Action) → State`.
///
/// A reducer never mutates the state it receives. It returns a new `Arc`
/// whenever any field changed, and the *same* `Arc` when nothing changed.
/// Selectors rely on that identity contract to skip recomputation.
pub mod reducer {
    use std::sync::Arc;
    use thiserror::Error;

    /// Fatal reducer failures
    ///
    /// Expected inputs never produce an error. An error means the state
    /// machine would be corrupted by the transition (for example a duplicate
    /// entity identifier), so the transition is discarded and the failure is
    /// surfaced to the dispatcher.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ReducerError {
        /// A slice invariant would be broken by this transition
        #[error("reducer invariant violated: {0}")]
        InvariantViolated(String),

        /// A nested slice rejected the transition
        #[error("slice `{slice}` failed: {source}")]
        Slice {
            /// Name the slice was registered under
            slice: &'static str,
            /// The underlying failure
            #[source]
            source: Box<ReducerError>,
        },
    }

    impl ReducerError {
        /// Build an invariant violation from any displayable reason
        #[must_use]
        pub fn invariant(reason: impl Into<String>) -> Self {
            Self::InvariantViolated(reason.into())
        }
    }

    /// The Reducer trait - pure state transitions
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for BooksReducer {
    ///     type State = BooksState;
    ///     type Action = BookAction;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &Arc<BooksState>,
    ///         action: &BookAction,
    ///     ) -> Result<Arc<BooksState>, ReducerError> {
    ///         match action {
    ///             BookAction::SelectBook { book_id } => Ok(state.with_active(Some(book_id.clone()))),
    ///             _ => Ok(Arc::clone(state)),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer: Send + Sync {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// Reduce an action into the next state
        ///
        /// Unmatched actions must return `Arc::clone(state)`.
        ///
        /// # Errors
        ///
        /// Returns [`ReducerError`] only for invariant violations.
        fn reduce(
            &self,
            state: &Arc<Self::State>,
            action: &Self::Action,
        ) -> Result<Arc<Self::State>, ReducerError>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values, not execution. An effect handler returns one and the
/// orchestrator in `stately-runtime` runs it under the effect's
/// [`ConcurrencyPolicy`](effect::ConcurrencyPolicy).
pub mod effect {
    use futures::Stream;
    use std::future::Future;
    use std::pin::Pin;
    use thiserror::Error;

    /// Boxed future resolving to one follow-up action
    pub type EffectFuture<A> = Pin<Box<dyn Future<Output = Result<A, EffectError>> + Send>>;

    /// Boxed stream of follow-up actions
    pub type EffectStream<A> = Pin<Box<dyn Stream<Item = Result<A, EffectError>> + Send>>;

    /// Effect type - describes the asynchronous work triggered by an action
    pub enum Effect<Action> {
        /// Nothing to do for this trigger
        None,

        /// One call to a collaborator, producing exactly one follow-up action
        Future(EffectFuture<Action>),

        /// A sequence of follow-up actions; the invocation ends with the stream
        Stream(EffectStream<Action>),
    }

    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Stream(_) => write!(f, "Effect::Stream(<stream>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap a future resolving to a follow-up action
        #[must_use]
        pub fn from_future<F>(future: F) -> Self
        where
            F: Future<Output = Result<Action, EffectError>> + Send + 'static,
        {
            Effect::Future(Box::pin(future))
        }

        /// Wrap a stream of follow-up actions
        #[must_use]
        pub fn from_stream<S>(stream: S) -> Self
        where
            S: Stream<Item = Result<Action, EffectError>> + Send + 'static,
        {
            Effect::Stream(Box::pin(stream))
        }

        /// True when the effect does no work
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }

    /// How overlapping invocations of one effect are handled
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ConcurrencyPolicy {
        /// Ignore triggers while an invocation is in flight
        Exhaust,

        /// Queue triggers and run invocations one at a time in arrival order
        Concat,

        /// Start an invocation for every trigger; completions may interleave
        Merge,
    }

    impl ConcurrencyPolicy {
        /// Stable lowercase name (used in logs and metric labels)
        #[must_use]
        pub const fn as_str(self) -> &'static str {
            match self {
                Self::Exhaust => "exhaust",
                Self::Concat => "concat",
                Self::Merge => "merge",
            }
        }
    }

    impl std::fmt::Display for ConcurrencyPolicy {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Recoverable failures raised while running an effect
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum EffectError {
        /// The external collaborator reported a failure
        #[error("collaborator failed: {message}")]
        Collaborator {
            /// Human readable failure description
            message: String,
            /// Whether repeating the call may succeed
            retryable: bool,
        },

        /// The effect handler or its future panicked
        #[error("effect panicked: {0}")]
        Panicked(String),
    }

    impl EffectError {
        /// A permanent collaborator failure
        #[must_use]
        pub fn collaborator(message: impl Into<String>) -> Self {
            Self::Collaborator {
                message: message.into(),
                retryable: false,
            }
        }

        /// A transient collaborator failure worth retrying
        #[must_use]
        pub fn transient(message: impl Into<String>) -> Self {
            Self::Collaborator {
                message: message.into(),
                retryable: true,
            }
        }

        /// Whether a retry policy should repeat the invocation
        #[must_use]
        pub const fn is_retryable(&self) -> bool {
            matches!(self, Self::Collaborator { retryable: true, .. })
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and handed to
/// effect handlers through an environment value.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use action::Action;
pub use composition::{CombinedReducer, Reduction, SliceFailure, combine_slices, scope_reducer};
pub use effect::{ConcurrencyPolicy, Effect, EffectError};
pub use reducer::{Reducer, ReducerError};
pub use selector::{Identity, Selector};

#[cfg(test)]
mod tests {
    use super::action::{Action, ActionTypeError, validate_action_type};
    use super::effect::{ConcurrencyPolicy, Effect, EffectError};

    #[derive(Clone, Debug)]
    enum PingAction {
        Ping,
        Pong,
    }

    impl Action for PingAction {
        const ACTION_TYPES: &'static [&'static str] = &["[Test] Ping", "[Test] Pong"];

        fn action_type(&self) -> &'static str {
            match self {
                Self::Ping => "[Test] Ping",
                Self::Pong => "[Test] Pong",
            }
        }

        fn is_command(&self) -> bool {
            matches!(self, Self::Ping)
        }

        fn is_event(&self) -> bool {
            matches!(self, Self::Pong)
        }
    }

    #[test]
    fn validate_action_type_accepts_declared_types() {
        assert_eq!(validate_action_type::<PingAction>("[Test] Pong"), Ok("[Test] Pong"));
        assert_eq!(PingAction::Ping.action_type(), "[Test] Ping");
        assert!(PingAction::Ping.is_command());
        assert!(PingAction::Pong.is_event());
    }

    #[test]
    fn validate_action_type_rejects_blank_and_unknown() {
        assert_eq!(validate_action_type::<PingAction>("  "), Err(ActionTypeError::Empty));
        assert_eq!(
            validate_action_type::<PingAction>("[Test] Pang"),
            Err(ActionTypeError::Unknown("[Test] Pang".to_string()))
        );
    }

    #[test]
    fn effect_debug_hides_futures() {
        let none: Effect<PingAction> = Effect::None;
        let future = Effect::from_future(async { Ok(PingAction::Pong) });

        assert_eq!(format!("{none:?}"), "Effect::None");
        assert_eq!(format!("{future:?}"), "Effect::Future(<future>)");
        assert!(none.is_none());
        assert!(!future.is_none());
    }

    #[test]
    fn effect_errors_classify_retries() {
        assert!(EffectError::transient("timeout").is_retryable());
        assert!(!EffectError::collaborator("bad request").is_retryable());
        assert!(!EffectError::Panicked("boom".into()).is_retryable());
    }

    #[test]
    fn concurrency_policy_names() {
        assert_eq!(ConcurrencyPolicy::Exhaust.to_string(), "exhaust");
        assert_eq!(ConcurrencyPolicy::Concat.as_str(), "concat");
        assert_eq!(ConcurrencyPolicy::Merge.as_str(), "merge");
    }
}
