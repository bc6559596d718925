//! Reducer composition utilities
//!
//! This module provides utilities for composing reducers over a state tree
//! made of independently reducible slices:
//! - **`scope_reducer`**: Focus a slice reducer on one branch of the root state
//! - **`CombinedReducer`**: Run every registered slice reducer for each action,
//!   collecting per-slice failures instead of aborting the whole transition
//!
//! # Examples
//!
//! ```ignore
//! use stately_core::composition::{CombinedReducer, scope_reducer};
//!
//! fn books(state: &AppState) -> &Arc<BooksState> {
//!     &state.books
//! }
//!
//! fn with_books(state: &AppState, books: Arc<BooksState>) -> AppState {
//!     AppState { books, ..state.clone() }
//! }
//!
//! let root = CombinedReducer::new()
//!     .with_slice("books", scope_reducer(BooksReducer, books, with_books))
//!     .with_slice("api", scope_reducer(ApiStatusReducer, api, with_api));
//! ```

use crate::action::Action;
use crate::reducer::{Reducer, ReducerError};
use std::marker::PhantomData;
use std::sync::Arc;

/// A slice reducer that failed while processing one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceFailure {
    /// Name the slice was registered under
    pub slice: &'static str,
    /// Type of the action being processed
    pub action_type: &'static str,
    /// The failure raised by the slice reducer
    pub error: ReducerError,
}

impl std::fmt::Display for SliceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slice `{}` rejected `{}`: {}", self.slice, self.action_type, self.error)
    }
}

/// Outcome of running every slice reducer for one action.
///
/// `state` holds the committed root: slices that failed contribute no
/// change, slices that succeeded keep theirs.
#[derive(Debug)]
pub struct Reduction<S> {
    /// The next root state (the input `Arc` if nothing changed)
    pub state: Arc<S>,
    /// Slices that rejected the action
    pub failures: Vec<SliceFailure>,
}

impl<S> Reduction<S> {
    /// True when no slice failed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when the root state identity differs from `previous`
    #[must_use]
    pub fn changed(&self, previous: &Arc<S>) -> bool {
        !Arc::ptr_eq(&self.state, previous)
    }
}

type BoxedReducer<S, A> = Box<dyn Reducer<State = S, Action = A>>;

/// Root reducer made of named slice reducers.
///
/// Every slice sees every action, in registration order. Each slice works on
/// the root produced by the slices before it, so a slice only ever replaces
/// its own branch.
pub struct CombinedReducer<S, A>
where
    S: 'static,
    A: Action,
{
    slices: Vec<(&'static str, BoxedReducer<S, A>)>,
}

impl<S, A> Default for CombinedReducer<S, A>
where
    S: 'static,
    A: Action,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> std::fmt::Debug for CombinedReducer<S, A>
where
    S: 'static,
    A: Action,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedReducer")
            .field("slices", &self.slice_names())
            .finish()
    }
}

impl<S, A> CombinedReducer<S, A>
where
    S: 'static,
    A: Action,
{
    /// Create an empty root reducer
    #[must_use]
    pub const fn new() -> Self {
        Self { slices: Vec::new() }
    }

    /// Register a slice reducer under `name`
    #[must_use]
    pub fn with_slice<R>(mut self, name: &'static str, reducer: R) -> Self
    where
        R: Reducer<State = S, Action = A> + 'static,
    {
        self.slices.push((name, Box::new(reducer)));
        self
    }

    /// Names of the registered slices, in registration order
    #[must_use]
    pub fn slice_names(&self) -> Vec<&'static str> {
        self.slices.iter().map(|(name, _)| *name).collect()
    }

    /// Run every slice for `action`, isolating failures per slice.
    pub fn reduce_slices(&self, state: &Arc<S>, action: &A) -> Reduction<S> {
        let mut current = Arc::clone(state);
        let mut failures = Vec::new();

        for (name, reducer) in &self.slices {
            match reducer.reduce(&current, action) {
                Ok(next) => current = next,
                Err(error) => failures.push(SliceFailure {
                    slice: *name,
                    action_type: action.action_type(),
                    error,
                }),
            }
        }

        Reduction {
            state: current,
            failures,
        }
    }
}

impl<S, A> Reducer for CombinedReducer<S, A>
where
    S: 'static,
    A: Action,
{
    type State = S;
    type Action = A;

    /// Nested use: any slice failure rejects the whole transition.
    fn reduce(&self, state: &Arc<S>, action: &A) -> Result<Arc<S>, ReducerError> {
        let reduction = self.reduce_slices(state, action);
        match reduction.failures.into_iter().next() {
            Some(failure) => Err(ReducerError::Slice {
                slice: failure.slice,
                source: Box::new(failure.error),
            }),
            None => Ok(reduction.state),
        }
    }
}

/// Build a root reducer from a list of named slices.
#[must_use]
pub fn combine_slices<S, A>(slices: Vec<(&'static str, BoxedReducer<S, A>)>) -> CombinedReducer<S, A>
where
    S: 'static,
    A: Action,
{
    CombinedReducer { slices }
}

/// Scopes a reducer to operate on one `Arc`-held branch of a larger state.
///
/// When the inner reducer returns the same branch `Arc`, the parent keeps its
/// identity as well, so "nothing changed" propagates up to the root.
///
/// # Type Parameters
///
/// - `S`: The parent state type
/// - `Sub`: The branch state type
/// - `R`: The branch reducer
///
/// # Examples
///
/// ```ignore
/// let scoped = scope_reducer(
///     CounterReducer,
///     |app: &AppState| &app.counter,
///     |app: &AppState, counter: Arc<CounterState>| AppState { counter, ..app.clone() },
/// );
/// ```
pub fn scope_reducer<S, Sub, R>(
    reducer: R,
    get_state: fn(&S) -> &Arc<Sub>,
    set_state: fn(&S, Arc<Sub>) -> S,
) -> ScopedReducer<S, Sub, R>
where
    R: Reducer<State = Sub>,
{
    ScopedReducer {
        reducer,
        get_state,
        set_state,
        _phantom: PhantomData,
    }
}

/// A scoped reducer that operates on one branch of the state.
///
/// Created by [`scope_reducer`].
pub struct ScopedReducer<S, Sub, R>
where
    R: Reducer<State = Sub>,
{
    reducer: R,
    get_state: fn(&S) -> &Arc<Sub>,
    set_state: fn(&S, Arc<Sub>) -> S,
    _phantom: PhantomData<fn() -> Sub>,
}

impl<S, Sub, R> Reducer for ScopedReducer<S, Sub, R>
where
    R: Reducer<State = Sub>,
{
    type State = S;
    type Action = R::Action;

    fn reduce(&self, state: &Arc<S>, action: &R::Action) -> Result<Arc<S>, ReducerError> {
        let branch = (self.get_state)(state);
        let next = self.reducer.reduce(branch, action)?;

        if Arc::ptr_eq(branch, &next) {
            Ok(Arc::clone(state))
        } else {
            Ok(Arc::new((self.set_state)(state, next)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        SetName(String),
        Poison,
    }

    impl Action for TestAction {
        const ACTION_TYPES: &'static [&'static str] =
            &["[Test] Increment", "[Test] Set Name", "[Test] Poison"];

        fn action_type(&self) -> &'static str {
            match self {
                Self::Increment => Self::ACTION_TYPES[0],
                Self::SetName(_) => Self::ACTION_TYPES[1],
                Self::Poison => Self::ACTION_TYPES[2],
            }
        }

        fn is_command(&self) -> bool {
            true
        }

        fn is_event(&self) -> bool {
            false
        }
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct CounterState {
        count: i32,
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct NameState {
        name: String,
    }

    #[derive(Clone, Debug, Default)]
    struct TestState {
        counter: Arc<CounterState>,
        name: Arc<NameState>,
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = CounterState;
        type Action = TestAction;

        fn reduce(
            &self,
            state: &Arc<CounterState>,
            action: &TestAction,
        ) -> Result<Arc<CounterState>, ReducerError> {
            match action {
                TestAction::Increment => Ok(Arc::new(CounterState {
                    count: state.count + 1,
                })),
                TestAction::Poison => Err(ReducerError::invariant("counter poisoned")),
                TestAction::SetName(_) => Ok(Arc::clone(state)),
            }
        }
    }

    struct NameReducer;

    impl Reducer for NameReducer {
        type State = NameState;
        type Action = TestAction;

        fn reduce(
            &self,
            state: &Arc<NameState>,
            action: &TestAction,
        ) -> Result<Arc<NameState>, ReducerError> {
            match action {
                TestAction::SetName(name) if *name != state.name => {
                    Ok(Arc::new(NameState { name: name.clone() }))
                },
                TestAction::Poison => Ok(Arc::new(NameState {
                    name: "poisoned".to_string(),
                })),
                _ => Ok(Arc::clone(state)),
            }
        }
    }

    fn counter(state: &TestState) -> &Arc<CounterState> {
        &state.counter
    }

    fn with_counter(state: &TestState, counter: Arc<CounterState>) -> TestState {
        TestState {
            counter,
            ..state.clone()
        }
    }

    fn name(state: &TestState) -> &Arc<NameState> {
        &state.name
    }

    fn with_name(state: &TestState, name: Arc<NameState>) -> TestState {
        TestState {
            name,
            ..state.clone()
        }
    }

    fn root() -> CombinedReducer<TestState, TestAction> {
        CombinedReducer::new()
            .with_slice("counter", scope_reducer(CounterReducer, counter, with_counter))
            .with_slice("name", scope_reducer(NameReducer, name, with_name))
    }

    #[test]
    fn test_combined_reducer_updates_only_touched_slice() {
        let combined = root();
        let state = Arc::new(TestState::default());

        let reduction = combined.reduce_slices(&state, &TestAction::Increment);
        assert!(reduction.is_clean());
        assert!(reduction.changed(&state));
        assert_eq!(reduction.state.counter.count, 1);
        assert!(Arc::ptr_eq(&reduction.state.name, &state.name));

        let named = combined.reduce_slices(&reduction.state, &TestAction::SetName("Alice".into()));
        assert_eq!(named.state.name.name, "Alice");
        assert!(Arc::ptr_eq(&named.state.counter, &reduction.state.counter));
    }

    #[test]
    fn test_unmatched_action_keeps_root_identity() {
        let combined = root();
        let state = Arc::new(TestState {
            name: Arc::new(NameState {
                name: "Alice".into(),
            }),
            ..TestState::default()
        });

        let reduction = combined.reduce_slices(&state, &TestAction::SetName("Alice".into()));
        assert!(reduction.is_clean());
        assert!(!reduction.changed(&state));
    }

    #[test]
    fn test_failing_slice_does_not_block_others() {
        let combined = root();
        let state = Arc::new(TestState::default());

        let reduction = combined.reduce_slices(&state, &TestAction::Poison);

        assert_eq!(reduction.failures.len(), 1);
        let failure = &reduction.failures[0];
        assert_eq!(failure.slice, "counter");
        assert_eq!(failure.action_type, "[Test] Poison");
        assert!(Arc::ptr_eq(&reduction.state.counter, &state.counter));
        assert_eq!(reduction.state.name.name, "poisoned");
    }

    #[test]
    fn test_combined_reducer_as_reducer_reports_first_failure() {
        let combined = root();
        let state = Arc::new(TestState::default());

        let error = combined.reduce(&state, &TestAction::Poison).unwrap_err();
        assert_eq!(
            error,
            ReducerError::Slice {
                slice: "counter",
                source: Box::new(ReducerError::invariant("counter poisoned")),
            }
        );
        assert_eq!(combined.slice_names(), vec!["counter", "name"]);
    }

    #[test]
    fn test_scope_reducer() {
        let scoped = scope_reducer(CounterReducer, counter, with_counter);
        let state = Arc::new(TestState {
            counter: Arc::new(CounterState { count: 5 }),
            name: Arc::new(NameState {
                name: "test".into(),
            }),
        });

        let next = scoped.reduce(&state, &TestAction::Increment).unwrap();
        assert_eq!(next.counter.count, 6);
        assert!(Arc::ptr_eq(&next.name, &state.name)); // Other branch untouched

        let same = scoped.reduce(&next, &TestAction::SetName("x".into())).unwrap();
        assert!(Arc::ptr_eq(&same, &next));
    }

    #[test]
    fn test_combine_slices_matches_builder() {
        let combined = combine_slices::<TestState, TestAction>(vec![(
            "counter",
            Box::new(scope_reducer(CounterReducer, counter, with_counter)),
        )]);
        let state = Arc::new(TestState::default());

        let reduction = combined.reduce_slices(&state, &TestAction::Increment);
        assert_eq!(reduction.state.counter.count, 1);
    }
}
