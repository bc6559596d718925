//! Slice reducers and the root reducer.

use crate::actions::BookAction;
use crate::model::{Book, BookId};
use crate::state::{
    ApiFailure, ApiStatusState, AppState, BooksState, api_slice, books_slice, with_api_slice, with_books_slice,
};
use stately_core::composition::{CombinedReducer, scope_reducer};
use stately_core::reducer::{Reducer, ReducerError};
use std::sync::Arc;

/// Reducer of the books slice
///
/// | Action | Transition |
/// |---|---|
/// | `Enter`, `ClearSelectedBook` | deselect |
/// | `SelectBook` | select |
/// | `BooksLoaded` | replace the collection |
/// | `BookCreated` | append, deselect |
/// | `BookUpdated` | replace in place, deselect |
/// | `BookDeleted` | remove, keep the selection |
///
/// An update for a book that is not loaded leaves the collection untouched
/// but still deselects. A delete for a book that is not loaded is a no-op.
/// Creating a book whose identifier is already loaded is an invariant
/// violation.
#[derive(Clone, Copy, Debug, Default)]
pub struct BooksReducer;

impl BooksReducer {
    /// Creates a new `BooksReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn select(state: &Arc<BooksState>, book_id: Option<&BookId>) -> Arc<BooksState> {
    if state.active_book_id.as_ref() == book_id {
        return Arc::clone(state);
    }

    Arc::new(BooksState {
        collection: Arc::clone(&state.collection),
        active_book_id: book_id.cloned(),
    })
}

fn create_book(books: &[Book], book: &Book) -> Vec<Book> {
    let mut next = Vec::with_capacity(books.len() + 1);
    next.extend_from_slice(books);
    next.push(book.clone());
    next
}

fn update_book(books: &[Book], changes: &Book) -> Vec<Book> {
    books
        .iter()
        .map(|book| {
            if book.id == changes.id {
                changes.clone()
            } else {
                book.clone()
            }
        })
        .collect()
}

fn delete_book(books: &[Book], book_id: &BookId) -> Vec<Book> {
    books.iter().filter(|book| &book.id != book_id).cloned().collect()
}

impl Reducer for BooksReducer {
    type State = BooksState;
    type Action = BookAction;

    fn reduce(&self, state: &Arc<BooksState>, action: &BookAction) -> Result<Arc<BooksState>, ReducerError> {
        match action {
            BookAction::Enter | BookAction::ClearSelectedBook => Ok(select(state, None)),
            BookAction::SelectBook { book_id } => Ok(select(state, Some(book_id))),
            BookAction::BooksLoaded { books } => {
                if state.collection.as_slice() == books.as_slice() {
                    return Ok(Arc::clone(state));
                }
                Ok(Arc::new(BooksState {
                    collection: Arc::new(books.clone()),
                    active_book_id: state.active_book_id.clone(),
                }))
            }
            BookAction::BookCreated { book } => {
                if state.contains(&book.id) {
                    return Err(ReducerError::invariant(format!("book {} already exists", book.id)));
                }
                Ok(Arc::new(BooksState {
                    collection: Arc::new(create_book(&state.collection, book)),
                    active_book_id: None,
                }))
            }
            BookAction::BookUpdated { book } => {
                if !state.contains(&book.id) {
                    tracing::debug!(book_id = %book.id, "Update for a book that is not loaded");
                    return Ok(select(state, None));
                }
                Ok(Arc::new(BooksState {
                    collection: Arc::new(update_book(&state.collection, book)),
                    active_book_id: None,
                }))
            }
            BookAction::BookDeleted { book_id } => {
                if !state.contains(book_id) {
                    tracing::debug!(%book_id, "Delete for a book that is not loaded");
                    return Ok(Arc::clone(state));
                }
                Ok(Arc::new(BooksState {
                    collection: Arc::new(delete_book(&state.collection, book_id)),
                    active_book_id: state.active_book_id.clone(),
                }))
            }
            BookAction::CreateBook { .. }
            | BookAction::UpdateBook { .. }
            | BookAction::DeleteBook { .. }
            | BookAction::RequestFailed { .. } => Ok(Arc::clone(state)),
        }
    }
}

/// Reducer of the API status slice
///
/// Records `RequestFailed` and clears the last failure on the next
/// successful completion.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiStatusReducer;

impl Reducer for ApiStatusReducer {
    type State = ApiStatusState;
    type Action = BookAction;

    fn reduce(&self, state: &Arc<ApiStatusState>, action: &BookAction) -> Result<Arc<ApiStatusState>, ReducerError> {
        match action {
            BookAction::RequestFailed {
                operation,
                message,
                at,
            } => Ok(Arc::new(ApiStatusState {
                last_failure: Some(ApiFailure {
                    operation: *operation,
                    message: message.clone(),
                    at: *at,
                }),
                failures: state.failures + 1,
            })),
            action if action.is_api_success() && state.last_failure.is_some() => Ok(Arc::new(ApiStatusState {
                last_failure: None,
                failures: state.failures,
            })),
            _ => Ok(Arc::clone(state)),
        }
    }
}

/// The root reducer: the books slice, then the API status slice
#[must_use]
pub fn root_reducer() -> CombinedReducer<AppState, BookAction> {
    CombinedReducer::new()
        .with_slice("books", scope_reducer(BooksReducer::new(), books_slice, with_books_slice))
        .with_slice("api", scope_reducer(ApiStatusReducer, api_slice, with_api_slice))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::actions::ApiOperation;
    use crate::model::BookRequiredProps;
    use proptest::prelude::*;
    use stately_core::environment::Clock;
    use stately_testing::properties::{check_identity_no_op, check_pure};
    use stately_testing::{ReducerTest, test_clock};

    fn id(value: &str) -> BookId {
        value.parse().unwrap()
    }

    fn book(value: &str, name: &str, earnings: f64) -> Book {
        Book::from_props(id(value), BookRequiredProps::new(name, earnings, format!("{name} description")))
    }

    fn two_books() -> BooksState {
        BooksState::with_books(vec![book("1", "A", 10.0), book("2", "B", 20.0)])
    }

    #[test]
    fn test_select_and_clear() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::SelectBook { book_id: id("2") })
            .then_state(|state| {
                assert_eq!(state.active_book_id, Some(id("2")));
            })
            .run();

        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::SelectBook { book_id: id("2") })
            .when_action(BookAction::ClearSelectedBook)
            .then_state(|state| {
                assert_eq!(state.active_book_id, None);
            })
            .run();
    }

    #[test]
    fn test_enter_without_selection_keeps_identity() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::Enter)
            .then_unchanged()
            .run();
    }

    #[test]
    fn test_books_loaded_replaces_collection() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::BooksLoaded {
                books: vec![book("3", "C", 5.0)],
            })
            .then_state(|state| {
                assert_eq!(state.collection.len(), 1);
                assert_eq!(state.collection[0].id, id("3"));
            })
            .run();
    }

    #[test]
    fn test_identical_reload_keeps_identity() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::BooksLoaded {
                books: vec![book("1", "A", 10.0), book("2", "B", 20.0)],
            })
            .then_unchanged()
            .run();
    }

    #[test]
    fn test_created_appends_and_resets_selection() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::SelectBook { book_id: id("1") })
            .when_action(BookAction::BookCreated {
                book: book("3", "C", 30.0),
            })
            .then_state(|state| {
                let ids: Vec<&str> = state.collection.iter().map(|b| b.id.as_str()).collect();
                assert_eq!(ids, vec!["1", "2", "3"]);
                assert_eq!(state.active_book_id, None);
            })
            .run();
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::BookCreated {
                book: book("2", "B again", 1.0),
            })
            .then_error(|error| {
                assert_eq!(error, &ReducerError::invariant("book 2 already exists"));
            })
            .then_state(|state| {
                assert_eq!(state.collection.len(), 2);
            })
            .run();
    }

    #[test]
    fn test_updated_replaces_in_place_and_resets_selection() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::SelectBook { book_id: id("2") })
            .when_action(BookAction::BookUpdated {
                book: book("1", "A revised", 11.0),
            })
            .then_state(|state| {
                assert_eq!(state.collection[0], book("1", "A revised", 11.0));
                assert_eq!(state.collection[1], book("2", "B", 20.0));
                assert_eq!(state.active_book_id, None);
            })
            .run();
    }

    #[test]
    fn test_deleted_keeps_selection_and_order() {
        let state = BooksState::with_books(vec![book("1", "A", 1.0), book("2", "B", 2.0), book("3", "C", 3.0)]);

        ReducerTest::new(BooksReducer::new())
            .given_state(state)
            .when_action(BookAction::SelectBook { book_id: id("2") })
            .when_action(BookAction::BookDeleted { book_id: id("2") })
            .then_state(|state| {
                assert_eq!(*state.collection, vec![book("1", "A", 1.0), book("3", "C", 3.0)]);
                assert_eq!(state.active_book_id, Some(id("2")));
            })
            .run();
    }

    #[test]
    fn test_update_of_unknown_book_still_deselects() {
        let state = two_books();
        let collection = Arc::clone(&state.collection);

        ReducerTest::new(BooksReducer::new())
            .given_state(state)
            .when_action(BookAction::SelectBook { book_id: id("2") })
            .when_action(BookAction::BookUpdated {
                book: book("9", "Ghost", 0.0),
            })
            .then_state(move |state| {
                assert!(Arc::ptr_eq(&state.collection, &collection));
                assert_eq!(state.active_book_id, None);
            })
            .run();
    }

    #[test]
    fn test_unknown_ids_are_no_ops() {
        ReducerTest::new(BooksReducer::new())
            .given_state(two_books())
            .when_action(BookAction::BookDeleted { book_id: id("9") })
            .when_action(BookAction::BookUpdated {
                book: book("9", "Ghost", 0.0),
            })
            .then_unchanged()
            .run();
    }

    #[test]
    fn test_api_status_records_and_clears_failures() {
        let at = test_clock().now();

        ReducerTest::new(ApiStatusReducer)
            .given_state(ApiStatusState::default())
            .when_action(BookAction::RequestFailed {
                operation: ApiOperation::Delete,
                message: "service unavailable".to_string(),
                at,
            })
            .then_state(move |state| {
                assert_eq!(state.failures, 1);
                assert_eq!(
                    state.last_failure,
                    Some(ApiFailure {
                        operation: ApiOperation::Delete,
                        message: "service unavailable".to_string(),
                        at,
                    })
                );
            })
            .run();

        ReducerTest::new(ApiStatusReducer)
            .given_state(ApiStatusState {
                last_failure: Some(ApiFailure {
                    operation: ApiOperation::Load,
                    message: "timeout".to_string(),
                    at,
                }),
                failures: 3,
            })
            .when_action(BookAction::BookDeleted { book_id: id("1") })
            .then_state(|state| {
                assert_eq!(state.last_failure, None);
                assert_eq!(state.failures, 3);
            })
            .run();
    }

    #[test]
    fn test_api_status_ignores_success_without_failure() {
        ReducerTest::new(ApiStatusReducer)
            .given_state(ApiStatusState::default())
            .when_action(BookAction::BooksLoaded { books: vec![] })
            .then_unchanged()
            .run();
    }

    #[test]
    fn test_root_reducer_keeps_untouched_slices() {
        let root = Arc::new(AppState::with_books(two_books()));
        let reduction = root_reducer().reduce_slices(&root, &BookAction::SelectBook { book_id: id("1") });

        assert!(reduction.is_clean());
        assert!(reduction.changed(&root));
        assert!(Arc::ptr_eq(&reduction.state.api, &root.api));
        assert!(Arc::ptr_eq(&reduction.state.books.collection, &root.books.collection));

        let untouched = root_reducer().reduce_slices(&root, &BookAction::DeleteBook { book_id: id("1") });
        assert!(!untouched.changed(&root));
    }

    #[test]
    fn test_root_reducer_isolates_slice_failures() {
        let root = Arc::new(AppState::with_books(two_books()));
        let reduction = root_reducer().reduce_slices(
            &root,
            &BookAction::BookCreated {
                book: book("1", "dup", 0.0),
            },
        );

        assert_eq!(reduction.failures.len(), 1);
        assert_eq!(reduction.failures[0].slice, "books");
        assert!(!reduction.changed(&root));
    }

    fn arb_book() -> impl Strategy<Value = Book> {
        ("[0-9]{1,2}", "[A-Z][a-z]{0,6}", 0.0_f64..1000.0)
            .prop_map(|(id, name, earnings)| book(&id, &name, earnings))
    }

    fn arb_books_state() -> impl Strategy<Value = BooksState> {
        (
            prop::collection::vec(arb_book(), 0..8),
            prop::option::of("[0-9]{1,2}"),
        )
            .prop_map(|(books, active)| {
                let mut unique: Vec<Book> = Vec::new();
                for candidate in books {
                    if !unique.iter().any(|b| b.id == candidate.id) {
                        unique.push(candidate);
                    }
                }
                BooksState {
                    collection: Arc::new(unique),
                    active_book_id: active.map(|value| id(&value)),
                }
            })
    }

    fn arb_action() -> impl Strategy<Value = BookAction> {
        prop_oneof![
            Just(BookAction::Enter),
            Just(BookAction::ClearSelectedBook),
            "[0-9]{1,2}".prop_map(|value| BookAction::SelectBook { book_id: id(&value) }),
            prop::collection::vec(arb_book(), 0..4).prop_map(|books| BookAction::BooksLoaded { books }),
            arb_book().prop_map(|book| BookAction::BookCreated { book }),
            arb_book().prop_map(|book| BookAction::BookUpdated { book }),
            "[0-9]{1,2}".prop_map(|value| BookAction::BookDeleted { book_id: id(&value) }),
        ]
    }

    fn arb_intent() -> impl Strategy<Value = BookAction> {
        prop_oneof![
            arb_book().prop_map(|book| BookAction::CreateBook { book: book.props() }),
            arb_book().prop_map(|book| BookAction::UpdateBook {
                book_id: book.id.clone(),
                changes: book.props(),
            }),
            "[0-9]{1,2}".prop_map(|value| BookAction::DeleteBook { book_id: id(&value) }),
        ]
    }

    proptest! {
        #[test]
        fn prop_books_reducer_is_pure(state in arb_books_state(), action in arb_action()) {
            check_pure(&BooksReducer::new(), &Arc::new(state), &action)?;
        }

        #[test]
        fn prop_intents_never_touch_books(state in arb_books_state(), action in arb_intent()) {
            check_identity_no_op(&BooksReducer::new(), &Arc::new(state), &action)?;
        }

        #[test]
        fn prop_created_adds_exactly_one(state in arb_books_state(), new_book in arb_book()) {
            prop_assume!(!state.contains(&new_book.id));
            let before = Arc::new(state);
            let after = BooksReducer::new()
                .reduce(&before, &BookAction::BookCreated { book: new_book.clone() })
                .unwrap();

            prop_assert_eq!(after.collection.len(), before.collection.len() + 1);
            prop_assert_eq!(after.collection.last(), Some(&new_book));
            prop_assert_eq!(&after.collection[..before.collection.len()], before.collection.as_slice());
            prop_assert_eq!(&after.active_book_id, &None);
        }

        #[test]
        fn prop_deleted_removes_only_that_book(state in arb_books_state(), index in any::<prop::sample::Index>()) {
            prop_assume!(!state.collection.is_empty());
            let target = state.collection[index.index(state.collection.len())].id.clone();
            let before = Arc::new(state);
            let after = BooksReducer::new()
                .reduce(&before, &BookAction::BookDeleted { book_id: target.clone() })
                .unwrap();

            let expected: Vec<Book> = before.collection.iter().filter(|b| b.id != target).cloned().collect();
            prop_assert!(!after.contains(&target));
            prop_assert_eq!(after.collection.as_slice(), expected.as_slice());
            prop_assert_eq!(&after.active_book_id, &before.active_book_id);
        }

        #[test]
        fn prop_updated_changes_exactly_one(state in arb_books_state(), index in any::<prop::sample::Index>(), changes in arb_book()) {
            prop_assume!(!state.collection.is_empty());
            let position = index.index(state.collection.len());
            let updated = Book { id: state.collection[position].id.clone(), ..changes };
            let before = Arc::new(state);
            let after = BooksReducer::new()
                .reduce(&before, &BookAction::BookUpdated { book: updated.clone() })
                .unwrap();

            prop_assert_eq!(after.collection.len(), before.collection.len());
            for (i, (old, new)) in before.collection.iter().zip(after.collection.iter()).enumerate() {
                if i == position {
                    prop_assert_eq!(new, &updated);
                } else {
                    prop_assert_eq!(new, old);
                }
            }
            prop_assert_eq!(&after.active_book_id, &None);
        }
    }
}
