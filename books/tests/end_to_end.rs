//! End-to-end tests: page intents through effects, the in-memory service
//! and back into the selectors.

#![allow(clippy::unwrap_used)] // Test code can use unwrap

use stately_books::{
    ApiOperation, Book, BookAction, BookForm, BookId, BookRequiredProps, BooksApp, BooksEnvironment,
    BooksPage, BooksService, InMemoryBooksService,
};
use stately_core::environment::Clock;
use stately_runtime::RetryPolicy;
use stately_testing::helpers::{eventually, init_test_tracing, wait_for_action};
use stately_testing::test_clock;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn id(value: &str) -> BookId {
    value.parse().unwrap()
}

fn book(value: &str, name: &str, earnings: f64) -> Book {
    Book::from_props(id(value), BookRequiredProps::new(name, earnings, ""))
}

fn start(service: &Arc<InMemoryBooksService>) -> BooksApp {
    init_test_tracing();
    let env = BooksEnvironment::new(Arc::clone(service) as Arc<dyn BooksService>)
        .with_clock(Arc::new(test_clock()))
        .with_load_retry(RetryPolicy::none());
    BooksApp::start(env).unwrap()
}

fn is_completion(action: &BookAction) -> bool {
    action.is_api_success() || matches!(action, BookAction::RequestFailed { .. })
}

#[tokio::test]
async fn test_enter_select_delete() {
    let service = Arc::new(InMemoryBooksService::new().with_books(vec![book("1", "A", 5.0), book("2", "B", 7.5)]));
    let app = start(&service);
    let page = BooksPage::new(&app);
    let mut actions = app.store().actions();

    page.init().unwrap();
    wait_for_action(&mut actions, |a| matches!(a, BookAction::BooksLoaded { .. }), WAIT)
        .await
        .unwrap();
    assert_eq!(*app.books(), vec![book("1", "A", 5.0), book("2", "B", 7.5)]);
    assert!((app.earnings_total() - 12.5).abs() < f64::EPSILON);

    page.select(&book("2", "B", 7.5)).unwrap();
    assert_eq!(app.active_book().map(|b| b.id), Some(id("2")));

    page.delete(&book("2", "B", 7.5)).unwrap();
    wait_for_action(&mut actions, |a| matches!(a, BookAction::BookDeleted { .. }), WAIT)
        .await
        .unwrap();

    assert_eq!(*app.books(), vec![book("1", "A", 5.0)]);
    assert_eq!(app.active_book(), None);
    assert!((app.earnings_total() - 5.0).abs() < f64::EPSILON);
    assert_eq!(service.stored(), vec![book("1", "A", 5.0)]);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_enter_loads_once() {
    let service = Arc::new(
        InMemoryBooksService::new()
            .with_books(vec![book("1", "A", 1.0)])
            .with_latency(Duration::from_millis(50)),
    );
    let app = start(&service);
    let mut actions = app.store().actions();

    for _ in 0..3 {
        app.dispatch(BookAction::Enter).unwrap();
    }
    wait_for_action(&mut actions, |a| matches!(a, BookAction::BooksLoaded { .. }), WAIT)
        .await
        .unwrap();

    // A later Enter, after the first load completed, loads again.
    app.dispatch(BookAction::Enter).unwrap();
    wait_for_action(&mut actions, |a| matches!(a, BookAction::BooksLoaded { .. }), WAIT)
        .await
        .unwrap();

    assert_eq!(service.calls().all, 2);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_creates_complete_in_save_order() {
    let service = Arc::new(InMemoryBooksService::new().with_latency(Duration::from_millis(10)));
    let app = start(&service);
    let page = BooksPage::new(&app);

    for name in ["First", "Second", "Third"] {
        page.save(BookForm::New(BookRequiredProps::new(name, 1.0, ""))).unwrap();
    }

    assert!(eventually(|| app.books().len() == 3, WAIT).await);
    let names: Vec<String> = app.books().iter().map(|b| b.name.clone()).collect();
    assert_eq!(names, ["First", "Second", "Third"]);
    assert_eq!(service.calls().create, 3);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_update_replaces_the_edited_book() {
    let service = Arc::new(InMemoryBooksService::new().with_books(vec![book("1", "A", 1.0), book("2", "B", 2.0)]));
    let app = start(&service);
    let page = BooksPage::new(&app);
    let mut actions = app.store().actions();

    page.init().unwrap();
    wait_for_action(&mut actions, |a| matches!(a, BookAction::BooksLoaded { .. }), WAIT)
        .await
        .unwrap();

    page.select(&book("1", "A", 1.0)).unwrap();
    page.save(BookForm::Existing(book("1", "A revised", 4.0))).unwrap();
    wait_for_action(&mut actions, |a| matches!(a, BookAction::BookUpdated { .. }), WAIT)
        .await
        .unwrap();

    assert_eq!(*app.books(), vec![book("1", "A revised", 4.0), book("2", "B", 2.0)]);
    assert_eq!(app.active_book(), None);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_is_recorded_until_next_success() {
    let service = Arc::new(InMemoryBooksService::new().with_books(vec![book("1", "A", 1.0)]));
    service.set_available(false);
    let app = start(&service);
    let mut actions = app.store().actions();

    app.dispatch(BookAction::Enter).unwrap();
    wait_for_action(&mut actions, is_completion, WAIT).await.unwrap();

    let failure = app.last_failure().unwrap();
    assert_eq!(failure.operation, ApiOperation::Load);
    assert_eq!(failure.message, "books service unavailable: connection refused");
    assert_eq!(failure.at, test_clock().now());
    assert!(app.books().is_empty());
    assert!(app.dead_letters().is_empty());

    service.set_available(true);
    app.dispatch(BookAction::Enter).unwrap();
    wait_for_action(&mut actions, is_completion, WAIT).await.unwrap();

    assert_eq!(app.last_failure(), None);
    assert_eq!(app.store().state(|s| s.api.failures), 1);
    assert_eq!(app.books().len(), 1);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_deletes_all_land() {
    let books: Vec<Book> = (1..=4).map(|n| book(&n.to_string(), "x", 1.0)).collect();
    let service = Arc::new(
        InMemoryBooksService::new()
            .with_books(books.clone())
            .with_latency(Duration::from_millis(10)),
    );
    let app = start(&service);
    let page = BooksPage::new(&app);
    let mut actions = app.store().actions();

    page.init().unwrap();
    wait_for_action(&mut actions, |a| matches!(a, BookAction::BooksLoaded { .. }), WAIT)
        .await
        .unwrap();

    for book in &books[1..] {
        page.delete(book).unwrap();
    }

    assert!(eventually(|| app.books().len() == 1, WAIT).await);
    assert_eq!(*app.books(), vec![books[0].clone()]);
    assert_eq!(service.calls().delete, 3);
    app.shutdown().await.unwrap();
}
