//! Books demo binary
//!
//! Loads a seeded catalogue, selects a book and deletes it, printing the
//! selector output after every step.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p stately-books --bin books-demo
//! STATELY_METRICS_ADDR=0.0.0.0:9000 cargo run -p stately-books --bin books-demo
//! ```

use anyhow::Context;
use stately_books::{
    Book, BookAction, BookRequiredProps, BooksApp, BooksEnvironment, BooksPage, InMemoryBooksService,
};
use stately_runtime::metrics::MetricsServer;
use stately_runtime::{OrchestratorConfig, StoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WAIT: Duration = Duration::from_secs(5);

fn seed() -> anyhow::Result<Vec<Book>> {
    Ok(vec![
        Book::from_props("1".parse()?, BookRequiredProps::new("A", 12.0, "The first book")),
        Book::from_props("2".parse()?, BookRequiredProps::new("B", 30.5, "The second book")),
    ])
}

fn print_views(app: &BooksApp) {
    let books = app.books();
    let names: Vec<&str> = books.iter().map(|book| book.name.as_str()).collect();
    println!("  books:          {names:?}");
    println!(
        "  active book:    {}",
        app.active_book().map_or_else(|| "none".to_string(), |book| book.id.to_string())
    );
    println!("  earnings total: {:.2}", app.earnings_total());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stately_books=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics = match std::env::var("STATELY_METRICS_ADDR") {
        Ok(addr) => {
            let mut server = MetricsServer::new(addr.parse().context("invalid STATELY_METRICS_ADDR")?);
            server.start()?;
            Some(server)
        }
        Err(_) => None,
    };

    let service = Arc::new(InMemoryBooksService::new().with_books(seed()?).with_latency(Duration::from_millis(20)));
    let app = BooksApp::start_with(
        BooksEnvironment::new(service),
        StoreConfig::from_env()?.with_label("books"),
        OrchestratorConfig::from_env()?,
    )?;
    let page = BooksPage::new(&app);

    println!("=== Books page ===\n");

    println!(">>> Enter");
    let mut actions = app.store().actions();
    page.init()?;
    wait_for(&mut actions, |a| matches!(a, BookAction::BooksLoaded { .. })).await?;
    print_views(&app);

    let second = app
        .books()
        .iter()
        .find(|book| book.id.as_str() == "2")
        .cloned()
        .context("seeded book 2 missing")?;

    println!("\n>>> Select book 2");
    page.select(&second)?;
    print_views(&app);

    println!("\n>>> Delete book 2");
    page.delete(&second)?;
    wait_for(&mut actions, |a| matches!(a, BookAction::BookDeleted { .. })).await?;
    print_views(&app);

    println!("\n>>> Wire shape of the last intent");
    println!(
        "  {}",
        serde_json::to_string(&BookAction::DeleteBook { book_id: second.id })?
    );

    if let Some(failure) = app.last_failure() {
        println!("\nLast API failure: {} {}", failure.operation, failure.message);
    }

    if let Some(text) = metrics.as_ref().and_then(MetricsServer::render) {
        println!("\n=== Metrics ===\n{text}");
    }

    app.shutdown().await?;
    Ok(())
}

async fn wait_for<F>(actions: &mut stately_runtime::ActionStream<BookAction>, predicate: F) -> anyhow::Result<BookAction>
where
    F: Fn(&BookAction) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let next = tokio::time::timeout_at(deadline, actions.recv())
            .await
            .context("timed out waiting for the books API")?
            .context("store shut down")?;
        if let BookAction::RequestFailed { operation, message, .. } = &next {
            anyhow::bail!("{operation} request failed: {message}");
        }
        if predicate(&next) {
            return Ok(next);
        }
    }
}
