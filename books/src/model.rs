//! Domain types for the book catalogue.

use serde::{Deserialize, Serialize};
use stately_core::selector::Identity;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing an invalid [`BookId`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("book id must not be empty")]
pub struct EmptyBookId;

/// Unique identifier of a book
///
/// Never empty. Serialized as a plain string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookId(String);

impl BookId {
    /// Creates a new random `BookId`
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BookId {
    type Err = EmptyBookId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl TryFrom<String> for BookId {
    type Error = EmptyBookId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            Err(EmptyBookId)
        } else {
            Ok(Self(value))
        }
    }
}

impl From<BookId> for String {
    fn from(id: BookId) -> Self {
        id.0
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Identity for BookId {
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

/// The fields a user fills in to create or edit a book
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookRequiredProps {
    /// Title
    pub name: String,
    /// Gross earnings in the catalogue currency
    pub earnings: f64,
    /// Free-form description
    pub description: String,
}

impl BookRequiredProps {
    /// Creates the props of a book
    #[must_use]
    pub fn new(name: impl Into<String>, earnings: f64, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            earnings,
            description: description.into(),
        }
    }
}

/// A book in the catalogue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Unique identifier
    pub id: BookId,
    /// Title
    pub name: String,
    /// Gross earnings in the catalogue currency
    pub earnings: f64,
    /// Free-form description
    pub description: String,
}

impl Book {
    /// Creates a book from its identifier and props
    #[must_use]
    pub fn from_props(id: BookId, props: BookRequiredProps) -> Self {
        Self {
            id,
            name: props.name,
            earnings: props.earnings,
            description: props.description,
        }
    }

    /// Returns a copy of this book with `changes` applied
    #[must_use]
    pub fn with_changes(&self, changes: BookRequiredProps) -> Self {
        Self::from_props(self.id.clone(), changes)
    }

    /// The editable fields of this book
    #[must_use]
    pub fn props(&self) -> BookRequiredProps {
        BookRequiredProps {
            name: self.name.clone(),
            earnings: self.earnings,
            description: self.description.clone(),
        }
    }
}

impl Identity for Book {
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

/// Sum of the earnings of every book
#[must_use]
pub fn calculate_books_gross_earnings(books: &[Book]) -> f64 {
    books.iter().map(|book| book.earnings).sum()
}
