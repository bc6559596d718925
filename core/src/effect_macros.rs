//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when effect handlers build `Effect`
//! values around collaborator calls.

/// Create an `Effect::Future` from an async block
///
/// The block must evaluate to `Result<Action, EffectError>`.
///
/// # Example
///
/// ```rust,ignore
/// use stately_core::async_effect;
///
/// async_effect! {
///     let books = service.all().await.map_err(EffectError::from)?;
///     Ok(BookAction::BooksLoaded { books })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::from_future(async move { $($body)* })
    };
}

/// Create an `Effect::Stream` that emits the given actions in order
///
/// # Example
///
/// ```rust,ignore
/// use stately_core::emit_actions;
///
/// emit_actions![BookAction::Enter, BookAction::ClearSelectedBook]
/// ```
#[macro_export]
macro_rules! emit_actions {
    ($($action:expr),* $(,)?) => {
        $crate::effect::Effect::from_stream($crate::__private::futures::stream::iter(
            ::std::vec![$(::std::result::Result::<_, $crate::effect::EffectError>::Ok($action)),*]
        ))
    };
}
