//! Memoized selectors
//!
//! A selector derives a read view from the root state. Root selectors project
//! a slice; derived selectors combine the outputs of parent selectors through
//! a pure combiner and cache the last result.
//!
//! A derived selector recomputes only when the identity of at least one input
//! changed since its last evaluation. Identity is decided by [`Identity`]:
//! pointer equality for `Arc`-held data (reducers return a new `Arc` on every
//! change) and value equality for plain scalars.
//!
//! # Example
//!
//! ```ignore
//! let books = select_root(|state: &AppState| Arc::clone(&state.books));
//! let all = Arc::new(create_selector1(books, |books: &Arc<BooksState>| {
//!     Arc::clone(&books.collection)
//! }));
//! let total = create_selector1(Arc::clone(&all), |books: &Arc<Vec<Book>>| {
//!     books.iter().map(|book| book.earnings).sum::<f64>()
//! });
//!
//! assert_eq!(total.select(&state), 1000.0);
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Cheap "is this the same input?" check used for memoization.
///
/// Containers behind `Arc` compare by pointer; scalars compare by value.
pub trait Identity {
    /// True when `self` and `other` denote the same input
    fn same(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Identity for Arc<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

macro_rules! value_identity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identity for $ty {
                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

value_identity!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    String,
    &'static str,
);

impl Identity for f64 {
    fn same(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl Identity for f32 {
    fn same(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl<T: Identity> Identity for Option<T> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! tuple_identity {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Identity),+> Identity for ($($name,)+) {
            fn same(&self, other: &Self) -> bool {
                $(self.$idx.same(&other.$idx))&&+
            }
        }
    };
}

tuple_identity!(A: 0);
tuple_identity!(A: 0, B: 1);
tuple_identity!(A: 0, B: 1, C: 2);
tuple_identity!(A: 0, B: 1, C: 2, D: 3);

/// A derivation from the root state `S`.
pub trait Selector<S>: Send + Sync {
    /// The derived view
    type Output: Clone + Identity + Send;

    /// Evaluate against `state`
    fn select(&self, state: &Arc<S>) -> Self::Output;

    /// How many times the combiner actually ran
    fn recomputations(&self) -> usize {
        0
    }
}

impl<S, T> Selector<S> for Arc<T>
where
    T: Selector<S> + ?Sized,
{
    type Output = T::Output;

    fn select(&self, state: &Arc<S>) -> Self::Output {
        (**self).select(state)
    }

    fn recomputations(&self) -> usize {
        (**self).recomputations()
    }
}

/// Selector projecting a value straight off the root state.
///
/// Memoized on the identity of the root `Arc`. The cached root is retained so
/// a freed allocation can never be mistaken for the cached one.
pub struct RootSelector<S, O, F> {
    project: F,
    cache: Mutex<Option<(Arc<S>, O)>>,
    recomputations: AtomicUsize,
}

impl<S, O, F> std::fmt::Debug for RootSelector<S, O, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSelector")
            .field("recomputations", &self.recomputations.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Create a root selector from a projection of the state.
pub fn select_root<S, O, F>(project: F) -> RootSelector<S, O, F>
where
    F: Fn(&S) -> O + Send + Sync,
{
    RootSelector {
        project,
        cache: Mutex::new(None),
        recomputations: AtomicUsize::new(0),
    }
}

impl<S, O, F> Selector<S> for RootSelector<S, O, F>
where
    S: Send + Sync,
    O: Clone + Identity + Send,
    F: Fn(&S) -> O + Send + Sync,
{
    type Output = O;

    fn select(&self, state: &Arc<S>) -> O {
        let mut slot = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((root, output)) = slot.as_ref() {
            if Arc::ptr_eq(root, state) {
                return output.clone();
            }
        }

        let output = (self.project)(state);
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        *slot = Some((Arc::clone(state), output.clone()));
        output
    }

    fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }
}

/// A fixed set of parent selectors feeding a derived selector.
///
/// Implemented for tuples of one to four selectors.
pub trait SelectorInputs<S>: Send + Sync {
    /// The tuple of parent outputs
    type Values: Clone + Identity + Send;

    /// Evaluate every parent against `state`
    fn select_all(&self, state: &Arc<S>) -> Self::Values;
}

macro_rules! tuple_inputs {
    ($($name:ident : $idx:tt),+) => {
        impl<S, $($name: Selector<S>),+> SelectorInputs<S> for ($($name,)+) {
            type Values = ($($name::Output,)+);

            fn select_all(&self, state: &Arc<S>) -> Self::Values {
                ($(self.$idx.select(state),)+)
            }
        }
    };
}

tuple_inputs!(A: 0);
tuple_inputs!(A: 0, B: 1);
tuple_inputs!(A: 0, B: 1, C: 2);
tuple_inputs!(A: 0, B: 1, C: 2, D: 3);

type Combiner<V, O> = Box<dyn Fn(&V) -> O + Send + Sync>;

/// Derived selector caching the last `(inputs, output)` pair.
pub struct Memoized<S, I, O>
where
    I: SelectorInputs<S>,
{
    inputs: I,
    combiner: Combiner<I::Values, O>,
    cache: Mutex<Option<(I::Values, O)>>,
    recomputations: AtomicUsize,
    _state: PhantomData<fn(&S)>,
}

impl<S, I, O> std::fmt::Debug for Memoized<S, I, O>
where
    I: SelectorInputs<S>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("recomputations", &self.recomputations.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S, I, O> Memoized<S, I, O>
where
    I: SelectorInputs<S>,
{
    /// Drop the cached result; the next evaluation recomputes
    pub fn release(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Reset the recomputation counter to zero
    pub fn reset_recomputations(&self) {
        self.recomputations.store(0, Ordering::Relaxed);
    }
}

impl<S, I, O> Selector<S> for Memoized<S, I, O>
where
    I: SelectorInputs<S>,
    O: Clone + Identity + Send,
{
    type Output = O;

    fn select(&self, state: &Arc<S>) -> O {
        let values = self.inputs.select_all(state);

        let mut slot = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((previous, output)) = slot.as_ref() {
            if previous.same(&values) {
                return output.clone();
            }
        }

        let output = (self.combiner)(&values);
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        *slot = Some((values, output.clone()));
        output
    }

    fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }
}

/// Create a derived selector over any tuple of parent selectors.
///
/// The combiner receives the tuple of parent outputs.
pub fn create_selector<S, I, O, F>(inputs: I, combiner: F) -> Memoized<S, I, O>
where
    I: SelectorInputs<S>,
    F: Fn(&I::Values) -> O + Send + Sync + 'static,
{
    Memoized {
        inputs,
        combiner: Box::new(combiner),
        cache: Mutex::new(None),
        recomputations: AtomicUsize::new(0),
        _state: PhantomData,
    }
}

/// Create a derived selector from one parent.
pub fn create_selector1<S, A, O, F>(parent: A, combiner: F) -> Memoized<S, (A,), O>
where
    S: 'static,
    A: Selector<S> + 'static,
    O: 'static,
    F: Fn(&A::Output) -> O + Send + Sync + 'static,
{
    create_selector((parent,), move |values: &(A::Output,)| combiner(&values.0))
}

/// Create a derived selector from two parents.
pub fn create_selector2<S, A, B, O, F>(first: A, second: B, combiner: F) -> Memoized<S, (A, B), O>
where
    S: 'static,
    A: Selector<S> + 'static,
    B: Selector<S> + 'static,
    O: 'static,
    F: Fn(&A::Output, &B::Output) -> O + Send + Sync + 'static,
{
    create_selector((first, second), move |values: &(A::Output, B::Output)| {
        combiner(&values.0, &values.1)
    })
}

/// Create a derived selector from three parents.
pub fn create_selector3<S, A, B, C, O, F>(
    first: A,
    second: B,
    third: C,
    combiner: F,
) -> Memoized<S, (A, B, C), O>
where
    S: 'static,
    A: Selector<S> + 'static,
    B: Selector<S> + 'static,
    C: Selector<S> + 'static,
    O: 'static,
    F: Fn(&A::Output, &B::Output, &C::Output) -> O + Send + Sync + 'static,
{
    create_selector(
        (first, second, third),
        move |values: &(A::Output, B::Output, C::Output)| combiner(&values.0, &values.1, &values.2),
    )
}
