//! The Store: single owner of the state tree.
//!
//! # Dispatch model
//!
//! `dispatch` is synchronous. The action goes through the root reducer, the
//! new state replaces the old one when its identity changed, listeners are
//! notified, and finally the action is published on the action streams.
//!
//! Dispatch never nests. An action dispatched while another dispatch is being
//! processed (by a listener, or by an effect on another task) is appended to a
//! FIFO queue and processed by the dispatch that is already draining, right
//! after the current action. There is exactly one global order of state
//! transitions, and the action streams observe it.
//!
//! ```text
//! dispatch(a) ─► queue ─► reduce ─► commit ─► listeners ─► action streams
//!                  ▲                              │
//!                  └──── dispatch(b) from here ───┘  (queued, not nested)
//! ```

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::metrics::StoreMetrics;
use futures::Stream;
use stately_core::action::Action;
use stately_core::composition::{CombinedReducer, SliceFailure};
use stately_core::selector::Selector;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

type Listener<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<S, A>
where
    S: 'static,
    A: Action,
{
    config: StoreConfig,
    state: RwLock<Arc<S>>,
    reducer: CombinedReducer<S, A>,
    queue: Mutex<VecDeque<(u64, A)>>,
    next_ticket: AtomicU64,
    draining: AtomicBool,
    listeners: Mutex<Vec<(u64, Listener<S>)>>,
    next_listener_id: AtomicU64,
    action_subscribers: Mutex<Vec<mpsc::UnboundedSender<A>>>,
    shutdown: AtomicBool,
}

/// Releases the draining flag, also when a reducer or listener panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The Store runtime
///
/// Owns the current state as an `Arc<S>` snapshot. Readers get the snapshot
/// and can never write through it; the only way to change state is
/// [`Store::dispatch`].
///
/// The store is cheap to clone: clones share the same state, queue,
/// listeners and action streams.
///
/// # Type Parameters
///
/// - `S`: State type (the root of the state tree)
/// - `A`: Action type
///
/// # Example
///
/// ```ignore
/// let store = Store::new(AppState::default(), root_reducer());
///
/// let _subscription = store.subscribe(|state| {
///     println!("{} books", state.books.collection.len());
/// });
///
/// store.dispatch(BookAction::SelectBook { book_id })?;
/// ```
pub struct Store<S, A>
where
    S: 'static,
    A: Action,
{
    inner: Arc<Shared<S, A>>,
}

impl<S, A> Clone for Store<S, A>
where
    S: 'static,
    A: Action,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> std::fmt::Debug for Store<S, A>
where
    S: 'static,
    A: Action,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("label", &self.inner.config.label)
            .field("slices", &self.inner.reducer.slice_names())
            .field("listeners", &lock(&self.inner.listeners).len())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S, A> Store<S, A>
where
    S: Send + Sync + 'static,
    A: Action,
{
    /// Create a new store with initial state and root reducer
    #[must_use]
    pub fn new(initial_state: S, reducer: CombinedReducer<S, A>) -> Self {
        Self::with_config(initial_state, reducer, StoreConfig::default())
    }

    /// Create a new store with custom configuration
    #[must_use]
    pub fn with_config(initial_state: S, reducer: CombinedReducer<S, A>, config: StoreConfig) -> Self {
        tracing::debug!(
            store = %config.label,
            slices = ?reducer.slice_names(),
            "Store created"
        );

        Self {
            inner: Arc::new(Shared {
                config,
                state: RwLock::new(Arc::new(initial_state)),
                reducer,
                queue: Mutex::new(VecDeque::new()),
                next_ticket: AtomicU64::new(0),
                draining: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                action_subscribers: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Store configuration
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Dispatch an action
    ///
    /// Runs the root reducer, commits the new state if its identity changed,
    /// notifies listeners and publishes the action. When another dispatch is
    /// already processing, the action is queued and this call returns at
    /// once; the running dispatch processes it next.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ShutdownInProgress`] after [`Store::shutdown`].
    /// - [`StoreError::ReducerFailed`] when a slice reducer rejected this
    ///   action. Slices that accepted it have committed their changes and the
    ///   action was still published. A queued action returns `Ok` at once;
    ///   its failures are only logged. Failures of other callers' actions
    ///   drained by this call are never returned here.
    ///
    /// # Panics
    ///
    /// A panicking reducer or listener propagates to the caller. The store
    /// stays usable; the action being processed is lost.
    #[tracing::instrument(
        skip(self, action),
        name = "store_dispatch",
        fields(store = %self.inner.config.label, action_type = action.action_type())
    )]
    pub fn dispatch(&self, action: A) -> Result<(), StoreError> {
        let shared = &*self.inner;

        if shared.shutdown.load(Ordering::Acquire) {
            tracing::warn!("Rejected action: store is shutting down");
            return Err(StoreError::ShutdownInProgress);
        }

        StoreMetrics::record_dispatch(&shared.config.label);

        let ticket = shared.next_ticket.fetch_add(1, Ordering::Relaxed);
        let depth = {
            let mut queue = lock(&shared.queue);
            queue.push_back((ticket, action));
            queue.len()
        };
        StoreMetrics::record_queue_depth(&shared.config.label, depth);

        if depth >= shared.config.queue_warn_threshold {
            tracing::warn!(
                queue_depth = depth,
                threshold = shared.config.queue_warn_threshold,
                "Dispatch queue is growing"
            );
        }

        let mut failures = Vec::new();

        loop {
            if shared
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::debug!(queue_depth = depth, "Dispatch in progress, action queued");
                break;
            }

            let guard = DrainGuard(&shared.draining);
            while let Some((queued, next)) = self.pop_queued() {
                let rejected = self.process(next);
                if queued == ticket {
                    failures = rejected;
                }
            }
            drop(guard);

            // An action queued between the last pop and the release above
            // would otherwise wait for the next dispatch.
            if lock(&shared.queue).is_empty() {
                break;
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ReducerFailed { failures })
        }
    }

    fn pop_queued(&self) -> Option<(u64, A)> {
        let mut queue = lock(&self.inner.queue);
        let next = queue.pop_front();
        StoreMetrics::record_queue_depth(&self.inner.config.label, queue.len());
        next
    }

    fn process(&self, action: A) -> Vec<SliceFailure> {
        let shared = &*self.inner;
        let label = shared.config.label.as_str();
        let current = self.get_state();

        let start = Instant::now();
        let reduction = shared.reducer.reduce_slices(&current, &action);
        let changed = reduction.changed(&current);
        StoreMetrics::record_reduce(label, start.elapsed(), changed);

        for failure in &reduction.failures {
            tracing::error!(
                slice = failure.slice,
                action_type = failure.action_type,
                error = %failure.error,
                "Slice reducer rejected action"
            );
            StoreMetrics::record_slice_failure(label, failure.slice);
        }

        if changed {
            *shared.state.write().unwrap_or_else(PoisonError::into_inner) =
                Arc::clone(&reduction.state);
            self.notify(&reduction.state);
        } else {
            tracing::trace!(action_type = action.action_type(), "State unchanged");
        }

        self.publish(&action);
        reduction.failures
    }

    fn notify(&self, state: &Arc<S>) {
        // Listeners run outside the lock so they can subscribe, unsubscribe
        // or dispatch.
        let listeners: Vec<Listener<S>> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(state);
        }
    }

    fn publish(&self, action: &A) {
        lock(&self.inner.action_subscribers).retain(|subscriber| subscriber.send(action.clone()).is_ok());
    }

    /// Current state snapshot
    #[must_use]
    pub fn get_state(&self) -> Arc<S> {
        Arc::clone(&self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Read current state via a closure
    ///
    /// ```ignore
    /// let count = store.state(|s| s.books.collection.len());
    /// ```
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.get_state();
        f(&state)
    }

    /// Evaluate a selector against the current state
    pub fn select<Sel>(&self, selector: &Sel) -> Sel::Output
    where
        Sel: Selector<S> + ?Sized,
    {
        selector.select(&self.get_state())
    }

    /// Register a listener called with the new state after every dispatch
    /// that changes state identity
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<S>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));

        let shared: Weak<Shared<S, A>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    lock(&shared.listeners).retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    /// Number of registered state listeners
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Subscribe to the action stream
    ///
    /// The stream yields every action dispatched after this call, in
    /// dispatch order, after the reducers ran. It never drops actions. It
    /// ends when the store shuts down; after shutdown it is already closed.
    #[must_use]
    pub fn actions(&self) -> ActionStream<A> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut subscribers = lock(&self.inner.action_subscribers);
        if !self.inner.shutdown.load(Ordering::Acquire) {
            subscribers.push(sender);
        }

        ActionStream { receiver }
    }

    /// Dispatch an action and wait for the first action matching `predicate`
    ///
    /// Subscribes before dispatching, so a follow-up produced by an effect
    /// cannot be missed. The dispatched action itself is also tested.
    ///
    /// # Errors
    ///
    /// - Any error returned by [`Store::dispatch`]
    /// - [`StoreError::Timeout`]: no matching action within `timeout`
    /// - [`StoreError::ChannelClosed`]: the store shut down while waiting
    ///
    /// # Example
    ///
    /// ```ignore
    /// let outcome = store
    ///     .dispatch_and_wait_for(
    ///         BookAction::DeleteBook { book_id },
    ///         |a| matches!(a, BookAction::BookDeleted { .. } | BookAction::RequestFailed { .. }),
    ///         Duration::from_secs(5),
    ///     )
    ///     .await?;
    /// ```
    pub async fn dispatch_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        // Subscribe BEFORE dispatching to avoid a race with fast effects
        let mut actions = self.actions();

        self.dispatch(action)?;

        tokio::time::timeout(timeout, async {
            while let Some(next) = actions.recv().await {
                if predicate(&next) {
                    return Ok(next);
                }
            }
            Err(StoreError::ChannelClosed)
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Stop accepting actions and close every action stream
    ///
    /// Actions already queued are still reduced. Listeners stay registered
    /// but are not called again unless a queued action changes state.
    pub fn shutdown(&self) {
        let closed = {
            let mut subscribers = lock(&self.inner.action_subscribers);
            self.inner.shutdown.store(true, Ordering::Release);
            let closed = subscribers.len();
            subscribers.clear();
            closed
        };

        tracing::info!(
            store = %self.inner.config.label,
            closed_streams = closed,
            "Store shut down"
        );
    }

    /// True once [`Store::shutdown`] was called
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

/// Handle to a registered state listener
///
/// Dropping it deregisters the listener.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Deregister the listener now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Stream of dispatched actions
///
/// Returned by [`Store::actions`]. Implements [`futures::Stream`]; the
/// inherent [`ActionStream::recv`] is a shortcut for `StreamExt::next`.
#[derive(Debug)]
pub struct ActionStream<A> {
    receiver: mpsc::UnboundedReceiver<A>,
}

impl<A> ActionStream<A> {
    /// Receive the next action, or `None` once the store shut down
    pub async fn recv(&mut self) -> Option<A> {
        self.receiver.recv().await
    }

    /// Take the next action if one is already buffered
    pub fn try_recv(&mut self) -> Option<A> {
        self.receiver.try_recv().ok()
    }
}

impl<A> Stream for ActionStream<A> {
    type Item = A;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<A>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
