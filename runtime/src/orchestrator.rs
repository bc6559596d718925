//! Effect orchestration.
//!
//! An [`EffectDefinition`] names the action types that trigger it, the action
//! types it may dispatch, a handler turning a trigger into an [`Effect`], and
//! a [`ConcurrencyPolicy`]. The [`EffectOrchestrator`] runs one worker task
//! per registered effect. Each worker holds its own subscription to the
//! store's action stream and applies its policy to overlapping triggers:
//!
//! - **Exhaust**: a trigger arriving while an invocation is in flight is
//!   ignored.
//! - **Concat**: invocations run one at a time in arrival order. The
//!   follow-up of one trigger is dispatched before the next invocation
//!   starts.
//! - **Merge**: every trigger starts its own invocation; follow-ups dispatch
//!   in completion order.
//!
//! Collaborator failures never stop a worker. They go to the effect's error
//! handler when it has one and to the dead letter queue otherwise. Wiring
//! errors (an effect producing an action type it did not declare, a follow-up
//! rejected by the reducers) stop that effect's worker and are reported by
//! [`EffectOrchestrator::shutdown`].

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, StoreError};
use crate::metrics::EffectMetrics;
use crate::retry::{RetryPolicy, retry_while};
use crate::store::{ActionStream, Store, lock};
use crate::{AtomicCounterGuard, DeadLetterQueue};
use futures::{FutureExt, StreamExt};
use stately_core::action::{Action, validate_action_type};
use stately_core::effect::{ConcurrencyPolicy, Effect, EffectError, EffectFuture};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Notify, watch};
use tokio::task::{JoinHandle, JoinSet};

type Handler<A> = Arc<dyn Fn(A) -> Effect<A> + Send + Sync>;
type ErrorHandler<A> = Arc<dyn Fn(&EffectError, &A) -> Option<A> + Send + Sync>;

/// Declaration of one effect
///
/// # Example
///
/// ```ignore
/// let load_books = EffectDefinition::new("load_books", ConcurrencyPolicy::Exhaust, move |_| {
///     let service = Arc::clone(&service);
///     async_effect! {
///         service.all().await
///             .map(|books| BookAction::BooksLoaded { books })
///             .map_err(EffectError::from)
///     }
/// })
/// .triggered_by([BookAction::ENTER])
/// .emits([BookAction::BOOKS_LOADED, BookAction::REQUEST_FAILED])
/// .on_error(|error, _| Some(BookAction::request_failed(ApiOperation::Load, error)));
/// ```
pub struct EffectDefinition<A: Action> {
    name: &'static str,
    policy: ConcurrencyPolicy,
    handler: Handler<A>,
    triggers: Vec<&'static str>,
    emits: Vec<&'static str>,
    on_error: Option<ErrorHandler<A>>,
    retry: Option<RetryPolicy>,
}

impl<A: Action> EffectDefinition<A> {
    /// Create an effect with a handler and a concurrency policy
    ///
    /// The effect has no triggers and may emit nothing until
    /// [`triggered_by`](Self::triggered_by) and [`emits`](Self::emits) are set.
    #[must_use]
    pub fn new<F>(name: &'static str, policy: ConcurrencyPolicy, handler: F) -> Self
    where
        F: Fn(A) -> Effect<A> + Send + Sync + 'static,
    {
        Self {
            name,
            policy,
            handler: Arc::new(handler),
            triggers: Vec::new(),
            emits: Vec::new(),
            on_error: None,
            retry: None,
        }
    }

    /// Action types that start an invocation
    #[must_use]
    pub fn triggered_by<I>(mut self, action_types: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        self.triggers.extend(action_types);
        self
    }

    /// Action types this effect may dispatch, including error-handler output
    #[must_use]
    pub fn emits<I>(mut self, action_types: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        self.emits.extend(action_types);
        self
    }

    /// Map a failed invocation to a failure action
    ///
    /// Returning `None` drops the failure after logging it. Effects without
    /// an error handler send failures to the dead letter queue.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&EffectError, &A) -> Option<A> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Retry retryable failures of [`Effect::Future`] invocations
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Effect name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Concurrency policy
    #[must_use]
    pub const fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Triggering action types
    #[must_use]
    pub fn triggers(&self) -> &[&'static str] {
        &self.triggers
    }

    /// Declared output action types
    #[must_use]
    pub fn emitted_types(&self) -> &[&'static str] {
        &self.emits
    }

    fn validate(&self) -> Result<(), OrchestratorError> {
        if self.triggers.is_empty() {
            return Err(OrchestratorError::NoTriggers { effect: self.name });
        }

        for action_type in self.triggers.iter().chain(&self.emits) {
            validate_action_type::<A>(action_type).map_err(|source| {
                OrchestratorError::InvalidActionType {
                    effect: self.name,
                    source,
                }
            })?;
        }

        Ok(())
    }
}

impl<A: Action> std::fmt::Debug for EffectDefinition<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectDefinition")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("triggers", &self.triggers)
            .field("emits", &self.emits)
            .field("on_error", &self.on_error.is_some())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

struct Worker {
    name: &'static str,
    policy: ConcurrencyPolicy,
    in_flight: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Runs registered effects against a store
///
/// Dropping the orchestrator stops its workers; [`shutdown`](Self::shutdown)
/// additionally waits for in-flight invocations and reports wiring errors.
pub struct EffectOrchestrator<S, A>
where
    S: Send + Sync + 'static,
    A: Action,
{
    store: Store<S, A>,
    config: OrchestratorConfig,
    dlq: DeadLetterQueue<A>,
    workers: Vec<Worker>,
    stop: watch::Sender<bool>,
    fatal: Arc<Mutex<Option<OrchestratorError>>>,
}

impl<S, A> EffectOrchestrator<S, A>
where
    S: Send + Sync + 'static,
    A: Action,
{
    /// Create an orchestrator with default configuration
    #[must_use]
    pub fn new(store: Store<S, A>) -> Self {
        Self::with_config(store, OrchestratorConfig::default())
    }

    /// Create an orchestrator with custom configuration
    #[must_use]
    pub fn with_config(store: Store<S, A>, config: OrchestratorConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            dlq: DeadLetterQueue::new(config.dlq_max_size),
            store,
            config,
            workers: Vec::new(),
            stop,
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    /// Register an effect and start its worker
    ///
    /// The worker subscribes to the action stream before this call returns,
    /// so every action dispatched afterwards is seen.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NoTriggers`]: the effect has no trigger
    /// - [`OrchestratorError::InvalidActionType`]: a trigger or emitted type
    ///   is not declared by `A`
    /// - [`OrchestratorError::DuplicateEffect`]: the name is already taken
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn register(&mut self, definition: EffectDefinition<A>) -> Result<(), OrchestratorError> {
        definition.validate()?;

        if self.workers.iter().any(|worker| worker.name == definition.name) {
            return Err(OrchestratorError::DuplicateEffect(definition.name));
        }

        let name = definition.name;
        let policy = definition.policy;
        let in_flight = Arc::new(AtomicUsize::new(0));
        let retry = definition
            .retry
            .clone()
            .unwrap_or_else(|| self.config.default_retry.clone());

        let context = Arc::new(EffectContext {
            definition,
            retry,
            store: self.store.clone(),
            dlq: self.dlq.clone(),
            in_flight: Arc::clone(&in_flight),
            fatal: Arc::clone(&self.fatal),
            halted: AtomicBool::new(false),
            halt: Notify::new(),
        });

        let actions = self.store.actions();
        let stop = self.stop.subscribe();
        let handle = tokio::spawn(run_worker(context, actions, stop));

        tracing::info!(effect = name, policy = %policy, "Effect registered");

        self.workers.push(Worker {
            name,
            policy,
            in_flight,
            handle,
        });
        Ok(())
    }

    /// Dead letter queue holding unhandled effect failures
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<A> {
        self.dlq.clone()
    }

    /// Number of invocations of `effect` currently running
    #[must_use]
    pub fn in_flight(&self, effect: &str) -> Option<usize> {
        self.worker(effect)
            .map(|worker| worker.in_flight.load(Ordering::SeqCst))
    }

    /// True while the worker of `effect` is running
    #[must_use]
    pub fn is_running(&self, effect: &str) -> Option<bool> {
        self.worker(effect).map(|worker| !worker.handle.is_finished())
    }

    /// Names and policies of the registered effects, in registration order
    #[must_use]
    pub fn effects(&self) -> Vec<(&'static str, ConcurrencyPolicy)> {
        self.workers
            .iter()
            .map(|worker| (worker.name, worker.policy))
            .collect()
    }

    /// Take the first wiring error raised by any effect, if any
    pub fn take_fatal(&self) -> Option<OrchestratorError> {
        lock(&self.fatal).take()
    }

    fn worker(&self, effect: &str) -> Option<&Worker> {
        self.workers.iter().find(|worker| worker.name == effect)
    }

    /// Stop every worker and wait for in-flight invocations
    ///
    /// Workers stop taking triggers at once, also while a concat invocation
    /// is running; triggers still waiting behind it are dropped. Workers
    /// whose in-flight invocations outlast the configured shutdown timeout
    /// are aborted.
    ///
    /// # Errors
    ///
    /// Returns the first wiring error raised by any effect.
    pub async fn shutdown(self) -> Result<(), OrchestratorError> {
        tracing::info!(effects = self.workers.len(), "Shutting down effect orchestrator");
        self.stop.send_replace(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for worker in self.workers {
            let mut handle = worker.handle;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(effect = worker.name, error = %error, "Effect worker failed");
                }
                Err(_) => {
                    tracing::warn!(
                        effect = worker.name,
                        in_flight = worker.in_flight.load(Ordering::SeqCst),
                        "Effect worker did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        match lock(&self.fatal).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<S, A> std::fmt::Debug for EffectOrchestrator<S, A>
where
    S: Send + Sync + 'static,
    A: Action,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectOrchestrator")
            .field("effects", &self.effects())
            .field("dead_letters", &self.dlq.len())
            .finish_non_exhaustive()
    }
}

struct EffectContext<S, A>
where
    S: Send + Sync + 'static,
    A: Action,
{
    definition: EffectDefinition<A>,
    retry: RetryPolicy,
    store: Store<S, A>,
    dlq: DeadLetterQueue<A>,
    in_flight: Arc<AtomicUsize>,
    fatal: Arc<Mutex<Option<OrchestratorError>>>,
    halted: AtomicBool,
    halt: Notify,
}

async fn run_worker<S, A>(
    context: Arc<EffectContext<S, A>>,
    mut actions: ActionStream<A>,
    mut stop: watch::Receiver<bool>,
) where
    S: Send + Sync + 'static,
    A: Action,
{
    let name = context.definition.name;
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = stop.changed() => break,
            () = context.halt.notified() => break,
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(error) = joined {
                    tracing::error!(effect = name, error = %error, "Effect invocation task failed");
                }
            }
            next = actions.recv() => {
                let Some(action) = next else {
                    tracing::debug!(effect = name, "Action stream closed");
                    break;
                };

                if !context.definition.triggers.contains(&action.action_type()) {
                    continue;
                }

                match context.definition.policy {
                    ConcurrencyPolicy::Exhaust => {
                        if context.in_flight.load(Ordering::SeqCst) > 0 {
                            tracing::debug!(
                                effect = name,
                                action_type = action.action_type(),
                                "Invocation in flight, trigger ignored"
                            );
                            EffectMetrics::record_exhausted(name);
                            continue;
                        }
                        let guard = AtomicCounterGuard::acquire(&context.in_flight);
                        running.spawn(Arc::clone(&context).invoke(action, guard));
                    }
                    ConcurrencyPolicy::Concat => {
                        let guard = AtomicCounterGuard::acquire(&context.in_flight);
                        running.spawn(Arc::clone(&context).invoke(action, guard));

                        // The next trigger waits for this invocation.
                        tokio::select! {
                            biased;

                            _ = stop.changed() => break,
                            () = context.halt.notified() => break,
                            Some(joined) = running.join_next() => {
                                if let Err(error) = joined {
                                    tracing::error!(effect = name, error = %error, "Effect invocation task failed");
                                }
                            }
                        }
                    }
                    ConcurrencyPolicy::Merge => {
                        let guard = AtomicCounterGuard::acquire(&context.in_flight);
                        running.spawn(Arc::clone(&context).invoke(action, guard));
                    }
                }
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(error) = joined {
            tracing::error!(effect = name, error = %error, "Effect invocation task failed");
        }
    }

    tracing::debug!(effect = name, "Effect worker stopped");
}

impl<S, A> EffectContext<S, A>
where
    S: Send + Sync + 'static,
    A: Action,
{
    #[tracing::instrument(
        skip(self, trigger, guard),
        name = "effect_invoke",
        fields(effect = self.definition.name, policy = %self.definition.policy)
    )]
    async fn invoke(self: Arc<Self>, trigger: A, guard: AtomicCounterGuard) {
        let name = self.definition.name;
        EffectMetrics::record_invocation(name, self.definition.policy.as_str());
        let start = Instant::now();

        let effect = match self.call_handler(&trigger) {
            Ok(effect) => effect,
            Err(error) => {
                drop(guard);
                self.fail(error, &trigger, 1);
                return;
            }
        };

        match effect {
            Effect::None => {
                tracing::trace!(effect = name, "Handler returned no work");
            }
            Effect::Future(future) => {
                let (outcome, attempts) = self.run_future(future, &trigger).await;
                EffectMetrics::record_duration(name, start.elapsed());
                // The busy window ends before the follow-up is visible
                drop(guard);

                match outcome {
                    Ok(action) => self.emit(action),
                    Err(error) => self.fail(error, &trigger, attempts),
                }
            }
            Effect::Stream(mut stream) => {
                loop {
                    match AssertUnwindSafe(stream.next()).catch_unwind().await {
                        Ok(Some(Ok(action))) => self.emit(action),
                        Ok(Some(Err(error))) => self.fail(error, &trigger, 1),
                        Ok(None) => break,
                        Err(payload) => {
                            self.fail(EffectError::Panicked(panic_message(&*payload)), &trigger, 1);
                            break;
                        }
                    }
                    if self.halted.load(Ordering::SeqCst) {
                        break;
                    }
                }
                EffectMetrics::record_duration(name, start.elapsed());
                drop(guard);
            }
        }
    }

    fn call_handler(&self, trigger: &A) -> Result<Effect<A>, EffectError> {
        let handler = &self.definition.handler;
        std::panic::catch_unwind(AssertUnwindSafe(|| handler(trigger.clone())))
            .map_err(|payload| EffectError::Panicked(panic_message(&*payload)))
    }

    /// Runs the first future, re-invoking the handler for each retry.
    async fn run_future(&self, first: EffectFuture<A>, trigger: &A) -> (Result<A, EffectError>, usize) {
        let mut first = Some(first);

        retry_while(&self.retry, EffectError::is_retryable, |_| {
            let future = first.take().map_or_else(|| self.recreate(trigger), Ok);
            async move {
                match future {
                    Ok(future) => AssertUnwindSafe(future)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| Err(EffectError::Panicked(panic_message(&*payload)))),
                    Err(error) => Err(error),
                }
            }
        })
        .await
    }

    fn recreate(&self, trigger: &A) -> Result<EffectFuture<A>, EffectError> {
        match self.call_handler(trigger)? {
            Effect::Future(future) => Ok(future),
            other => Err(EffectError::collaborator(format!(
                "retry of `{}` produced {other:?} instead of a future",
                self.definition.name
            ))),
        }
    }

    fn emit(&self, action: A) {
        let name = self.definition.name;
        let action_type = action.action_type();

        if self.halted.load(Ordering::SeqCst) {
            tracing::debug!(effect = name, action_type, "Effect halted, follow-up discarded");
            return;
        }

        if !self.definition.emits.contains(&action_type) {
            self.raise_fatal(OrchestratorError::UndeclaredOutput {
                effect: name,
                action_type,
            });
            return;
        }

        match self.store.dispatch(action) {
            Ok(()) => tracing::debug!(effect = name, action_type, "Dispatched effect follow-up"),
            Err(StoreError::ShutdownInProgress) => {
                tracing::debug!(effect = name, action_type, "Store shut down, follow-up discarded");
            }
            Err(source) => self.raise_fatal(OrchestratorError::Dispatch { effect: name, source }),
        }
    }

    fn fail(&self, error: EffectError, trigger: &A, attempts: usize) {
        let name = self.definition.name;
        EffectMetrics::record_failure(name);

        match &self.definition.on_error {
            Some(on_error) => match on_error(&error, trigger) {
                Some(action) => {
                    tracing::warn!(
                        effect = name,
                        error = %error,
                        attempts,
                        follow_up = action.action_type(),
                        "Effect failed, dispatching failure action"
                    );
                    self.emit(action);
                }
                None => {
                    tracing::warn!(effect = name, error = %error, attempts, "Effect failed, error handler ignored it");
                }
            },
            None => {
                tracing::warn!(effect = name, error = %error, attempts, "Effect failed without error handler");
                self.dlq.push(trigger.clone(), name, error.to_string(), attempts);
            }
        }
    }

    fn raise_fatal(&self, error: OrchestratorError) {
        let name = self.definition.name;
        tracing::error!(effect = name, error = %error, "Effect wiring error, stopping effect");
        EffectMetrics::record_fatal(name);

        self.halted.store(true, Ordering::SeqCst);
        lock(&self.fatal).get_or_insert(error);
        self.halt.notify_one();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use stately_core::action::ActionTypeError;
    use stately_core::composition::CombinedReducer;
    use stately_macros::Action;

    #[derive(Action, Clone, Debug, PartialEq)]
    enum PingAction {
        #[command]
        Ping,
        #[event]
        Pong,
    }

    fn store() -> Store<(), PingAction> {
        Store::new((), CombinedReducer::new())
    }

    fn pong() -> EffectDefinition<PingAction> {
        EffectDefinition::new("pong", ConcurrencyPolicy::Merge, |_| Effect::None)
            .triggered_by([PingAction::PING])
            .emits([PingAction::PONG])
    }

    #[tokio::test]
    async fn test_register_validates_triggers() {
        let mut orchestrator = EffectOrchestrator::new(store());

        let no_triggers = EffectDefinition::new("idle", ConcurrencyPolicy::Concat, |_: PingAction| Effect::None);
        assert_eq!(
            orchestrator.register(no_triggers).unwrap_err(),
            OrchestratorError::NoTriggers { effect: "idle" }
        );

        let unknown = pong().triggered_by(["Pang"]);
        assert_eq!(
            orchestrator.register(unknown).unwrap_err(),
            OrchestratorError::InvalidActionType {
                effect: "pong",
                source: ActionTypeError::Unknown("Pang".to_string()),
            }
        );

        let blank_output = pong().emits([""]);
        assert!(matches!(
            orchestrator.register(blank_output).unwrap_err(),
            OrchestratorError::InvalidActionType {
                source: ActionTypeError::Empty,
                ..
            }
        ));

        assert!(orchestrator.effects().is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_names() {
        let mut orchestrator = EffectOrchestrator::new(store());

        orchestrator.register(pong()).unwrap();
        assert_eq!(
            orchestrator.register(pong()).unwrap_err(),
            OrchestratorError::DuplicateEffect("pong")
        );

        assert_eq!(orchestrator.effects(), vec![("pong", ConcurrencyPolicy::Merge)]);
        assert_eq!(orchestrator.in_flight("pong"), Some(0));
        assert_eq!(orchestrator.in_flight("missing"), None);
        assert!(orchestrator.shutdown().await.is_ok());
    }

    #[test]
    fn test_panic_message_extraction() {
        let static_payload: Box<dyn Any + Send> = Box::new("static");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other_payload: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(static_payload.as_ref()), "static");
        assert_eq!(panic_message(owned_payload.as_ref()), "owned");
        assert_eq!(panic_message(other_payload.as_ref()), "unknown panic payload");
    }
}
