//! Prometheus metrics for the store and the effect orchestrator.
//!
//! Recording goes through the `metrics` facade and is always on. Values
//! reach Prometheus once [`MetricsServer::start`] installs the exporter.
//!
//! | family     | recorder          | labels            |
//! |------------|-------------------|-------------------|
//! | `store_*`  | [`StoreMetrics`]  | `store`, `slice`  |
//! | `effects_*`| [`EffectMetrics`] | `effect`, `policy`|
//! | `retry_*`  | [`RetryMetrics`]  |                   |
//! | `dlq_*`    | [`DlqMetrics`]    | `effect`          |
//!
//! ```rust,no_run
//! use stately_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut metrics = MetricsServer::new("0.0.0.0:9000".parse()?);
//! metrics.start()?;
//! // ... run the store
//! print!("{}", metrics.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Histogram buckets for `*_duration_seconds`, from 100µs to 2.5s
const DURATION_BUCKETS: &[f64] = &[
    0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

#[derive(Clone, Copy)]
enum Kind {
    Counter,
    Gauge,
    Histogram,
}

const DESCRIPTIONS: &[(&str, Kind, &str)] = &[
    ("store_actions_dispatched_total", Kind::Counter, "Actions accepted by a store"),
    ("store_reduce_duration_seconds", Kind::Histogram, "Root reducer run time for one action"),
    ("store_slice_failures_total", Kind::Counter, "Actions rejected by a slice reducer"),
    ("store_queue_depth", Kind::Gauge, "Actions waiting to be reduced"),
    ("store_state_changes_total", Kind::Counter, "Actions that produced a new state"),
    ("effects_invocations_total", Kind::Counter, "Effect invocations started"),
    ("effects_exhausted_total", Kind::Counter, "Triggers ignored by exhaust effects"),
    ("effects_failures_total", Kind::Counter, "Failed effect invocations"),
    ("effects_fatal_total", Kind::Counter, "Effect wiring errors that stopped a worker"),
    ("effects_duration_seconds", Kind::Histogram, "Run time of one effect invocation"),
    ("retry_attempts_total", Kind::Counter, "Retries scheduled after a transient failure"),
    ("retry_successes_total", Kind::Counter, "Invocations that succeeded after retrying"),
    ("retry_exhausted_total", Kind::Counter, "Invocations that ran out of retries"),
    ("dlq_size", Kind::Gauge, "Entries held by the dead letter queue"),
    ("dlq_pushed_total", Kind::Counter, "Failures added to the dead letter queue"),
    ("dlq_dropped_total", Kind::Counter, "Dead letters evicted by the capacity bound"),
    ("dlq_drained_total", Kind::Counter, "Dead letters drained"),
];

fn describe_all() {
    for &(name, kind, description) in DESCRIPTIONS {
        match kind {
            Kind::Counter => describe_counter!(name, description),
            Kind::Gauge => describe_gauge!(name, description),
            Kind::Histogram => describe_histogram!(name, description),
        }
    }
}

/// Errors raised while installing the Prometheus exporter
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The exporter configuration was rejected
    #[error("invalid metrics exporter configuration: {0}")]
    Build(String),
    /// Another recorder could not be replaced
    #[error("could not install metrics recorder: {0}")]
    Install(String),
}

impl From<BuildError> for MetricsError {
    fn from(error: BuildError) -> Self {
        match error {
            BuildError::FailedToSetGlobalRecorder(_) => Self::Install(error.to_string()),
            other => Self::Build(other.to_string()),
        }
    }
}

/// Owner of the process-wide Prometheus recorder
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsServer")
            .field("addr", &self.addr)
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsServer {
    /// A server advertising its scrape endpoint on `addr`
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe every metric and install the exporter as global recorder
    ///
    /// When a recorder is already installed, for instance by another
    /// server in the same process, this server stays inert and `render`
    /// returns `None`.
    ///
    /// # Errors
    ///
    /// [`MetricsError::Build`] when the exporter configuration is invalid.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        describe_all();

        let installed = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)?
            .install_recorder();

        match installed.map_err(MetricsError::from) {
            Ok(handle) => {
                tracing::info!(addr = %self.addr, "Prometheus recorder installed");
                self.handle = Some(handle);
                Ok(())
            }
            Err(MetricsError::Install(reason)) => {
                tracing::warn!(%reason, "Metrics recorder already installed, leaving it in place");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Advertised scrape address
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Exporter handle, when this server installed the recorder
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current scrape text
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record an accepted action.
    pub fn record_dispatch(store: &str) {
        counter!("store_actions_dispatched_total", "store" => store.to_string()).increment(1);
    }

    /// Record one root reducer run.
    pub fn record_reduce(store: &str, duration: Duration, changed: bool) {
        histogram!("store_reduce_duration_seconds", "store" => store.to_string())
            .record(duration.as_secs_f64());
        if changed {
            counter!("store_state_changes_total", "store" => store.to_string()).increment(1);
        }
    }

    /// Record a slice reducer failure.
    pub fn record_slice_failure(store: &str, slice: &'static str) {
        counter!("store_slice_failures_total", "store" => store.to_string(), "slice" => slice)
            .increment(1);
    }

    /// Record the number of queued actions.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_queue_depth(store: &str, depth: usize) {
        gauge!("store_queue_depth", "store" => store.to_string()).set(depth as f64);
    }
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record the start of an invocation.
    pub fn record_invocation(effect: &'static str, policy: &'static str) {
        counter!("effects_invocations_total", "effect" => effect, "policy" => policy).increment(1);
    }

    /// Record a trigger ignored because an exhaust invocation was in flight.
    pub fn record_exhausted(effect: &'static str) {
        counter!("effects_exhausted_total", "effect" => effect).increment(1);
    }

    /// Record how long an invocation ran.
    pub fn record_duration(effect: &'static str, duration: Duration) {
        histogram!("effects_duration_seconds", "effect" => effect).record(duration.as_secs_f64());
    }

    /// Record an effect failure.
    pub fn record_failure(effect: &'static str) {
        counter!("effects_failures_total", "effect" => effect).increment(1);
    }

    /// Record a fatal wiring error.
    pub fn record_fatal(effect: &'static str) {
        counter!("effects_fatal_total", "effect" => effect).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

/// Dead letter queue metrics recorder.
pub struct DlqMetrics;

impl DlqMetrics {
    /// Record a new entry and the resulting queue size.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_push(effect: &'static str, size: usize) {
        counter!("dlq_pushed_total", "effect" => effect).increment(1);
        gauge!("dlq_size").set(size as f64);
    }

    /// Record an entry lost to the capacity bound.
    pub fn record_drop(effect: &'static str) {
        counter!("dlq_dropped_total", "effect" => effect).increment(1);
    }

    /// Record a drain of `count` entries.
    pub fn record_drain(count: usize) {
        counter!("dlq_drained_total").increment(count as u64);
        gauge!("dlq_size").set(0.0);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn test_every_family_is_described() {
        for prefix in ["store_", "effects_", "retry_", "dlq_"] {
            assert!(DESCRIPTIONS.iter().any(|(name, _, _)| name.starts_with(prefix)));
        }
    }

    #[test]
    fn test_new_server_is_inert() {
        let addr = "127.0.0.1:9090".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert_eq!(server.addr(), addr);
        assert_eq!(
            format!("{server:?}"),
            "MetricsServer { addr: 127.0.0.1:9090, installed: false }"
        );
    }

    #[test]
    fn test_second_start_leaves_recorder_in_place() {
        let mut first = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        let mut second = MetricsServer::new("127.0.0.1:0".parse().unwrap());

        assert!(first.start().is_ok());
        assert!(second.start().is_ok());
    }

    #[test]
    fn test_render_lists_recorded_families() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        StoreMetrics::record_dispatch("books");
        StoreMetrics::record_reduce("books", Duration::from_micros(40), true);
        EffectMetrics::record_invocation("load_books", "exhaust");
        DlqMetrics::record_push("delete_book", 1);

        // Inert when another test installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("store_actions_dispatched_total"));
            assert!(rendered.contains("effects_invocations_total"));
            assert!(rendered.contains("dlq_pushed_total"));
        }
    }
}
