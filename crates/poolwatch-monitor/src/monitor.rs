//! PoolMonitor — cumulative counters, refreshed gauges, and query timing.
//!
//! The monitor owns two kinds of numbers:
//! - **Counters** (`acquired`, `released`, `created`, `removed`) only ever
//!   increase and are safe to bump from any task concurrently.
//! - **Gauges** (`total`, `idle`, `waiting`, `max`) are re-read from the pool
//!   on every stats request and on every pool event, so a stats reader never
//!   sees numbers older than its own call.
//!
//! Acquisitions and releases are counted once per wrapped query in
//! [`WrappedQuery::call`]. The pool's own `on_acquired` / `on_released`
//! callbacks only refresh gauges, so a query that goes through both the
//! wrapper and the pool is never counted twice. Connection creation and
//! removal are counted from the pool callbacks.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use poolwatch_core::{
    ConnectionStats, EventKind, MonitorSettings, PoolError, PoolGauges, PoolResult, PoolStats,
    QueryResult, Statement, duration_millis,
};
use poolwatch_pool::{ConnectionPool, PoolListener};

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    created: AtomicU64,
    removed: AtomicU64,
}

impl Counters {
    fn slot(&self, kind: EventKind) -> &AtomicU64 {
        match kind {
            EventKind::Acquired => &self.acquired,
            EventKind::Released => &self.released,
            EventKind::Created => &self.created,
            EventKind::Removed => &self.removed,
        }
    }

    fn load(&self) -> ConnectionStats {
        ConnectionStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
        }
    }
}

/// Last gauge reading, stored field by field.
#[derive(Debug, Default)]
struct GaugeCell {
    total: AtomicUsize,
    idle: AtomicUsize,
    waiting: AtomicUsize,
    max: AtomicUsize,
}

impl GaugeCell {
    fn store(&self, gauges: PoolGauges) {
        self.total.store(gauges.total, Ordering::Relaxed);
        self.idle.store(gauges.idle, Ordering::Relaxed);
        self.waiting.store(gauges.waiting, Ordering::Relaxed);
        self.max.store(gauges.max, Ordering::Relaxed);
    }

    fn load(&self) -> PoolGauges {
        PoolGauges {
            total: self.total.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Shared between the monitor handle and the pool, which holds it as a listener.
#[derive(Debug, Default)]
struct MonitorState {
    counters: Counters,
    gauges: GaugeCell,
    slow_queries: AtomicU64,
}

impl MonitorState {
    fn record(&self, kind: EventKind) {
        self.counters.slot(kind).fetch_add(1, Ordering::Relaxed);
    }
}

impl PoolListener for MonitorState {
    fn on_created(&self, gauges: PoolGauges) {
        self.record(EventKind::Created);
        self.gauges.store(gauges);
        debug!(total = gauges.total, max = gauges.max, "pool connection created");
    }

    fn on_acquired(&self, gauges: PoolGauges) {
        self.gauges.store(gauges);
    }

    fn on_released(&self, gauges: PoolGauges) {
        self.gauges.store(gauges);
    }

    fn on_removed(&self, gauges: PoolGauges) {
        self.record(EventKind::Removed);
        self.gauges.store(gauges);
        debug!(total = gauges.total, max = gauges.max, "pool connection removed");
    }

    fn on_error(&self, err: &PoolError, gauges: PoolGauges) {
        self.gauges.store(gauges);
        error!(error = %err, "unexpected error on idle pool connection");
    }
}

/// Observes one connection pool.
///
/// Cloning is cheap: clones share the same counters and pool.
pub struct PoolMonitor<P> {
    pool: Arc<P>,
    state: Arc<MonitorState>,
    slow_query_threshold: Duration,
    query_log_chars: usize,
}

impl<P> Clone for PoolMonitor<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            state: Arc::clone(&self.state),
            slow_query_threshold: self.slow_query_threshold,
            query_log_chars: self.query_log_chars,
        }
    }
}

impl<P> std::fmt::Debug for PoolMonitor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMonitor")
            .field("stats", &self.state.counters.load())
            .field("gauges", &self.state.gauges.load())
            .field("slow_query_threshold", &self.slow_query_threshold)
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionPool> PoolMonitor<P> {
    /// Attach a monitor with the default thresholds.
    pub fn new(pool: Arc<P>) -> Self {
        Self::with_settings(pool, &MonitorSettings::default())
    }

    /// Attach a monitor and subscribe it to the pool's lifecycle events.
    ///
    /// Counters start at zero. Gauges are read once immediately.
    pub fn with_settings(pool: Arc<P>, settings: &MonitorSettings) -> Self {
        let state = Arc::new(MonitorState::default());
        pool.subscribe(state.clone());
        let monitor = Self {
            pool,
            state,
            slow_query_threshold: settings.slow_query_threshold,
            query_log_chars: settings.query_log_chars.max(1),
        };
        monitor.refresh_gauges();
        monitor
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    pub fn slow_query_threshold(&self) -> Duration {
        self.slow_query_threshold
    }

    /// Bump the counter for `kind` by exactly one.
    pub fn record_event(&self, kind: EventKind) {
        self.state.record(kind);
    }

    /// Re-read all four gauges from the pool.
    pub fn refresh_gauges(&self) {
        self.state.gauges.store(self.pool.gauges());
    }

    /// The most recently stored gauges, without touching the pool.
    pub fn last_gauges(&self) -> PoolGauges {
        self.state.gauges.load()
    }

    /// Counters only.
    pub fn connection_stats(&self) -> ConnectionStats {
        self.state.counters.load()
    }

    /// Wrapped queries that succeeded after exceeding the slow threshold.
    pub fn slow_query_count(&self) -> u64 {
        self.state.slow_queries.load(Ordering::Relaxed)
    }

    /// Refresh gauges and return a snapshot with the counters.
    ///
    /// Never changes a counter.
    pub fn get_stats(&self) -> PoolStats {
        self.refresh_gauges();
        PoolStats::new(self.state.gauges.load(), self.state.counters.load())
    }

    /// Emit one info-level stats line.
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            active = stats.active,
            max = stats.max,
            usage = %stats.usage,
            idle = stats.idle,
            waiting = stats.waiting,
            usage_percent = %format_args!("{:.1}", stats.usage_percent()),
            "database pool stats"
        );
    }

    /// Decorate `exec` so every call is counted and timed.
    pub fn wrap_query<F>(&self, exec: F) -> WrappedQuery<P, F> {
        WrappedQuery {
            monitor: self.clone(),
            exec,
        }
    }

    /// Run a statement on the pool through the instrumented path.
    pub async fn query(
        &self,
        text: &str,
        params: &[serde_json::Value],
    ) -> PoolResult<QueryResult> {
        let pool = Arc::clone(&self.pool);
        let wrapped = self.wrap_query(move |stmt: Statement| {
            let pool = Arc::clone(&pool);
            async move { pool.query(&stmt.text, &stmt.params).await }
        });
        wrapped
            .call(Statement::with_params(text, params.to_vec()))
            .await
    }

    /// Log stats every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            "pool stats reporter started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.log_stats();
                }
                _ = shutdown.changed() => {
                    info!("pool stats reporter shutting down");
                    break;
                }
            }
        }
    }

    fn note_completion(&self, fragment: &str, elapsed: Duration) {
        let elapsed_ms = duration_millis(elapsed);
        if elapsed > self.slow_query_threshold {
            self.state.slow_queries.fetch_add(1, Ordering::Relaxed);
            warn!(
                query = %fragment,
                duration_ms = elapsed_ms,
                threshold_ms = duration_millis(self.slow_query_threshold),
                "slow query"
            );
        } else {
            debug!(duration_ms = elapsed_ms, "query completed");
        }
    }
}

/// A query function decorated by [`PoolMonitor::wrap_query`].
pub struct WrappedQuery<P, F> {
    monitor: PoolMonitor<P>,
    exec: F,
}

impl<P: ConnectionPool, F> WrappedQuery<P, F> {
    /// Invoke the wrapped function.
    ///
    /// Records one acquisition before running and exactly one release after,
    /// whether the query succeeds, fails, or is cancelled. Errors are returned
    /// unchanged. A successful query slower than the threshold is logged once
    /// with its text truncated.
    pub async fn call<Q, Fut, T, E>(&self, query: Q) -> Result<T, E>
    where
        Q: AsRef<str>,
        F: Fn(Q) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let fragment = truncate_query(query.as_ref(), self.monitor.query_log_chars).to_owned();

        let in_flight = InFlight::begin(&self.monitor);
        let started = Instant::now();
        let result = (self.exec)(query).await;
        let elapsed = started.elapsed();
        drop(in_flight);

        match &result {
            Ok(_) => self.monitor.note_completion(&fragment, elapsed),
            Err(e) => debug!(
                duration_ms = duration_millis(elapsed),
                error = %e,
                "query failed"
            ),
        }
        result
    }

    pub fn monitor(&self) -> &PoolMonitor<P> {
        &self.monitor
    }
}

/// Pairs an acquisition with its release, including on cancellation.
struct InFlight<'a, P: ConnectionPool> {
    monitor: &'a PoolMonitor<P>,
}

impl<'a, P: ConnectionPool> InFlight<'a, P> {
    fn begin(monitor: &'a PoolMonitor<P>) -> Self {
        monitor.record_event(EventKind::Acquired);
        monitor.refresh_gauges();
        Self { monitor }
    }
}

impl<P: ConnectionPool> Drop for InFlight<'_, P> {
    fn drop(&mut self) {
        self.monitor.record_event(EventKind::Released);
        self.monitor.refresh_gauges();
    }
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_query(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
