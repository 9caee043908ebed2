//! Bounded connection pool for a single database target.
//!
//! Connections are created lazily through a [`ConnectionFactory`], handed out
//! as [`PooledLease`]s, and returned to the idle list when the lease drops.
//! A semaphore bounds the total number of connections at `max_size`.
//!
//! # Architecture
//!
//! ```text
//! acquire()
//!   → draining?                → Err(Draining)
//!   → permit free?             → take it
//!   → otherwise wait (counted in `waiting`) up to connect_timeout
//!       → timeout              → Err(Exhausted)
//!   → idle connection?         → reuse
//!   → otherwise factory.connect() on a blocking worker
//!
//! PooledLease dropped
//!   → healthy and not draining → idle list
//!   → otherwise                → close + on_removed
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use poolwatch_core::{
    PoolError, PoolGauges, PoolResult, PoolSettings, QueryResult, duration_millis,
};

use crate::{ConnectionPool, PoolListener};

/// The database a pool connects to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
}

impl PoolTarget {
    pub fn new(host: &str, port: u16, database: &str, user: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            database: database.to_string(),
            user: user.to_string(),
        }
    }
}

impl std::fmt::Display for PoolTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// Configuration for a [`Pool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum connections held at once (default: 20).
    pub max_size: usize,
    /// Idle connections older than this are reaped (default: 30s).
    pub idle_timeout: Duration,
    /// Maximum time to wait for a free slot when the pool is exhausted (default: 10s).
    pub connect_timeout: Duration,
    /// How long `drain()` waits for in-flight leases (default: 30s).
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 20,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_size: settings.max_size,
            idle_timeout: settings.idle_timeout,
            connect_timeout: settings.connect_timeout,
            drain_timeout: settings.drain_timeout,
        }
    }
}

/// Transport underneath a pooled connection, abstracted for testability.
///
/// Methods are blocking; the pool calls them from blocking workers.
pub trait ConnectionBackend: Send + std::fmt::Debug {
    /// Execute a statement.
    fn execute(
        &mut self,
        query: &str,
        params: &[serde_json::Value],
    ) -> PoolResult<QueryResult>;
    /// Liveness ping. Returns `true` if the connection is alive.
    fn ping(&mut self) -> bool;
    /// Close the underlying transport.
    fn close(&mut self);
}

/// Factory for new connections, injected for testability.
pub trait ConnectionFactory: Send + Sync {
    fn connect(
        &self,
        target: &PoolTarget,
        password: Option<&str>,
    ) -> PoolResult<Box<dyn ConnectionBackend>>;
}

/// Outcome of draining a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Idle connections closed once in-flight work settled.
    pub closed: usize,
    /// Leases still checked out when the drain timeout expired.
    pub abandoned: usize,
}

#[derive(Debug)]
struct PooledConnection {
    id: u64,
    created_at: Instant,
    last_used: Instant,
    backend: Box<dyn ConnectionBackend>,
}

struct PoolInner {
    config: PoolConfig,
    target: PoolTarget,
    password: Option<String>,
    factory: Arc<dyn ConnectionFactory>,
    /// Never held across an await point.
    idle: Mutex<Vec<PooledConnection>>,
    semaphore: Arc<Semaphore>,
    total: AtomicUsize,
    idle_count: AtomicUsize,
    waiting: AtomicUsize,
    in_use: AtomicUsize,
    next_id: AtomicU64,
    draining: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn PoolListener>>>,
}

impl PoolInner {
    fn gauges(&self) -> PoolGauges {
        PoolGauges {
            total: self.total.load(Ordering::Relaxed),
            idle: self.idle_count.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            max: self.config.max_size,
        }
    }

    fn emit(&self, notify: impl Fn(&dyn PoolListener, PoolGauges)) {
        let gauges = self.gauges();
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            notify(listener.as_ref(), gauges);
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<PooledConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_idle(&self) -> Option<PooledConnection> {
        let mut idle = self.lock_idle();
        let conn = idle.pop();
        if conn.is_some() {
            self.idle_count.fetch_sub(1, Ordering::Relaxed);
        }
        conn
    }

    /// Drain may already have zeroed the gauge.
    fn forget_idle(&self, n: usize) {
        let _ = self
            .idle_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(n))
            });
    }

    fn check_in(&self, mut conn: PooledConnection, healthy: bool) {
        conn.last_used = Instant::now();
        self.in_use.fetch_sub(1, Ordering::Relaxed);

        if healthy && !self.draining.load(Ordering::Acquire) {
            let id = conn.id;
            let idle_count = {
                let mut idle = self.lock_idle();
                idle.push(conn);
                self.idle_count.fetch_add(1, Ordering::Relaxed) + 1
            };
            debug!(connection = id, idle_count, "returned connection to pool");
            self.emit(|l, g| l.on_released(g));
            return;
        }

        self.emit(|l, g| l.on_released(g));
        let reason = if healthy { "pool draining" } else { "connection broken" };
        self.destroy(conn, reason);
    }

    fn destroy(&self, mut conn: PooledConnection, reason: &str) {
        conn.backend.close();
        self.total.fetch_sub(1, Ordering::Relaxed);
        debug!(
            connection = conn.id,
            age_ms = duration_millis(conn.created_at.elapsed()),
            reason,
            "closed connection"
        );
        self.emit(|l, g| l.on_removed(g));
    }

    fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PooledConnection> = {
            let mut idle = self.lock_idle();
            let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *idle)
                .into_iter()
                .partition(|c| now.duration_since(c.last_used) >= self.config.idle_timeout);
            *idle = kept;
            self.idle_count.fetch_sub(expired.len(), Ordering::Relaxed);
            expired
        };

        let reaped = expired.len();
        for conn in expired {
            self.destroy(conn, "idle timeout");
        }
        reaped
    }

    fn check_idle_blocking(&self) -> usize {
        // Pings can block for the read timeout, so they run with the idle list
        // unlocked. The candidates stay counted as idle until settled.
        let candidates = std::mem::take(&mut *self.lock_idle());
        let mut unsettled = UnsettledCheck {
            pool: self,
            count: candidates.len(),
        };
        let mut alive = Vec::new();
        let mut failed = Vec::new();
        for mut conn in candidates {
            if conn.backend.ping() {
                alive.push(conn);
            } else {
                failed.push(conn);
            }
        }

        let (surplus, reason) = {
            let mut idle = self.lock_idle();
            unsettled.count = 0;
            self.forget_idle(failed.len());
            if self.draining.load(Ordering::Acquire) {
                self.forget_idle(alive.len());
                (alive, "pool drained")
            } else {
                idle.extend(alive);
                // Acquisitions during the check may have opened replacements.
                let over = self
                    .total
                    .load(Ordering::Relaxed)
                    .saturating_sub(failed.len())
                    .saturating_sub(self.config.max_size)
                    .min(idle.len());
                self.forget_idle(over);
                (idle.drain(..over).collect(), "pool over capacity")
            }
        };
        for conn in surplus {
            self.destroy(conn, reason);
        }

        let count = failed.len();
        for conn in failed {
            let err = PoolError::Pool(format!(
                "idle connection {} to {} failed liveness check",
                conn.id, self.target
            ));
            warn!(connection = conn.id, error = %err, "removed unhealthy idle connection");
            self.emit(|l, g| l.on_error(&err, g));
            self.destroy(conn, "failed liveness check");
        }
        count
    }
}

/// Drops the gauges for connections lost when a liveness check unwinds.
struct UnsettledCheck<'a> {
    pool: &'a PoolInner,
    count: usize,
}

impl Drop for UnsettledCheck<'_> {
    fn drop(&mut self) {
        if self.count > 0 {
            self.pool.forget_idle(self.count);
            self.pool.total.fetch_sub(self.count, Ordering::Relaxed);
        }
    }
}

/// Decrements the waiting gauge even if the waiter is cancelled.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A connection checked out of the pool.
///
/// Dropping the lease returns the connection; a lease marked broken closes it instead.
pub struct PooledLease {
    pool: Arc<PoolInner>,
    conn: Option<PooledConnection>,
    healthy: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledLease {
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map(|c| c.id).unwrap_or_default()
    }

    /// Run a statement on this connection, blocking the current thread.
    ///
    /// An error that leaves the connection unusable marks the lease broken.
    pub fn execute_blocking(
        &mut self,
        text: &str,
        params: &[serde_json::Value],
    ) -> PoolResult<QueryResult> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| PoolError::Pool("connection already returned".to_string()))?;
        let result = conn.backend.execute(text, params);
        if matches!(&result, Err(e) if e.is_fatal_for_connection()) {
            self.healthy = false;
        }
        result
    }

    /// Close the connection instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.healthy = false;
    }
}

impl Drop for PooledLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn, self.healthy);
        }
    }
}

impl std::fmt::Debug for PooledLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledLease")
            .field("id", &self.id())
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

/// Bounded pool of connections to one [`PoolTarget`].
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(
        config: PoolConfig,
        target: PoolTarget,
        password: Option<String>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Self {
            inner: Arc::new(PoolInner {
                config,
                target,
                password,
                factory,
                idle: Mutex::new(Vec::new()),
                semaphore,
                total: AtomicUsize::new(0),
                idle_count: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                draining: AtomicBool::new(false),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn target(&self) -> &PoolTarget {
        &self.inner.target
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Leases currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Relaxed)
    }

    /// Establish one connection to prove the target is reachable.
    ///
    /// The connection stays in the pool as idle. Connection failures are
    /// returned unchanged.
    pub async fn connect(&self) -> PoolResult<()> {
        let lease = self.acquire().await?;
        info!(target = %self.inner.target, "database connection established");
        drop(lease);
        Ok(())
    }

    /// Check out a connection, reusing an idle one when possible.
    pub async fn acquire(&self) -> PoolResult<PooledLease> {
        let inner = &self.inner;
        if self.is_draining() {
            return Err(PoolError::Draining);
        }

        let permit = match Arc::clone(&inner.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(PoolError::Draining),
            Err(TryAcquireError::NoPermits) => self.wait_for_permit().await?,
        };
        if self.is_draining() {
            return Err(PoolError::Draining);
        }

        let conn = match inner.pop_idle() {
            Some(conn) => {
                debug!(connection = conn.id, target = %inner.target, "reused idle connection");
                conn
            }
            None => self.open().await?,
        };

        inner.in_use.fetch_add(1, Ordering::Relaxed);
        inner.emit(|l, g| l.on_acquired(g));

        Ok(PooledLease {
            pool: Arc::clone(inner),
            conn: Some(conn),
            healthy: true,
            _permit: permit,
        })
    }

    async fn wait_for_permit(&self) -> PoolResult<OwnedSemaphorePermit> {
        let inner = &self.inner;
        let _waiting = WaitingGuard::enter(&inner.waiting);
        let acquire = Arc::clone(&inner.semaphore).acquire_owned();

        match tokio::time::timeout(inner.config.connect_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::Draining),
            Err(_) => {
                warn!(
                    target = %inner.target,
                    max_size = inner.config.max_size,
                    timeout = ?inner.config.connect_timeout,
                    "connection pool exhausted"
                );
                Err(PoolError::Exhausted(inner.config.connect_timeout))
            }
        }
    }

    async fn open(&self) -> PoolResult<PooledConnection> {
        let inner = &self.inner;
        let factory = Arc::clone(&inner.factory);
        let target = inner.target.clone();
        let password = inner.password.clone();

        let backend =
            tokio::task::spawn_blocking(move || factory.connect(&target, password.as_deref()))
                .await
                .map_err(|e| PoolError::Connection(format!("connect task failed: {e}")))??;

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        inner.total.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, target = %inner.target, "created new connection");
        inner.emit(|l, g| l.on_created(g));

        Ok(PooledConnection {
            id,
            created_at: now,
            last_used: now,
            backend,
        })
    }

    /// Acquire, run one statement on a blocking worker, release.
    pub async fn execute(
        &self,
        text: &str,
        params: &[serde_json::Value],
    ) -> PoolResult<QueryResult> {
        let mut lease = self.acquire().await?;
        let text = text.to_owned();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || lease.execute_blocking(&text, &params))
            .await
            .map_err(|e| PoolError::Query(format!("query task failed: {e}")))?
    }

    /// Close idle connections unused for longer than `idle_timeout`.
    pub fn reap_idle(&self) -> usize {
        self.inner.reap_idle()
    }

    /// Ping idle connections, removing the ones that fail.
    pub async fn check_idle(&self) -> usize {
        let inner = Arc::clone(&self.inner);
        match tokio::task::spawn_blocking(move || inner.check_idle_blocking()).await {
            Ok(failed) => failed,
            Err(e) => {
                warn!(target = %self.inner.target, error = %e, "idle liveness check task failed");
                0
            }
        }
    }

    /// Reap and health-check idle connections every `interval` until shutdown.
    pub async fn run_maintenance(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = duration_millis(interval), "pool maintenance started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let reaped = self.reap_idle();
                    let failed = self.check_idle().await;
                    if reaped + failed > 0 {
                        debug!(reaped, failed, "pool maintenance pass");
                    }
                }
                _ = shutdown.changed() => {
                    info!("pool maintenance shutting down");
                    break;
                }
            }
        }
    }

    /// Stop accepting acquisitions, wait for in-flight leases, then close idle connections.
    pub async fn drain(&self) -> DrainReport {
        let inner = &self.inner;
        inner.draining.store(true, Ordering::Release);
        inner.semaphore.close();
        info!(
            target = %inner.target,
            drain_timeout = ?inner.config.drain_timeout,
            "connection pool draining started"
        );

        let deadline = Instant::now() + inner.config.drain_timeout;
        let poll_interval = Duration::from_millis(50);

        loop {
            let in_use = inner.in_use.load(Ordering::Relaxed);
            if in_use == 0 {
                info!("all in-flight connections drained gracefully");
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    remaining = in_use,
                    "drain timeout expired, abandoning in-flight connections"
                );
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        let idle = {
            let mut idle = inner.lock_idle();
            inner.idle_count.store(0, Ordering::Relaxed);
            std::mem::take(&mut *idle)
        };
        let closed = idle.len();
        for conn in idle {
            inner.destroy(conn, "pool drained");
        }

        let abandoned = inner.in_use.load(Ordering::Relaxed);
        info!(closed, abandoned, "connection pool drain complete");
        DrainReport { closed, abandoned }
    }
}

impl ConnectionPool for Pool {
    fn total_count(&self) -> usize {
        self.inner.total.load(Ordering::Relaxed)
    }

    fn idle_count(&self) -> usize {
        self.inner.idle_count.load(Ordering::Relaxed)
    }

    fn waiting_count(&self) -> usize {
        self.inner.waiting.load(Ordering::Relaxed)
    }

    fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    fn subscribe(&self, listener: Arc<dyn PoolListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    async fn query(
        &self,
        text: &str,
        params: &[serde_json::Value],
    ) -> PoolResult<QueryResult> {
        self.execute(text, params).await
    }

    async fn end(&self) -> DrainReport {
        self.drain().await
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.inner.target)
            .field("config", &self.inner.config)
            .field("gauges", &self.inner.gauges())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    // ── Mock backend and factory ─────────────────────────────────────

    #[derive(Debug)]
    struct MockBackend {
        healthy: Arc<AtomicBool>,
        ping_delay_ms: Arc<AtomicU64>,
        ping_panics: Arc<AtomicBool>,
    }

    impl ConnectionBackend for MockBackend {
        fn execute(
            &mut self,
            query: &str,
            _params: &[serde_json::Value],
        ) -> PoolResult<QueryResult> {
            match query {
                "BROKEN" => Err(PoolError::Connection("connection reset by peer".to_string())),
                "BAD" => Err(PoolError::Query("syntax error at or near \"BAD\"".to_string())),
                _ => Ok(QueryResult::from_rows(vec![serde_json::json!({ "?column?": 1 })])),
            }
        }

        fn ping(&mut self) -> bool {
            if self.ping_panics.load(Ordering::Relaxed) {
                panic!("driver bug during ping");
            }
            std::thread::sleep(Duration::from_millis(self.ping_delay_ms.load(Ordering::Relaxed)));
            self.healthy.load(Ordering::Relaxed)
        }

        fn close(&mut self) {}
    }

    struct MockFactory {
        connect_count: AtomicU64,
        fail_with: Mutex<Option<String>>,
        healthy: Arc<AtomicBool>,
        ping_delay_ms: Arc<AtomicU64>,
        ping_panics: Arc<AtomicBool>,
    }

    impl MockFactory {
        fn new() -> Self {
            Self {
                connect_count: AtomicU64::new(0),
                fail_with: Mutex::new(None),
                healthy: Arc::new(AtomicBool::new(true)),
                ping_delay_ms: Arc::new(AtomicU64::new(0)),
                ping_panics: Arc::new(AtomicBool::new(false)),
            }
        }

        fn connects(&self) -> u64 {
            self.connect_count.load(Ordering::Relaxed)
        }
    }

    impl ConnectionFactory for MockFactory {
        fn connect(
            &self,
            _target: &PoolTarget,
            _password: Option<&str>,
        ) -> PoolResult<Box<dyn ConnectionBackend>> {
            if let Some(msg) = self.fail_with.lock().unwrap().clone() {
                return Err(PoolError::Connection(msg));
            }
            self.connect_count.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MockBackend {
                healthy: self.healthy.clone(),
                ping_delay_ms: self.ping_delay_ms.clone(),
                ping_panics: self.ping_panics.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl PoolListener for RecordingListener {
        fn on_created(&self, _: PoolGauges) {
            self.events.lock().unwrap().push("created".into());
        }
        fn on_acquired(&self, _: PoolGauges) {
            self.events.lock().unwrap().push("acquired".into());
        }
        fn on_released(&self, _: PoolGauges) {
            self.events.lock().unwrap().push("released".into());
        }
        fn on_removed(&self, _: PoolGauges) {
            self.events.lock().unwrap().push("removed".into());
        }
        fn on_error(&self, error: &PoolError, _: PoolGauges) {
            self.events.lock().unwrap().push(format!("error: {error}"));
        }
    }

    fn test_target() -> PoolTarget {
        PoolTarget::new("db.internal", 5432, "app", "svc")
    }

    fn test_config() -> PoolConfig {
        PoolConfig {
            max_size: 3,
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_millis(200),
            drain_timeout: Duration::from_millis(200),
        }
    }

    fn make_pool(config: PoolConfig) -> (Pool, Arc<MockFactory>) {
        let factory = Arc::new(MockFactory::new());
        let pool = Pool::new(config, test_target(), None, factory.clone());
        (pool, factory)
    }

    // ── Config / target ─────────────────────────────────────────────

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 20);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn pool_config_from_settings() {
        let settings = PoolSettings {
            max_size: 7,
            ..PoolSettings::default()
        };
        let config = PoolConfig::from(&settings);
        assert_eq!(config.max_size, 7);
        assert_eq!(config.connect_timeout, settings.connect_timeout);
    }

    #[test]
    fn target_display() {
        assert_eq!(test_target().to_string(), "svc@db.internal:5432/app");
    }

    // ── Acquire / release ───────────────────────────────────────────

    #[tokio::test]
    async fn acquire_creates_connection_via_factory() {
        let (pool, factory) = make_pool(test_config());
        let lease = pool.acquire().await.unwrap();
        assert_eq!(factory.connects(), 1);
        assert_eq!(pool.total_count(), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.in_use(), 1);
        drop(lease);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn acquire_reuses_released_connection() {
        let (pool, factory) = make_pool(test_config());
        let first = pool.acquire().await.unwrap();
        let id = first.id();
        drop(first);

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.id(), id);
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn acquire_exhausted_pool_returns_error() {
        let config = PoolConfig {
            max_size: 2,
            connect_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let (pool, _) = make_pool(config);
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted(_)));
        assert_eq!(pool.waiting_count(), 0);
    }

    #[tokio::test]
    async fn waiting_caller_is_counted_and_served_on_release() {
        let config = PoolConfig {
            max_size: 1,
            connect_timeout: Duration::from_secs(2),
            ..test_config()
        };
        let (pool, _) = make_pool(config);
        let pool = Arc::new(pool);
        let held = pool.acquire().await.unwrap();

        let waiter_pool = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await.map(|l| l.id()) });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.waiting_count(), 1);

        let held_id = held.id();
        drop(held);
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, held_id);
        assert_eq!(pool.waiting_count(), 0);
    }

    #[tokio::test]
    async fn factory_failure_propagates_message() {
        let (pool, factory) = make_pool(test_config());
        *factory.fail_with.lock().unwrap() = Some("ECONNREFUSED".to_string());

        let err = pool.connect().await.unwrap_err();
        assert_eq!(err.to_string(), "ECONNREFUSED");
        assert_eq!(pool.total_count(), 0);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn connect_leaves_one_idle_connection() {
        let (pool, _) = make_pool(test_config());
        pool.connect().await.unwrap();
        assert_eq!(pool.gauges(), PoolGauges { total: 1, idle: 1, waiting: 0, max: 3 });
    }

    // ── Queries ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn query_returns_rows_and_releases() {
        let (pool, _) = make_pool(test_config());
        let result = pool.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn query_error_keeps_connection() {
        let (pool, _) = make_pool(test_config());
        let err = pool.query("BAD", &[]).await.unwrap_err();
        assert!(matches!(err, PoolError::Query(_)));
        assert_eq!(pool.total_count(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn fatal_query_error_destroys_connection() {
        let (pool, _) = make_pool(test_config());
        let listener = Arc::new(RecordingListener::default());
        pool.subscribe(listener.clone());

        let err = pool.query("BROKEN", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset by peer");
        assert_eq!(pool.total_count(), 0);
        assert_eq!(
            listener.events(),
            vec!["created", "acquired", "released", "removed"]
        );
    }

    // ── Listener events ─────────────────────────────────────────────

    #[tokio::test]
    async fn listener_sees_lifecycle_in_order() {
        let (pool, _) = make_pool(test_config());
        let listener = Arc::new(RecordingListener::default());
        pool.subscribe(listener.clone());

        let lease = pool.acquire().await.unwrap();
        drop(lease);
        let lease = pool.acquire().await.unwrap();
        drop(lease);

        assert_eq!(
            listener.events(),
            vec!["created", "acquired", "released", "acquired", "released"]
        );
    }

    #[tokio::test]
    async fn listener_receives_gauges_after_transition() {
        #[derive(Default)]
        struct GaugeListener {
            seen: Mutex<Vec<PoolGauges>>,
        }
        impl PoolListener for GaugeListener {
            fn on_acquired(&self, gauges: PoolGauges) {
                self.seen.lock().unwrap().push(gauges);
            }
            fn on_released(&self, gauges: PoolGauges) {
                self.seen.lock().unwrap().push(gauges);
            }
        }

        let (pool, _) = make_pool(test_config());
        let listener = Arc::new(GaugeListener::default());
        pool.subscribe(listener.clone());

        drop(pool.acquire().await.unwrap());

        let seen = listener.seen.lock().unwrap().clone();
        assert_eq!(seen[0], PoolGauges { total: 1, idle: 0, waiting: 0, max: 3 });
        assert_eq!(seen[1], PoolGauges { total: 1, idle: 1, waiting: 0, max: 3 });
    }

    // ── Maintenance ─────────────────────────────────────────────────

    #[tokio::test]
    async fn reap_idle_removes_old_connections() {
        let config = PoolConfig {
            idle_timeout: Duration::from_millis(1),
            ..test_config()
        };
        let (pool, _) = make_pool(config);
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.idle_count(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.reap_idle(), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 0);
    }

    #[tokio::test]
    async fn reap_idle_keeps_recent_connections() {
        let (pool, _) = make_pool(test_config());
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.reap_idle(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn check_idle_reports_error_then_removal() {
        let (pool, factory) = make_pool(test_config());
        let listener = Arc::new(RecordingListener::default());
        drop(pool.acquire().await.unwrap());
        pool.subscribe(listener.clone());

        factory.healthy.store(false, Ordering::Relaxed);
        assert_eq!(pool.check_idle().await, 1);

        let events = listener.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].starts_with("error: idle connection"));
        assert_eq!(events[1], "removed");
        assert_eq!(pool.total_count(), 0);
    }

    #[tokio::test]
    async fn check_idle_keeps_healthy_connections() {
        let (pool, _) = make_pool(test_config());
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.check_idle().await, 0);
        assert_eq!(pool.idle_count(), 1);
    }

    async fn fill_idle(pool: &Pool, n: usize) {
        let mut leases = Vec::new();
        for _ in 0..n {
            leases.push(pool.acquire().await.unwrap());
        }
        drop(leases);
        assert_eq!(pool.idle_count(), n);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_liveness_check_does_not_block_acquire() {
        let (pool, factory) = make_pool(test_config());
        let pool = Arc::new(pool);
        fill_idle(&pool, 2).await;
        factory.ping_delay_ms.store(250, Ordering::Relaxed);

        let checker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.check_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let lease = pool.acquire().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        // Connections under check still count as idle.
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.total_count(), 3);

        assert_eq!(checker.await.unwrap(), 0);
        drop(lease);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.total_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn liveness_check_trims_replacements_above_max() {
        let (pool, factory) = make_pool(test_config());
        let pool = Arc::new(pool);
        fill_idle(&pool, 3).await;
        factory.ping_delay_ms.store(100, Ordering::Relaxed);

        let checker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.check_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.total_count(), 4);

        assert_eq!(checker.await.unwrap(), 0);
        assert_eq!(pool.total_count(), 3);
        assert_eq!(pool.idle_count(), 2);
        drop(lease);
        assert_eq!(pool.idle_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_during_liveness_check_closes_checked_connections() {
        let (pool, factory) = make_pool(test_config());
        let pool = Arc::new(pool);
        fill_idle(&pool, 2).await;
        factory.ping_delay_ms.store(100, Ordering::Relaxed);

        let checker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.check_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.drain().await;

        assert_eq!(checker.await.unwrap(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 0);
    }

    #[tokio::test]
    async fn panicking_liveness_check_is_contained() {
        let (pool, factory) = make_pool(test_config());
        fill_idle(&pool, 1).await;
        factory.ping_panics.store(true, Ordering::Relaxed);

        assert_eq!(pool.check_idle().await, 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 0);

        factory.ping_panics.store(false, Ordering::Relaxed);
        let lease = pool.acquire().await.unwrap();
        assert!(lease.id() > 0);
    }

    #[tokio::test]
    async fn maintenance_loop_stops_on_shutdown() {
        let (pool, _) = make_pool(test_config());
        let pool = Arc::new(pool);
        let (tx, rx) = watch::channel(false);

        let loop_pool = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            loop_pool
                .run_maintenance(Duration::from_millis(10), rx)
                .await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    // ── Draining ────────────────────────────────────────────────────

    #[tokio::test]
    async fn drain_rejects_new_connections() {
        let (pool, _) = make_pool(test_config());
        pool.drain().await;
        assert!(pool.is_draining());
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err, PoolError::Draining);
    }

    #[tokio::test]
    async fn drain_waits_for_inflight_then_closes() {
        let (pool, _) = make_pool(test_config());
        let pool = Arc::new(pool);
        let lease = pool.acquire().await.unwrap();

        let drain_pool = Arc::clone(&pool);
        let drain = tokio::spawn(async move { drain_pool.drain().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lease);

        let report = drain.await.unwrap();
        assert_eq!(report.abandoned, 0);
        assert_eq!(pool.total_count(), 0, "released lease is closed during drain");
    }

    #[tokio::test]
    async fn drain_abandons_after_timeout() {
        let config = PoolConfig {
            drain_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let (pool, _) = make_pool(config);
        let _held = pool.acquire().await.unwrap();

        let report = pool.drain().await;
        assert_eq!(report.abandoned, 1);
    }

    #[tokio::test]
    async fn drain_closes_idle_connections() {
        let (pool, _) = make_pool(test_config());
        drop(pool.acquire().await.unwrap());
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.idle_count(), 1);

        let report = pool.end().await;
        assert_eq!(report, DrainReport { closed: 1, abandoned: 0 });
        assert_eq!(pool.gauges(), PoolGauges { total: 0, idle: 0, waiting: 0, max: 3 });
    }

    #[tokio::test]
    async fn drain_wakes_waiters_with_draining_error() {
        let config = PoolConfig {
            max_size: 1,
            connect_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let (pool, _) = make_pool(config);
        let pool = Arc::new(pool);
        let _held = pool.acquire().await.unwrap();

        let waiter_pool = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await.map(|l| l.id()) });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.drain().await;
        assert_eq!(waiter.await.unwrap().unwrap_err(), PoolError::Draining);
    }
}
