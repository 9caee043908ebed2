//! Test doubles shared by the unit tests in this crate.

use std::future::Future;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use poolwatch_core::{PoolError, PoolGauges, PoolResult, QueryResult};
use poolwatch_pool::{ConnectionPool, DrainReport, PoolListener};

/// A pool whose gauges and query outcome are set directly by the test.
#[derive(Default)]
pub(crate) struct FakePool {
    total: AtomicUsize,
    idle: AtomicUsize,
    waiting: AtomicUsize,
    max: usize,
    listeners: Mutex<Vec<Arc<dyn PoolListener>>>,
    fail_with: Mutex<Option<PoolError>>,
    delay: Mutex<Duration>,
    queries: AtomicUsize,
    ended: AtomicBool,
}

impl FakePool {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    pub(crate) fn set_gauges(&self, total: usize, idle: usize, waiting: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.idle.store(idle, Ordering::Relaxed);
        self.waiting.store(waiting, Ordering::Relaxed);
    }

    pub(crate) fn fail_with(&self, err: Option<PoolError>) {
        *self.fail_with.lock().unwrap() = err;
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Invoke `notify` on every subscribed listener with the current gauges.
    pub(crate) fn fire(&self, notify: impl Fn(&dyn PoolListener, PoolGauges)) {
        let gauges = self.gauges();
        for listener in self.listeners.lock().unwrap().iter() {
            notify(listener.as_ref(), gauges);
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub(crate) fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    pub(crate) fn ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }
}

impl ConnectionPool for FakePool {
    fn total_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn idle_count(&self) -> usize {
        self.idle.load(Ordering::Relaxed)
    }

    fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    fn max_size(&self) -> usize {
        self.max
    }

    fn subscribe(&self, listener: Arc<dyn PoolListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    async fn query(
        &self,
        _text: &str,
        _params: &[serde_json::Value],
    ) -> PoolResult<QueryResult> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.fail_with.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(QueryResult::from_rows(vec![
                serde_json::json!({ "?column?": 1 }),
            ])),
        }
    }

    async fn end(&self) -> DrainReport {
        tracing::info!("fake pool ending");
        self.ended.store(true, Ordering::Relaxed);
        let closed = self.idle.swap(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        DrainReport {
            closed,
            abandoned: 0,
        }
    }
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn subscriber(writer: Capture) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish()
}

/// Run `f` with a thread-local subscriber and return everything it logged.
pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
    let capture = Capture::default();
    let _guard = tracing::subscriber::set_default(subscriber(capture.clone()));
    f();
    capture.contents()
}

/// Await `fut` with a thread-local subscriber. Only valid on a current-thread runtime.
pub(crate) async fn capture_logs_async<F: Future>(fut: F) -> (F::Output, String) {
    let capture = Capture::default();
    let _guard = tracing::subscriber::set_default(subscriber(capture.clone()));
    let output = fut.await;
    (output, capture.contents())
}
