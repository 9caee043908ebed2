//! Typed observer for pool lifecycle events.

use poolwatch_core::{PoolError, PoolGauges};

/// Receives pool lifecycle callbacks.
///
/// Each callback gets the pool's gauges as read immediately after the
/// transition. Callbacks run inline on the pool's hot path and must return
/// quickly without blocking.
pub trait PoolListener: Send + Sync {
    /// A new physical connection was established.
    fn on_created(&self, gauges: PoolGauges) {
        let _ = gauges;
    }

    /// A connection was handed to a caller.
    fn on_acquired(&self, gauges: PoolGauges) {
        let _ = gauges;
    }

    /// A caller gave a connection back.
    fn on_released(&self, gauges: PoolGauges) {
        let _ = gauges;
    }

    /// A connection was closed and dropped from the pool.
    fn on_removed(&self, gauges: PoolGauges) {
        let _ = gauges;
    }

    /// An idle connection failed outside of any query.
    fn on_error(&self, error: &PoolError, gauges: PoolGauges) {
        let _ = (error, gauges);
    }
}
