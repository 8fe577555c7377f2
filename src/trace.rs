//! Trail identifiers and observability hooks.

use std::time::Duration;


/// Identifier threaded through a request's processing for distributed tracing.
pub type TrailId = u64;

/// Sink notified when a dispatch ran longer than the configured multiple of the load monitor's
/// target latency. The slow transaction is also logged regardless of whether a sink is present.
pub trait SlowTransactionSink: Send + Sync + 'static {
    /// `target_latency_us` is the snapshot taken at dispatch start.
    fn slow_transaction(&self, call_id: &str, elapsed: Duration, target_latency_us: u64);
}
