//! Contract consumed from the load monitor collaborator.

use crate::trace::TrailId;


/// External component that maintains a load estimate and a target per-request latency.
///
/// The dispatcher does not implement the monitor's algorithm, only this contract: it asks
/// admit/deny questions from the classifier path and feeds completion reports back from worker
/// threads. Implementations must be thread-safe.
pub trait LoadMonitor: Send + Sync + 'static {
    /// Whether to admit a new admission-controlled request right now.
    fn admit_request(&self, trail: TrailId) -> bool;

    /// Completion report for a request the dispatcher finished with, dispatched or late-dropped.
    fn request_complete(&self, trail: TrailId, latency_us: u64);

    /// Target per-request latency in microseconds. Zero means no target is available.
    fn target_latency_us(&self) -> u64;
}
