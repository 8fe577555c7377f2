//! Dispatcher configuration.

use crate::{
    trace::SlowTransactionSink,
    util_time::{Clock, SystemClock},
};
use std::{
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};
use anyhow::{
    Result,
    ensure,
};


/// Default elapsed-over-target multiple past which a dispatch is traced as a slow transaction.
pub const DEFAULT_SLOW_MULTIPLIER: u32 = 50;

/// Default time a message may wait on the queue before workers late-drop it.
pub const DEFAULT_REQUEST_ON_QUEUE_TIMEOUT: Duration = Duration::from_secs(4);

/// Startup configuration for the dispatcher.
pub struct DispatcherConfig {
    /// Steady-state worker parallelism. At least one is required.
    pub num_workers: usize,
    /// How long a message may sit on the queue before it is late-dropped with a 503.
    /// Millisecond resolution is plenty.
    pub request_on_queue_timeout: Duration,
    /// Multiple of the target latency past which a dispatch is traced as slow.
    pub slow_multiplier: u32,
    /// Queue depth at or above which admission-controlled requests are shed with a 503 without
    /// consulting the load monitor. `None` leaves the queue unbounded.
    pub queue_high_water_mark: Option<usize>,
    /// Time source. Swappable for tests.
    pub clock: Arc<dyn Clock>,
    /// Optional sink for slow-transaction signals, beyond the log event.
    pub slow_sink: Option<Arc<dyn SlowTransactionSink>>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            num_workers: num_cpus::get(),
            request_on_queue_timeout: DEFAULT_REQUEST_ON_QUEUE_TIMEOUT,
            slow_multiplier: DEFAULT_SLOW_MULTIPLIER,
            queue_high_water_mark: None,
            clock: Arc::new(SystemClock),
            slow_sink: None,
        }
    }
}

impl DispatcherConfig {
    /// Validate. Failing here means the dispatcher is never constructed and nothing gets
    /// registered.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_workers >= 1, "dispatcher requires at least one worker");
        ensure!(
            self.request_on_queue_timeout > Duration::ZERO,
            "request on-queue timeout must be positive",
        );
        if let Some(mark) = self.queue_high_water_mark {
            ensure!(mark >= 1, "queue high-water mark must be positive if set");
        }
        Ok(())
    }
}

impl Debug for DispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("num_workers", &self.num_workers)
            .field("request_on_queue_timeout", &self.request_on_queue_timeout)
            .field("slow_multiplier", &self.slow_multiplier)
            .field("queue_high_water_mark", &self.queue_high_water_mark)
            .field("clock", &self.clock)
            .field("slow_sink", &self.slow_sink.as_ref().map(|_| ".."))
            .finish()
    }
}


#[test]
fn test_default_config_is_valid() {
    assert!(DispatcherConfig::default().validate().is_ok());
}

#[test]
fn test_zero_workers_is_invalid() {
    let config = DispatcherConfig {
        num_workers: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_timeout_is_invalid() {
    let config = DispatcherConfig {
        request_on_queue_timeout: Duration::ZERO,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_high_water_mark_is_invalid() {
    let config = DispatcherConfig {
        queue_high_water_mark: Some(0),
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
