//! Time handling utilities.

use std::{
    fmt::Debug,
    sync::Arc,
    time::{Instant, Duration},
};


/// Source of monotonic time.
///
/// Everything in the dispatcher that looks at the clock goes through this trait, so tests can
/// substitute a manually advanced clock and exercise queue-age behavior without real sleeps.
pub trait Clock: Debug + Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Start timestamp captured when a message is enqueued, read again at dispatch start and at
/// completion.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    clock: Arc<dyn Clock>,
    start: Instant,
}

impl Stopwatch {
    /// Start now.
    pub fn start(clock: &Arc<dyn Clock>) -> Self {
        Stopwatch {
            start: clock.now(),
            clock: Arc::clone(clock),
        }
    }

    /// Time elapsed since start.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.start)
    }
}


#[cfg(test)]
use crate::test_mocks::TestClock;

#[test]
fn test_stopwatch_tracks_clock() {
    let clock = TestClock::new();
    let stopwatch = Stopwatch::start(&(clock.clone() as Arc<dyn Clock>));
    assert_eq!(stopwatch.elapsed(), Duration::ZERO);
    clock.advance(Duration::from_millis(15));
    assert_eq!(stopwatch.elapsed(), Duration::from_millis(15));
    assert_eq!(stopwatch.elapsed(), Duration::from_millis(15));
}
