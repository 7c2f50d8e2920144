// Time Provider Port
//
// Supervisors read the clock for event timestamps, `last_sync_at` and the
// length of a pipeline run, which decides whether the restart backoff resets.

/// Wall clock in epoch milliseconds
pub trait TimeProvider: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// chrono-backed clock used by the binary
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that jumps `step_millis` forward each time it is read
    ///
    /// Makes every pipeline run look as long as at least one step.
    pub struct SteppingClock {
        now: AtomicI64,
        step_millis: i64,
    }

    impl SteppingClock {
        pub fn new(start_millis: i64, step_millis: i64) -> Self {
            Self {
                now: AtomicI64::new(start_millis),
                step_millis,
            }
        }
    }

    impl TimeProvider for SteppingClock {
        fn now_millis(&self) -> i64 {
            self.now.fetch_add(self.step_millis, Ordering::SeqCst)
        }
    }
}
