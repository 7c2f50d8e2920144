// Remote reachability port
use async_trait::async_trait;

use crate::domain::ServiceSpec;

/// Answer of a single reachability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    /// Reason as reported by the probe (e.g. the ssh error line)
    Unreachable(String),
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

/// Probe used by the watchdog
///
/// Implementations must bound their own runtime (connect timeout); the
/// watchdog calls `check` once per poll interval.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Probe the remote endpoint of `spec`
    ///
    /// # Example
    /// ```text
    /// match probe.check(&spec).await {
    ///     Reachability::Reachable => start_pipeline(),
    ///     Reachability::Unreachable(reason) => warn!(%reason, "remote down"),
    /// }
    /// ```
    async fn check(&self, spec: &ServiceSpec) -> Reachability;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Probe replaying queued answers; the last answer sticks
    pub struct ScriptedProbe {
        answers: Mutex<VecDeque<Reachability>>,
        sticky: Mutex<Reachability>,
        calls: Mutex<usize>,
    }

    impl ScriptedProbe {
        pub fn reachable() -> Self {
            Self::with_default(Reachability::Reachable)
        }

        pub fn unreachable(reason: &str) -> Self {
            Self::with_default(Reachability::Unreachable(reason.to_string()))
        }

        fn with_default(answer: Reachability) -> Self {
            Self {
                answers: Mutex::new(VecDeque::new()),
                sticky: Mutex::new(answer),
                calls: Mutex::new(0),
            }
        }

        /// Queue one answer ahead of the sticky one
        pub fn push(&self, answer: Reachability) {
            self.answers.lock().unwrap().push_back(answer);
        }

        /// Replace the sticky answer (and drop anything queued)
        pub fn set(&self, answer: Reachability) {
            self.answers.lock().unwrap().clear();
            *self.sticky.lock().unwrap() = answer;
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ReachabilityProbe for ScriptedProbe {
        async fn check(&self, _spec: &ServiceSpec) -> Reachability {
            *self.calls.lock().unwrap() += 1;
            let queued = self.answers.lock().unwrap().pop_front();
            queued.unwrap_or_else(|| self.sticky.lock().unwrap().clone())
        }
    }
}
