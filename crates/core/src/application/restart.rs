// Restart policy for torn-down pipelines
use crate::domain::SupervisionSettings;
use tracing::{info, warn};

/// Restart decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart the pipeline after this delay (ms)
    Restart(u64),
    /// Restart budget exhausted
    GiveUp,
}

/// Exponential backoff with a cap and deterministic jitter
///
/// Determines whether and when a service pipeline is restarted based on:
/// - Restart attempt count since the last stable run
/// - Maximum restarts allowed
/// - Backoff factor for exponential delay
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    base_ms: u64,
    max_ms: u64,
    factor: f64,
    max_restarts: Option<u32>,
    stable_after_ms: u64,
}

impl RestartPolicy {
    /// Create a restart policy
    ///
    /// # Arguments
    /// * `base_ms` - Delay before the first restart
    /// * `max_ms` - Upper bound for any delay (jitter included)
    /// * `factor` - Growth factor per attempt
    /// * `max_restarts` - Give up after this many restarts (None = never)
    /// * `stable_after_ms` - Runs at least this long reset the attempt counter
    pub fn new(
        base_ms: u64,
        max_ms: u64,
        factor: f64,
        max_restarts: Option<u32>,
        stable_after_ms: u64,
    ) -> Self {
        Self {
            base_ms,
            max_ms,
            factor,
            max_restarts,
            stable_after_ms,
        }
    }

    pub fn from_settings(settings: &SupervisionSettings) -> Self {
        Self::new(
            settings.restart_backoff_base_ms,
            settings.restart_backoff_max_ms,
            settings.backoff_factor,
            settings.max_restarts,
            settings.stable_after_ms,
        )
    }

    /// Delay before restart number `attempt` (0-based)
    ///
    /// Backoff formula:
    /// delay = min(max, base * factor^attempt) * jitter, jitter in [0.9, 1.1],
    /// clamped to `max`.
    ///
    /// Jitter is derived from a hash of the service name: services sharing a
    /// remote are usually spread apart, and a single service stays
    /// reproducible. The same factor applies to every attempt, which keeps
    /// the delays non-decreasing.
    pub fn next_delay(&self, service: &str, attempt: u32) -> u64 {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_ms as f64 * self.factor.powi(exponent);
        let capped = raw.min(self.max_ms as f64);

        let jitter_factor = 0.9 + (name_hash(service) % 2001) as f64 / 10_000.0; // 0.9 to 1.1

        ((capped * jitter_factor) as u64).min(self.max_ms)
    }

    /// Decide what to do after a teardown
    ///
    /// # Example
    /// ```text
    /// match policy.decide("web", restarts) {
    ///     RestartDecision::Restart(delay_ms) => sleep(delay_ms).await,
    ///     RestartDecision::GiveUp => mark_failed(),
    /// }
    /// ```
    pub fn decide(&self, service: &str, attempt: u32) -> RestartDecision {
        if let Some(max) = self.max_restarts {
            if attempt >= max {
                warn!(
                    service = %service,
                    attempt = %attempt,
                    max_restarts = %max,
                    "Max restart attempts reached"
                );
                return RestartDecision::GiveUp;
            }
        }

        let delay_ms = self.next_delay(service, attempt);
        info!(
            service = %service,
            attempt = %attempt,
            delay_ms = %delay_ms,
            "Scheduling pipeline restart"
        );
        RestartDecision::Restart(delay_ms)
    }

    /// Whether a run of this length counts as stable
    pub fn should_reset(&self, run_duration_ms: i64) -> bool {
        run_duration_ms >= 0 && run_duration_ms as u64 >= self.stable_after_ms
    }
}

/// FNV-1a, stable across builds and platforms
fn name_hash(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_restarts: Option<u32>) -> RestartPolicy {
        RestartPolicy::new(1000, 30_000, 2.0, max_restarts, 60_000)
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let p = policy(None);
        let delays: Vec<u64> = (0..10).map(|a| p.next_delay("web", a)).collect();

        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delays must not decrease: {:?}", delays);
        }
        assert!(delays.iter().all(|d| *d <= 30_000));
        assert!(delays[0] >= 900 && delays[0] <= 1100);
    }

    #[test]
    fn test_jitter_is_deterministic_per_service() {
        let p = policy(None);
        assert_eq!(p.next_delay("web", 3), p.next_delay("web", 3));
    }

    #[test]
    fn test_anagram_names_get_different_jitter() {
        let p = policy(None);
        assert_ne!(p.next_delay("api", 0), p.next_delay("pia", 0));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let p = policy(None);
        assert_eq!(p.next_delay("web", u32::MAX).min(30_000), p.next_delay("web", u32::MAX));
    }

    #[test]
    fn test_gives_up_after_max_restarts() {
        let p = policy(Some(2));
        assert!(matches!(p.decide("web", 0), RestartDecision::Restart(_)));
        assert!(matches!(p.decide("web", 1), RestartDecision::Restart(_)));
        assert_eq!(p.decide("web", 2), RestartDecision::GiveUp);
    }

    #[test]
    fn test_zero_max_restarts_never_restarts() {
        assert_eq!(policy(Some(0)).decide("web", 0), RestartDecision::GiveUp);
    }

    #[test]
    fn test_stable_reset() {
        let p = policy(None);
        assert!(!p.should_reset(59_999));
        assert!(p.should_reset(60_000));
        assert!(!p.should_reset(-5));
    }
}
