// Watchdog - remote reachability with a consecutive-failure threshold

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::application::supervisor::ShutdownToken;
use crate::domain::ServiceSpec;
use crate::port::{Reachability, ReachabilityProbe};

/// Watchdog verdict after one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Healthy,
    /// Probe failed, threshold not reached yet (consecutive failures so far)
    Suspect(u32),
    /// Threshold reached; reason from the last failed probe
    Unreachable(String),
}

/// Periodic reachability prober for one service
pub struct Watchdog {
    probe: Arc<dyn ReachabilityProbe>,
    threshold: u32,
    consecutive_failures: u32,
}

impl Watchdog {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, threshold: u32) -> Self {
        Self {
            probe,
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Probe once and fold the answer into the failure counter
    pub async fn observe(&mut self, spec: &ServiceSpec) -> WatchdogVerdict {
        match self.probe.check(spec).await {
            Reachability::Reachable => {
                if self.consecutive_failures > 0 {
                    info!(
                        service = %spec.name,
                        failures = self.consecutive_failures,
                        "Remote answered again"
                    );
                }
                self.consecutive_failures = 0;
                WatchdogVerdict::Healthy
            }
            Reachability::Unreachable(reason) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.threshold {
                    warn!(
                        service = %spec.name,
                        failures = self.consecutive_failures,
                        reason = %reason,
                        "Remote declared unreachable"
                    );
                    WatchdogVerdict::Unreachable(reason)
                } else {
                    debug!(
                        service = %spec.name,
                        failures = self.consecutive_failures,
                        threshold = self.threshold,
                        reason = %reason,
                        "Probe failed"
                    );
                    WatchdogVerdict::Suspect(self.consecutive_failures)
                }
            }
        }
    }

    /// Poll until the remote answers once
    ///
    /// Returns false if shutdown was requested first.
    pub async fn wait_until_reachable(
        &mut self,
        spec: &ServiceSpec,
        poll_interval: Duration,
        shutdown: &mut ShutdownToken,
    ) -> bool {
        let mut announced = false;
        loop {
            if shutdown.is_shutdown() {
                return false;
            }
            match self.probe.check(spec).await {
                Reachability::Reachable => {
                    self.consecutive_failures = 0;
                    return true;
                }
                Reachability::Unreachable(reason) => {
                    if !announced {
                        info!(service = %spec.name, reason = %reason, "Waiting for remote");
                        announced = true;
                    } else {
                        debug!(service = %spec.name, reason = %reason, "Remote still unreachable");
                    }
                }
            }
            tokio::select! {
                _ = sleep(poll_interval) => {},
                _ = shutdown.wait() => return false,
            }
        }
    }
}
