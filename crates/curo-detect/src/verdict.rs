//! Verdict tracking for a single node.
//!
//! Converts a stream of probe results into health verdicts with
//! configurable thresholds and exponential backoff.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use curo_state::HealthState;

use crate::probe::ProbeStatus;

/// Tracks consecutive probe results for a single node.
///
/// Unhealthy probes must be consecutive to cross the threshold; a single
/// healthy probe resets everything. Inconclusive probes are neutral
/// until the node has been inconclusive for longer than
/// `node_update_timeout`, after which each one counts as unhealthy.
#[derive(Debug)]
pub struct VerdictTracker {
    /// Current health verdict.
    health: HealthState,
    /// Consecutive unhealthy probe count.
    consecutive_unhealthy: u32,
    /// Threshold before marking unhealthy.
    unhealthy_threshold: u32,
    /// When the current inconclusive streak started.
    inconclusive_since: Option<Instant>,
    /// Inconclusive streaks longer than this count as unhealthy.
    node_update_timeout: Duration,
    /// Current backoff interval.
    current_backoff: Duration,
    /// Base check interval.
    base_interval: Duration,
    /// Maximum backoff.
    max_backoff: Duration,
}

impl VerdictTracker {
    /// Create a tracker. `base_interval` is the policy poll interval;
    /// unhealthy nodes back off exponentially up to eight intervals.
    pub fn new(
        unhealthy_threshold: u32,
        base_interval: Duration,
        node_update_timeout: Duration,
    ) -> Self {
        Self {
            health: HealthState::Unknown,
            consecutive_unhealthy: 0,
            unhealthy_threshold,
            inconclusive_since: None,
            node_update_timeout,
            current_backoff: base_interval,
            base_interval,
            max_backoff: base_interval * 8,
        }
    }

    /// Record a probe result and return the new health verdict.
    pub fn record(&mut self, status: ProbeStatus) -> HealthState {
        match status {
            ProbeStatus::Healthy => {
                self.consecutive_unhealthy = 0;
                self.inconclusive_since = None;
                self.current_backoff = self.base_interval;

                if self.health != HealthState::Healthy {
                    debug!("node recovered to healthy");
                }
                self.health = HealthState::Healthy;
            }
            ProbeStatus::Unhealthy => {
                self.inconclusive_since = None;
                self.record_unhealthy();
            }
            ProbeStatus::Inconclusive => {
                let since = *self.inconclusive_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.node_update_timeout {
                    warn!(
                        timeout_secs = self.node_update_timeout.as_secs(),
                        "node inconclusive past node_update_timeout, counting as unhealthy"
                    );
                    self.record_unhealthy();
                } else {
                    debug!("inconclusive probe, verdict unchanged");
                }
            }
        }

        self.health
    }

    fn record_unhealthy(&mut self) {
        self.consecutive_unhealthy += 1;

        // Exponential backoff: double the interval up to max.
        self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);

        if self.consecutive_unhealthy >= self.unhealthy_threshold {
            if self.health != HealthState::Unhealthy {
                warn!(
                    failures = self.consecutive_unhealthy,
                    threshold = self.unhealthy_threshold,
                    "node marked unhealthy"
                );
            }
            self.health = HealthState::Unhealthy;
        }
    }

    /// Current health verdict.
    pub fn health(&self) -> HealthState {
        self.health
    }

    /// Current number of consecutive unhealthy probes.
    pub fn consecutive_unhealthy(&self) -> u32 {
        self.consecutive_unhealthy
    }

    /// Current backoff interval before the next check.
    pub fn next_interval(&self) -> Duration {
        self.current_backoff
    }
}
