//! Recovery Policy
//!
//! Bounded restarts: at most `restart_limit` attempts per `restart_window`.
//! Once the limit is hit the service is left alone until the window rolls
//! over, and the exhaustion is reported exactly once per window (a report
//! held back by the alert cooldown is retried on later checks).

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::adapters::ServiceManager;
use crate::domain::{ServiceSpec, ServiceState};
use crate::error::Result;

/// Configuration for the recovery policy
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum restart attempts per window (default: 3)
    pub restart_limit: u32,
    /// Length of the restart-counting window (default: 300s)
    pub restart_window: chrono::Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            restart_limit: 3,
            restart_window: chrono::Duration::seconds(300),
        }
    }
}

/// What the policy allows for an unhealthy service right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// A restart may be attempted
    Permitted,
    /// The window's budget is spent; `first_report` is true only the first
    /// time this is observed in the window
    Exhausted { first_report: bool },
}

#[derive(Clone)]
pub struct RecoveryPolicy {
    config: RecoveryConfig,
    manager: ServiceManager,
}

impl RecoveryPolicy {
    pub fn new(config: RecoveryConfig, manager: ServiceManager) -> Self {
        Self { config, manager }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Start a fresh window when none is open or the current one expired
    fn roll_window(&self, state: &mut ServiceState, now: DateTime<Utc>) {
        let expired = match state.window_start {
            None => true,
            Some(start) => now.signed_duration_since(start) > self.config.restart_window,
        };
        if expired {
            if state.restart_count > 0 {
                debug!(
                    "Restart window rolled over ({} attempts in previous window)",
                    state.restart_count
                );
            }
            state.window_start = Some(now);
            state.restart_count = 0;
            state.exhaustion_reported = false;
        }
    }

    /// Whether another restart fits in the current window
    pub fn should_restart(&self, state: &mut ServiceState, now: DateTime<Utc>) -> bool {
        self.roll_window(state, now);
        state.restart_count < self.config.restart_limit
    }

    /// Evaluate an unhealthy service. `first_report` stays true until the
    /// caller marks the exhaustion reported with [`Self::mark_reported`]
    pub fn decide(&self, state: &mut ServiceState, now: DateTime<Utc>) -> RestartDecision {
        if self.should_restart(state, now) {
            return RestartDecision::Permitted;
        }
        RestartDecision::Exhausted {
            first_report: !state.exhaustion_reported,
        }
    }

    /// The Critical for this window's exhaustion reached the sinks
    pub fn mark_reported(&self, state: &mut ServiceState) {
        state.exhaustion_reported = true;
    }

    /// Count an attempt against the window
    pub fn record_attempt(&self, state: &mut ServiceState, now: DateTime<Utc>) {
        self.roll_window(state, now);
        state.restart_count += 1;
        state.last_restart_at = Some(now);
    }

    /// Issue the service-manager restart for `spec`
    pub async fn restart(&self, spec: &ServiceSpec) -> Result<()> {
        info!(
            "Restarting {} via {} ({})",
            spec.name,
            self.manager.init_system(),
            spec.restart_unit()
        );
        self.manager.restart(spec.restart_unit()).await
    }
}
