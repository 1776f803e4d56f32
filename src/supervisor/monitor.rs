//! Monitoring Loop
//!
//! One pass per `check_interval`: every registered service is checked in
//! registration order, failures go through the recovery policy, alerts go
//! through the dispatcher, and the state snapshot is persisted at the end.
//! All `ServiceState` mutation happens here, on one task.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::coordination::ControlHandle;
use crate::domain::{AlertEvent, ServiceRegistry, ServiceSpec, ServiceState, ServiceStatus, Severity};
use crate::error::Result;
use crate::supervisor::alert_manager::{AlertDispatcher, DispatchOutcome};
use crate::supervisor::clock::Clock;
use crate::supervisor::health::HealthChecker;
use crate::supervisor::recovery::{RecoveryPolicy, RestartDecision};
use crate::supervisor::state_store::{StateSnapshot, StateStore};

/// Timing knobs for the loop
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Sleep between iterations (default: 60s)
    pub check_interval: Duration,
    /// Delay between a restart and its verification check (default: 5s)
    pub settle_period: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            settle_period: Duration::from_secs(5),
        }
    }
}

/// Where a reload gets its new registry from
#[cfg_attr(test, mockall::automock)]
pub trait RegistrySource: Send + Sync {
    fn load_registry(&self) -> Result<ServiceRegistry>;
}

/// What happened to one service during an iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Healthy and already up
    Healthy,
    /// Healthy again without intervention after being down
    Recovered,
    /// Restarted and verified healthy
    Restarted,
    /// Restarted but the verification check still failed
    RestartUnverified,
    /// The restart command itself failed
    RestartFailed,
    /// Restart budget for the window is spent; nothing attempted
    Exhausted,
    /// The probe could not run; state left untouched
    CheckError(String),
}

impl ServiceOutcome {
    pub fn attempted_restart(&self) -> bool {
        matches!(
            self,
            ServiceOutcome::Restarted
                | ServiceOutcome::RestartUnverified
                | ServiceOutcome::RestartFailed
        )
    }
}

/// Per-iteration summary, in registration order
#[derive(Debug, Clone, Default)]
pub struct IterationReport {
    pub iteration: u64,
    pub outcomes: Vec<(String, ServiceOutcome)>,
}

impl IterationReport {
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, outcome)| outcome)
    }

    pub fn restarts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.attempted_restart())
            .count()
    }
}

pub struct Monitor {
    settings: MonitorSettings,
    registry: ServiceRegistry,
    states: StateSnapshot,
    checker: HealthChecker,
    recovery: RecoveryPolicy,
    alerts: AlertDispatcher,
    store: StateStore,
    clock: Arc<dyn Clock>,
    iterations: u64,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        registry: ServiceRegistry,
        checker: HealthChecker,
        recovery: RecoveryPolicy,
        alerts: AlertDispatcher,
        store: StateStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let states = registry
            .iter()
            .map(|spec| (spec.name.clone(), ServiceState::baseline()))
            .collect();
        Self {
            settings,
            registry,
            states,
            checker,
            recovery,
            alerts,
            store,
            clock,
            iterations: 0,
        }
    }

    /// Seed state from a persisted snapshot; entries for unknown services are ignored
    pub fn restore(&mut self, mut snapshot: StateSnapshot) {
        let mut restored = 0;
        for spec in self.registry.iter() {
            if let Some(state) = snapshot.remove(&spec.name) {
                self.states.insert(spec.name.clone(), state);
                restored += 1;
            }
        }
        if !snapshot.is_empty() {
            debug!(
                "Ignoring persisted state for unregistered services: {:?}",
                snapshot.keys().collect::<Vec<_>>()
            );
        }
        info!("Restored state for {} service(s)", restored);
    }

    /// Swap in a new registry, keeping state for services that survive
    pub fn apply_registry(&mut self, registry: ServiceRegistry) {
        let removed: Vec<String> = self
            .states
            .keys()
            .filter(|name| !registry.contains(name))
            .cloned()
            .collect();
        for name in &removed {
            self.states.remove(name);
            self.alerts.forget(name);
            info!("Service {} removed; dropping its state", name);
        }

        for spec in registry.iter() {
            if !self.states.contains_key(&spec.name) {
                info!("Service {} added ({} {})", spec.name, spec.check.check_type(), spec.check.target());
                self.states
                    .insert(spec.name.clone(), ServiceState::baseline());
            }
        }

        self.registry = registry;
    }

    /// Re-read the registry; a bad configuration leaves the current one active
    pub fn reload_from(&mut self, source: &dyn RegistrySource) -> bool {
        match source.load_registry() {
            Ok(registry) => {
                info!("Configuration reloaded: {} service(s)", registry.len());
                self.apply_registry(registry);
                true
            }
            Err(e) => {
                error!("Reload rejected, keeping previous configuration: {}", e);
                false
            }
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn states(&self) -> &StateSnapshot {
        &self.states
    }

    pub fn state(&self, service: &str) -> Option<&ServiceState> {
        self.states.get(service)
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Check every service once, in registration order, then persist
    pub async fn run_iteration(&mut self) -> IterationReport {
        self.iterations += 1;
        let mut report = IterationReport {
            iteration: self.iterations,
            outcomes: Vec::with_capacity(self.registry.len()),
        };

        let specs: Vec<ServiceSpec> = self.registry.iter().cloned().collect();
        for spec in &specs {
            let mut state = self.states.remove(&spec.name).unwrap_or_default();
            let outcome = self.supervise(spec, &mut state).await;
            self.states.insert(spec.name.clone(), state);
            report.outcomes.push((spec.name.clone(), outcome));
        }

        if let Err(e) = self.store.save(&self.states).await {
            error!("Failed to persist state (monitoring continues): {}", e);
        }

        debug!(
            "Iteration {} complete: {} service(s), {} restart(s)",
            report.iteration,
            report.outcomes.len(),
            report.restarts()
        );
        report
    }

    /// Run until shutdown is requested; reloads are applied at the top of an iteration
    pub async fn run(&mut self, mut control: ControlHandle, source: &dyn RegistrySource) {
        info!(
            "Monitoring {} service(s) every {:?}",
            self.registry.len(),
            self.settings.check_interval
        );

        loop {
            if control.is_shutdown_requested() {
                break;
            }
            if control.take_reload_request() {
                self.reload_from(source);
            }

            self.run_iteration().await;

            if control.sleep_or_shutdown(self.settings.check_interval).await {
                break;
            }
        }

        info!("Monitoring loop stopped after {} iteration(s)", self.iterations);
    }

    async fn alert(
        &mut self,
        spec: &ServiceSpec,
        state: &mut ServiceState,
        severity: Severity,
        message: String,
    ) -> DispatchOutcome {
        let event = AlertEvent::new(
            &spec.name,
            severity,
            message,
            self.clock.now(),
            state.restart_count,
        );
        self.alerts.dispatch(event, state).await
    }

    async fn supervise(&mut self, spec: &ServiceSpec, state: &mut ServiceState) -> ServiceOutcome {
        let now = self.clock.now();
        state.last_check_at = Some(now);
        let was_down = state.is_down();

        let healthy = match self.checker.check(spec).await {
            Ok(healthy) => healthy,
            Err(e) => {
                error!("{}: health check could not run: {}", spec.name, e);
                return ServiceOutcome::CheckError(e.to_string());
            }
        };

        if healthy {
            if was_down {
                state.status = ServiceStatus::Up;
                info!("{} recovered", spec.name);
                self.alert(spec, state, Severity::Info, "recovered".to_string())
                    .await;
                return ServiceOutcome::Recovered;
            }
            return ServiceOutcome::Healthy;
        }

        if !was_down {
            warn!(
                "{} is down ({} {})",
                spec.name,
                spec.check.check_type(),
                spec.check.target()
            );
        }
        state.status = ServiceStatus::Down;

        if let RestartDecision::Exhausted { first_report } = self.recovery.decide(state, now) {
            if first_report {
                let limit = self.recovery.config().restart_limit;
                let window = self.recovery.config().restart_window.num_seconds();
                error!(
                    "{}: restart limit reached ({} in {}s), not restarting until the window rolls over",
                    spec.name, limit, window
                );
                let outcome = self
                    .alert(
                        spec,
                        state,
                        Severity::Critical,
                        format!("restart limit reached ({limit} restarts within {window}s), giving up until the window rolls over"),
                    )
                    .await;
                // A Critical held back by the cooldown is retried on the next exhausted check
                if outcome.was_delivered() {
                    self.recovery.mark_reported(state);
                }
            } else {
                debug!("{}: restart budget exhausted, skipping", spec.name);
            }
            return ServiceOutcome::Exhausted;
        }

        self.recovery.record_attempt(state, now);
        if let Err(e) = self.recovery.restart(spec).await {
            error!("{}: restart failed: {}", spec.name, e);
            self.alert(
                spec,
                state,
                Severity::Critical,
                format!("restart command failed: {e}"),
            )
            .await;
            return ServiceOutcome::RestartFailed;
        }

        if !self.settings.settle_period.is_zero() {
            tokio::time::sleep(self.settings.settle_period).await;
        }

        match self.checker.check(spec).await {
            Ok(true) => {
                state.status = ServiceStatus::Up;
                if was_down {
                    info!("{} recovered after restart #{}", spec.name, state.restart_count);
                    let message = format!("recovered after restart #{}", state.restart_count);
                    self.alert(spec, state, Severity::Info, message).await;
                } else {
                    info!("{} restarted successfully", spec.name);
                    let message = format!("restarted successfully (attempt #{})", state.restart_count);
                    self.alert(spec, state, Severity::Warning, message).await;
                }
                ServiceOutcome::Restarted
            }
            Ok(false) => {
                warn!("{} still unhealthy after restart", spec.name);
                let message = format!(
                    "still unhealthy after restart #{}",
                    state.restart_count
                );
                self.alert(spec, state, Severity::Warning, message).await;
                ServiceOutcome::RestartUnverified
            }
            Err(e) => {
                warn!("{}: could not verify restart: {}", spec.name, e);
                let message = format!("restart #{} could not be verified: {e}", state.restart_count);
                self.alert(spec, state, Severity::Warning, message).await;
                ServiceOutcome::RestartUnverified
            }
        }
    }
}
