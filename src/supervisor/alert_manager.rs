//! Alert Dispatcher
//!
//! Delivers alerts to every configured sink, at most once per service per
//! cooldown window. Delivery is best effort: sink failures are logged and
//! never affect other sinks or the monitoring loop.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::adapters::CommandRunner;
use crate::domain::{AlertEvent, ServiceState, Severity};
use crate::error::{Result, SupervisorError};

/// Destination for delivered alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &AlertEvent) -> Result<()>;
}

/// Writes alerts to the daemon's own log at a severity-mapped level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        match event.severity {
            Severity::Info => info!(
                target: "supervisor::alert",
                service = %event.service,
                restart_count = event.restart_count,
                "{}",
                event.message
            ),
            Severity::Warning => warn!(
                target: "supervisor::alert",
                service = %event.service,
                restart_count = event.restart_count,
                "{}",
                event.message
            ),
            Severity::Critical => error!(
                target: "supervisor::alert",
                service = %event.service,
                restart_count = event.restart_count,
                "CRITICAL {}",
                event.message
            ),
        }
        Ok(())
    }
}

/// Hands alerts to the system log through `logger(1)`
#[derive(Clone)]
pub struct SyslogSink {
    runner: Arc<dyn CommandRunner>,
    tag: String,
    timeout: Duration,
}

impl SyslogSink {
    pub fn new(runner: Arc<dyn CommandRunner>, tag: impl Into<String>) -> Self {
        Self {
            runner,
            tag: tag.into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn args(&self, event: &AlertEvent) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.tag.clone(),
            "-p".to_string(),
            format!("daemon.{}", event.severity.syslog_level()),
            event.summary(),
        ]
    }
}

#[async_trait]
impl AlertSink for SyslogSink {
    fn name(&self) -> &str {
        "syslog"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let output = self
            .runner
            .run("logger", &self.args(event), self.timeout)
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(SupervisorError::AlertSink {
                sink: "syslog".to_string(),
                reason: format!("logger exited with {:?}: {}", output.code, output.stderr),
            })
        }
    }
}

/// Result of a dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Within the service's cooldown window; nothing was sent
    Suppressed,
    /// Sent to every sink; names the sinks that failed
    Delivered { failed_sinks: Vec<String> },
}

impl DispatchOutcome {
    pub fn was_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

/// Alert dispatcher with per-service cooldown
pub struct AlertDispatcher {
    cooldown: chrono::Duration,
    sinks: Vec<Arc<dyn AlertSink>>,
    suppressed: HashMap<String, u32>,
}

impl AlertDispatcher {
    pub fn new(cooldown: chrono::Duration) -> Self {
        Self {
            cooldown,
            sinks: Vec::new(),
            suppressed: HashMap::new(),
        }
    }

    /// Add a delivery sink
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    fn in_cooldown(&self, event: &AlertEvent, state: &ServiceState) -> bool {
        match state.last_alert_at {
            Some(last) => event.timestamp.signed_duration_since(last) < self.cooldown,
            None => false,
        }
    }

    /// Deliver `event` unless the service alerted within the cooldown window
    pub async fn dispatch(&mut self, event: AlertEvent, state: &mut ServiceState) -> DispatchOutcome {
        if self.in_cooldown(&event, state) {
            let count = self.suppressed.entry(event.service.clone()).or_insert(0);
            *count += 1;
            debug!(
                "Suppressing {} alert for {} ({} suppressed in cooldown)",
                event.severity, event.service, count
            );
            return DispatchOutcome::Suppressed;
        }

        state.last_alert_at = Some(event.timestamp);
        if let Some(count) = self.suppressed.remove(&event.service) {
            info!(
                "{} alert(s) for {} were suppressed during the last cooldown",
                count, event.service
            );
        }

        let mut failed_sinks = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&event).await {
                error!(
                    "Failed to deliver {} alert for {} via {}: {}",
                    event.severity,
                    event.service,
                    sink.name(),
                    e
                );
                failed_sinks.push(sink.name().to_string());
            }
        }

        DispatchOutcome::Delivered { failed_sinks }
    }

    /// Suppressed-alert counters since each service's last delivery
    pub fn suppressed_counts(&self) -> &HashMap<String, u32> {
        &self.suppressed
    }

    /// Drop bookkeeping for a service that left the registry
    pub fn forget(&mut self, service: &str) {
        self.suppressed.remove(service);
    }
}
