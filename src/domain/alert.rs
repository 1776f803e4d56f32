use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Service recovered
    Info,
    /// Service was restarted, or a restart did not bring it back
    Warning,
    /// Restart limit exhausted, or the restart command itself failed
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// syslog priority level used by the system-log sink
    pub fn syslog_level(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "crit",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transient alert, handed straight to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    pub service: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub restart_count: u32,
}

impl AlertEvent {
    pub fn new(
        service: &str,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        restart_count: u32,
    ) -> Self {
        Self {
            service: service.to_string(),
            severity,
            message: message.into(),
            timestamp,
            restart_count,
        }
    }

    /// One-line rendering used by log-style sinks
    pub fn summary(&self) -> String {
        format!(
            "[{}] {}: {} (restarts: {})",
            self.severity.as_str().to_uppercase(),
            self.service,
            self.message,
            self.restart_count
        )
    }
}
