//! Supervisor Layer for Service Monitoring and Recovery
//!
//! This module provides the supervision core:
//! - Health checker for process, port, HTTP and custom probes
//! - Recovery policy with bounded restarts per window
//! - Alert dispatcher with per-service cooldown
//! - State store and the monitoring loop that drives all of the above

pub mod alert_manager;
pub mod clock;
pub mod health;
pub mod monitor;
pub mod recovery;
pub mod state_store;

pub use alert_manager::{AlertDispatcher, AlertSink, DispatchOutcome, LogSink, SyslogSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use health::{HealthChecker, DEFAULT_CHECK_TIMEOUT};
pub use monitor::{IterationReport, Monitor, MonitorSettings, RegistrySource, ServiceOutcome};
pub use recovery::{RecoveryConfig, RecoveryPolicy, RestartDecision};
pub use state_store::{StateSnapshot, StateStore};
