pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod logging;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use coordination::{ControlHandle, LoopControl, PidFile, PidStatus};
pub use domain::{
    AlertEvent, CheckKind, CheckType, ServiceRegistry, ServiceSpec, ServiceState, ServiceStatus,
    Severity,
};
pub use error::{Result, SupervisorError};
pub use supervisor::{
    AlertDispatcher, AlertSink, HealthChecker, Monitor, MonitorSettings, RecoveryConfig,
    RecoveryPolicy, StateStore,
};
