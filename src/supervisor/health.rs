//! Health Checker
//!
//! Runs the probe configured for a service. A probe that cannot reach its
//! target (timeout, refused, wrong status, non-zero exit) yields `Ok(false)`;
//! `Err` is reserved for problems with the probe itself.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::{
    CommandRunner, HttpProbe, PortDialer, ProcessLister, ReqwestProbe, SystemProcessLister,
    TcpDialer, TokioCommandRunner,
};
use crate::domain::service::ensure_executable;
use crate::domain::{CheckKind, ServiceSpec};
use crate::error::{Result, SupervisorError};

/// Default bound on a single probe
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct HealthChecker {
    processes: Arc<dyn ProcessLister>,
    dialer: Arc<dyn PortDialer>,
    http: Arc<dyn HttpProbe>,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        processes: Arc<dyn ProcessLister>,
        dialer: Arc<dyn PortDialer>,
        http: Arc<dyn HttpProbe>,
        runner: Arc<dyn CommandRunner>,
        timeout: Duration,
    ) -> Self {
        Self {
            processes,
            dialer,
            http,
            runner,
            timeout,
        }
    }

    /// Checker wired to the real process table, network and child processes
    pub fn system(timeout: Duration) -> Result<Self> {
        Ok(Self::new(
            Arc::new(SystemProcessLister::new()),
            Arc::new(TcpDialer),
            Arc::new(ReqwestProbe::new()?),
            Arc::new(TokioCommandRunner),
            timeout,
        ))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn check(&self, spec: &ServiceSpec) -> Result<bool> {
        let healthy = match &spec.check {
            CheckKind::Process { name } => {
                let names = self.processes.process_names().await?;
                names.iter().any(|n| n == name)
            }
            CheckKind::Port { host, port } => self.dialer.dial(host, *port, self.timeout).await,
            CheckKind::Http {
                url,
                expected_status,
            } => match self.http.get_status(url, self.timeout).await {
                Ok(status) if status == *expected_status => true,
                Ok(status) => {
                    debug!(
                        "{}: GET {} returned {} (expected {})",
                        spec.name, url, status, expected_status
                    );
                    false
                }
                Err(e) => {
                    debug!("{}: {}", spec.name, e);
                    false
                }
            },
            CheckKind::Custom { script } => {
                let program = script.to_string_lossy();
                match self.runner.run(&program, &[], self.timeout).await {
                    Ok(output) => {
                        if !output.success() {
                            debug!(
                                "{}: check script exited with {:?}",
                                spec.name, output.code
                            );
                        }
                        output.success()
                    }
                    Err(e) => {
                        // A script that vanished or lost its mode bits is a configuration problem
                        if let Err(reason) = ensure_executable(script) {
                            return Err(SupervisorError::invalid_service(&spec.name, reason));
                        }
                        warn!("{}: check script did not complete: {}", spec.name, e);
                        false
                    }
                }
            }
        };

        debug!(
            "{} ({} {}) -> {}",
            spec.name,
            spec.check.check_type(),
            spec.check.target(),
            if healthy { "healthy" } else { "unhealthy" }
        );
        Ok(healthy)
    }
}
