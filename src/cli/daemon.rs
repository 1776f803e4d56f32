//! Daemon Controller
//!
//! start / stop / status / reload against the PID file named in the
//! configuration. Only `start --foreground` runs the monitoring loop; every
//! other operation talks to that process through its PID file and signals.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::adapters::{resolve_init_system, CommandRunner, ServiceManager, TokioCommandRunner, WebhookSink};
use crate::config::{ConfigFileSource, SupervisorConfig};
use crate::coordination::pid_file::{self, send_signal, Signal};
use crate::coordination::{install_signal_handlers, LoopControl, PidFile, PidStatus};
use crate::error::{Result, SupervisorError};
use crate::logging::init_logging;
use crate::supervisor::{
    AlertDispatcher, HealthChecker, LogSink, Monitor, RecoveryPolicy, StateSnapshot, StateStore,
    SyslogSink, SystemClock,
};

/// How long `start` waits for the detached daemon to claim its PID file
const STARTUP_WAIT: Duration = Duration::from_secs(10);
/// How long to wait for a SIGKILLed daemon to disappear
const KILL_WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Result of a `status` query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running(u32),
    NotRunning,
}

/// How a daemon went away on `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after SIGTERM within the timeout
    Graceful(u32),
    /// Needed SIGKILL
    Killed(u32),
}

impl StopOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            StopOutcome::Graceful(pid) | StopOutcome::Killed(pid) => *pid,
        }
    }
}

pub struct DaemonController {
    config_path: PathBuf,
}

impl DaemonController {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Configuration for control commands: parsed but not validated, so a
    /// broken service entry never prevents stopping the daemon
    fn control_config(&self) -> Result<SupervisorConfig> {
        Ok(SupervisorConfig::load_from(&self.config_path)?)
    }

    /// Read-only: never touches the PID file. Without a readable
    /// configuration the default PID file location is consulted.
    pub fn status(&self) -> Result<DaemonStatus> {
        let pid_path = match self.control_config() {
            Ok(config) => config.pid_file,
            Err(e) => {
                let fallback = SupervisorConfig::default().pid_file;
                warn!(
                    "Cannot read {} ({}); checking {}",
                    self.config_path.display(),
                    e,
                    fallback.display()
                );
                fallback
            }
        };
        Ok(match pid_file::probe(&pid_path)? {
            PidStatus::Running(pid) => DaemonStatus::Running(pid),
            _ => DaemonStatus::NotRunning,
        })
    }

    /// Last persisted per-service snapshot, if any
    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        let config = self.control_config()?;
        StateStore::new(config.state_file).load().await
    }

    /// Spawn a detached `start --foreground` and wait for it to claim the PID file
    pub async fn start(&self) -> Result<u32> {
        let config = SupervisorConfig::load(&self.config_path)?;
        refuse_if_running(&config.pid_file)?;

        let log_path = config.daemon_log_path();
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let exe = std::env::current_exe()?;
        let config_path = std::fs::canonicalize(&self.config_path)?;
        let mut command = std::process::Command::new(exe);
        command
            .arg("--config")
            .arg(&config_path)
            .arg("start")
            .arg("--foreground")
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Detach from the controlling terminal's process group
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| SupervisorError::CommandFailed {
            command: "supervisor start --foreground".to_string(),
            reason: e.to_string(),
        })?;
        let child_pid = child.id();

        let deadline = Instant::now() + STARTUP_WAIT;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(SupervisorError::CommandFailed {
                    command: "supervisor start --foreground".to_string(),
                    reason: format!(
                        "daemon exited during startup ({status}); see {}",
                        log_path.display()
                    ),
                });
            }
            if let PidStatus::Running(pid) = pid_file::probe(&config.pid_file)? {
                if pid == child_pid {
                    return Ok(pid);
                }
            }
            if Instant::now() >= deadline {
                return Err(SupervisorError::CommandFailed {
                    command: "supervisor start --foreground".to_string(),
                    reason: format!(
                        "PID file {} not written within {:?}; see {}",
                        config.pid_file.display(),
                        STARTUP_WAIT,
                        log_path.display()
                    ),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Run the daemon in this process until SIGTERM/SIGINT
    pub async fn run_foreground(&self) -> Result<()> {
        let config = SupervisorConfig::load(&self.config_path)?;
        let _log_guard = init_logging(&config.logging);

        let pid_file = PidFile::acquire(&config.pid_file)?;
        info!(
            "Supervisor started (PID {}), config {}",
            pid_file.pid(),
            self.config_path.display()
        );

        let control = LoopControl::new();
        install_signal_handlers(control.clone())?;

        let registry = config.registry()?;
        if registry.is_empty() {
            warn!("No services configured; the loop will idle until a reload adds some");
        }

        let store = StateStore::new(config.state_file.clone());
        let snapshot = store.load_or_default().await;
        let mut monitor = Monitor::new(
            config.monitor_settings(),
            registry,
            HealthChecker::system(config.check_timeout())?,
            build_recovery(&config)?,
            build_alerts(&config)?,
            store,
            Arc::new(SystemClock),
        );
        monitor.restore(snapshot);

        let source = ConfigFileSource::new(self.config_path.clone());
        monitor.run(control.handle(), &source).await;

        pid_file.release()?;
        info!("Supervisor stopped");
        Ok(())
    }

    /// SIGTERM, poll up to `stop_timeout`, then SIGKILL; `force` skips straight to SIGKILL
    pub async fn stop(&self, force: bool) -> Result<StopOutcome> {
        let config = self.control_config()?;
        let pid = match pid_file::probe(&config.pid_file)? {
            PidStatus::Running(pid) => pid,
            PidStatus::Missing => return Err(SupervisorError::NotRunning),
            PidStatus::Stale(pid) => {
                pid_file::remove_if_unclaimed(&config.pid_file, &pid.to_string())?;
                return Err(SupervisorError::NotRunning);
            }
            PidStatus::Invalid(content) => {
                pid_file::remove_if_unclaimed(&config.pid_file, &content)?;
                return Err(SupervisorError::NotRunning);
            }
        };

        let outcome = terminate(pid, config.stop_timeout(), force).await?;
        // The daemon removes its own PID file on a clean exit; not after SIGKILL.
        // A daemon started meanwhile owns a new file, which is left alone.
        pid_file::remove_if_unclaimed(&config.pid_file, &pid.to_string())?;
        Ok(outcome)
    }

    /// Ask the running daemon to re-read its configuration
    pub fn reload(&self) -> Result<u32> {
        // Reject a broken file here rather than in the daemon's log
        SupervisorConfig::load(&self.config_path)?;
        let config = self.control_config()?;
        match pid_file::probe(&config.pid_file)? {
            PidStatus::Running(pid) => {
                send_signal(pid, Signal::SIGHUP)?;
                Ok(pid)
            }
            _ => Err(SupervisorError::NotRunning),
        }
    }
}

/// Refuse to start over a live daemon; a stale file is replaced by the new
/// daemon itself while it holds the claim lock
fn refuse_if_running(path: &Path) -> Result<()> {
    match pid_file::probe(path)? {
        PidStatus::Running(pid) => Err(SupervisorError::AlreadyRunning { pid }),
        PidStatus::Stale(pid) => {
            info!("PID file {} names exited PID {}; it will be replaced", path.display(), pid);
            Ok(())
        }
        PidStatus::Invalid(_) | PidStatus::Missing => Ok(()),
    }
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while pid_file::is_process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    true
}

/// Terminate `pid`, escalating to SIGKILL after `timeout`
pub async fn terminate(pid: u32, timeout: Duration, force: bool) -> Result<StopOutcome> {
    if !force {
        send_signal(pid, Signal::SIGTERM)?;
        if wait_for_exit(pid, timeout).await {
            return Ok(StopOutcome::Graceful(pid));
        }
        warn!("PID {} still alive after {:?}, sending SIGKILL", pid, timeout);
    }

    match send_signal(pid, Signal::SIGKILL) {
        Ok(()) => {}
        // Exited between the last poll and the kill
        Err(_) if !pid_file::is_process_alive(pid) => return Ok(StopOutcome::Graceful(pid)),
        Err(e) => return Err(e),
    }
    if wait_for_exit(pid, KILL_WAIT).await {
        Ok(StopOutcome::Killed(pid))
    } else {
        Err(SupervisorError::Signal {
            pid,
            reason: "process survived SIGKILL".to_string(),
        })
    }
}

fn build_recovery(config: &SupervisorConfig) -> Result<RecoveryPolicy> {
    let init = resolve_init_system(&config.init_system)?;
    info!("Restarts go through {}", init);
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
    Ok(RecoveryPolicy::new(
        config.recovery_config(),
        ServiceManager::new(init, runner, config.restart_timeout()),
    ))
}

fn build_alerts(config: &SupervisorConfig) -> Result<AlertDispatcher> {
    let mut alerts = AlertDispatcher::new(config.alert_cooldown()).with_sink(Arc::new(LogSink));
    if config.alerts.syslog {
        alerts = alerts.with_sink(Arc::new(SyslogSink::new(
            Arc::new(TokioCommandRunner),
            config.alerts.syslog_tag.clone(),
        )));
    }
    if let Some(ref url) = config.alerts.webhook_url {
        alerts = alerts.with_sink(Arc::new(WebhookSink::new(
            url.clone(),
            config.webhook_timeout(),
        )?));
    }
    info!("Alert sinks: {}", alerts.sink_names().join(", "));
    Ok(alerts)
}
