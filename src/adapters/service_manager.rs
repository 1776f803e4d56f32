//! Service-manager collaborator
//!
//! Picks the restart command for the host's init system and runs it. The
//! exit code of the command is the only thing that decides restart success.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::CommandRunner;
use crate::error::{Result, SupervisorError};

/// Init systems the supervisor knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    OpenRc,
    SysVinit,
}

const RC_SERVICE_PATHS: &[&str] = &["sbin/rc-service", "usr/sbin/rc-service", "bin/rc-service"];

impl InitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitSystem::Systemd => "systemd",
            InitSystem::OpenRc => "openrc",
            InitSystem::SysVinit => "sysvinit",
        }
    }

    /// Detect the init system of the running host
    pub fn detect() -> Option<Self> {
        Self::detect_in(Path::new("/"))
    }

    /// Detect relative to a filesystem root
    pub fn detect_in(root: &Path) -> Option<Self> {
        if root.join("run/systemd/system").is_dir() {
            return Some(InitSystem::Systemd);
        }
        if RC_SERVICE_PATHS.iter().any(|p| root.join(p).is_file()) {
            return Some(InitSystem::OpenRc);
        }
        if root.join("etc/init.d").is_dir() {
            return Some(InitSystem::SysVinit);
        }
        None
    }

    /// Program and arguments that restart `unit`
    pub fn restart_command(&self, unit: &str) -> (String, Vec<String>) {
        match self {
            InitSystem::Systemd => (
                "systemctl".to_string(),
                vec!["restart".to_string(), unit.to_string()],
            ),
            InitSystem::OpenRc => (
                "rc-service".to_string(),
                vec![unit.to_string(), "restart".to_string()],
            ),
            InitSystem::SysVinit => (format!("/etc/init.d/{unit}"), vec!["restart".to_string()]),
        }
    }
}

impl std::fmt::Display for InitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InitSystem {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "systemd" => Ok(Self::Systemd),
            "openrc" => Ok(Self::OpenRc),
            "sysvinit" | "sysv" | "initd" => Ok(Self::SysVinit),
            other => Err(format!(
                "unknown init system '{other}'; expected auto|systemd|openrc|sysvinit"
            )),
        }
    }
}

/// Resolve the configured init system ("auto" means detect)
pub fn resolve_init_system(setting: &str) -> Result<InitSystem> {
    if setting.trim().eq_ignore_ascii_case("auto") {
        return Ok(InitSystem::detect().unwrap_or_else(|| {
            warn!("Could not detect init system, falling back to sysvinit scripts");
            InitSystem::SysVinit
        }));
    }
    InitSystem::from_str(setting).map_err(|e| SupervisorError::InvalidConfig(vec![e]))
}

/// Issues restart commands through an injected command runner
#[derive(Clone)]
pub struct ServiceManager {
    init: InitSystem,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ServiceManager {
    pub fn new(init: InitSystem, runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            init,
            runner,
            timeout,
        }
    }

    pub fn init_system(&self) -> InitSystem {
        self.init
    }

    /// Restart `unit`; any non-zero exit is a failure
    pub async fn restart(&self, unit: &str) -> Result<()> {
        let (program, args) = self.init.restart_command(unit);
        let rendered = format!("{} {}", program, args.join(" "));
        debug!("Running restart command: {}", rendered);

        let output = self.runner.run(&program, &args, self.timeout).await?;
        if output.success() {
            info!("Restart command succeeded: {}", rendered);
            Ok(())
        } else {
            let code = output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(SupervisorError::CommandFailed {
                command: rendered,
                reason: if output.stderr.is_empty() {
                    format!("exit status {code}")
                } else {
                    format!("exit status {code}: {}", output.stderr)
                },
            })
        }
    }
}
