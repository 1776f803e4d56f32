use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SupervisorError};

/// Host used by port checks when the target only names a port
pub const DEFAULT_PORT_HOST: &str = "localhost";

/// Status code HTTP checks expect when none is configured
pub const DEFAULT_HTTP_STATUS: u16 = 200;

/// Kind of health probe configured for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Process,
    Port,
    Http,
    Custom,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Process => "process",
            CheckType::Port => "port",
            CheckType::Http => "http",
            CheckType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "port" | "tcp" => Ok(Self::Port),
            "http" | "https" => Ok(Self::Http),
            "custom" | "script" => Ok(Self::Custom),
            other => Err(format!(
                "unknown check type '{other}'; expected process|port|http|custom"
            )),
        }
    }
}

/// Typed check descriptor, parsed once at configuration load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    /// Healthy iff a process with exactly this name is in the process table
    Process { name: String },
    /// Healthy iff a TCP connect to host:port completes in time
    Port { host: String, port: u16 },
    /// Healthy iff GET url answers with exactly `expected_status`
    Http { url: String, expected_status: u16 },
    /// Healthy iff the script exits 0
    Custom { script: PathBuf },
}

impl CheckKind {
    /// Parse and validate a check argument for the given check type.
    ///
    /// Custom scripts are checked for existence and the executable bit here so
    /// that a broken path fails at load time instead of inside the loop.
    pub fn parse(
        check_type: CheckType,
        arg: &str,
        expected: Option<&str>,
    ) -> std::result::Result<Self, String> {
        let arg = arg.trim();
        if arg.is_empty() {
            return Err(format!("{check_type} check requires a target"));
        }
        if expected.is_some() && check_type != CheckType::Http {
            return Err(format!(
                "expected result is only supported for http checks, not {check_type}"
            ));
        }

        match check_type {
            CheckType::Process => Ok(CheckKind::Process {
                name: arg.to_string(),
            }),
            CheckType::Port => {
                let (host, port) = parse_host_port(arg)?;
                Ok(CheckKind::Port { host, port })
            }
            CheckType::Http => {
                let parsed =
                    url::Url::parse(arg).map_err(|e| format!("invalid URL '{arg}': {e}"))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(format!("unsupported URL scheme '{}'", parsed.scheme()));
                }
                let expected_status = match expected {
                    Some(raw) => parse_status(raw)?,
                    None => DEFAULT_HTTP_STATUS,
                };
                Ok(CheckKind::Http {
                    url: arg.to_string(),
                    expected_status,
                })
            }
            CheckType::Custom => {
                let script = PathBuf::from(arg);
                ensure_executable(&script)?;
                Ok(CheckKind::Custom { script })
            }
        }
    }

    pub fn check_type(&self) -> CheckType {
        match self {
            CheckKind::Process { .. } => CheckType::Process,
            CheckKind::Port { .. } => CheckType::Port,
            CheckKind::Http { .. } => CheckType::Http,
            CheckKind::Custom { .. } => CheckType::Custom,
        }
    }

    /// Human-readable probe target
    pub fn target(&self) -> String {
        match self {
            CheckKind::Process { name } => name.clone(),
            CheckKind::Port { host, port } => format!("{host}:{port}"),
            CheckKind::Http {
                url,
                expected_status,
            } => format!("{url} (expect {expected_status})"),
            CheckKind::Custom { script } => script.display().to_string(),
        }
    }
}

/// Split "host:port", ":port" or "port" into its parts.
pub fn parse_host_port(arg: &str) -> std::result::Result<(String, u16), String> {
    let (host, port) = match arg.rsplit_once(':') {
        Some((host, port)) => (host.trim(), port.trim()),
        None => ("", arg.trim()),
    };
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port in '{arg}'"))?;
    if port == 0 {
        return Err(format!("port must be non-zero in '{arg}'"));
    }
    let host = if host.is_empty() {
        DEFAULT_PORT_HOST.to_string()
    } else {
        host.to_string()
    };
    Ok((host, port))
}

fn parse_status(raw: &str) -> std::result::Result<u16, String> {
    match raw.trim().parse::<u16>() {
        Ok(code) if (100..=599).contains(&code) => Ok(code),
        _ => Err(format!("invalid expected HTTP status '{raw}'")),
    }
}

pub(crate) fn ensure_executable(path: &Path) -> std::result::Result<(), String> {
    let meta = std::fs::metadata(path)
        .map_err(|e| format!("custom check script {} is not accessible: {e}", path.display()))?;
    if !meta.is_file() {
        return Err(format!("custom check script {} is not a file", path.display()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(format!(
                "custom check script {} is not executable",
                path.display()
            ));
        }
    }
    Ok(())
}

/// Immutable descriptor of a supervised service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub check: CheckKind,
    /// Name handed to the service manager, when it differs from `name`
    pub unit: Option<String>,
}

impl ServiceSpec {
    pub fn new(name: &str, check: CheckKind) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            check,
            unit: None,
        })
    }

    /// Build a spec from its loose configuration parts
    pub fn from_parts(
        name: &str,
        check_type: &str,
        target: &str,
        expected: Option<&str>,
    ) -> Result<Self> {
        let check_type =
            CheckType::from_str(check_type).map_err(|e| SupervisorError::invalid_service(name, e))?;
        let check = CheckKind::parse(check_type, target, expected)
            .map_err(|e| SupervisorError::invalid_service(name, e))?;
        Self::new(name, check)
    }

    pub fn with_unit(mut self, unit: Option<String>) -> Result<Self> {
        if let Some(ref unit) = unit {
            validate_name(unit)?;
        }
        self.unit = unit;
        Ok(self)
    }

    /// Name passed to `systemctl`/`rc-service`/init scripts
    pub fn restart_unit(&self) -> &str {
        self.unit.as_deref().unwrap_or(&self.name)
    }
}

/// Parses the compact descriptor `name:type:arg[:expected]`.
///
/// For http checks a trailing `:NNN` is read as the expected status only when
/// it is a three-digit code; `web:http:http://localhost:8080/health` keeps its
/// port.
impl FromStr for ServiceSpec {
    type Err = SupervisorError;

    fn from_str(raw: &str) -> Result<Self> {
        let mut parts = raw.trim().splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        let (Some(check_type), Some(rest)) = (parts.next(), parts.next()) else {
            return Err(SupervisorError::invalid_service(
                name,
                format!("descriptor '{raw}' must look like name:type:arg"),
            ));
        };

        let check_type =
            CheckType::from_str(check_type).map_err(|e| SupervisorError::invalid_service(name, e))?;
        let (target, expected) = if check_type == CheckType::Http {
            split_expected_status(rest)
        } else {
            (rest, None)
        };

        let check = CheckKind::parse(check_type, target, expected)
            .map_err(|e| SupervisorError::invalid_service(name, e))?;
        Self::new(name, check)
    }
}

fn split_expected_status(rest: &str) -> (&str, Option<&str>) {
    if let Some((url, code)) = rest.rsplit_once(':') {
        let looks_like_status = code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit());
        if looks_like_status && url.contains("://") && !url.ends_with('/') && url.len() > 8 {
            return (url, Some(code));
        }
    }
    (rest, None)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SupervisorError::invalid_service(name, "name must not be empty"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@');
    if !name.chars().all(allowed) {
        return Err(SupervisorError::invalid_service(
            name,
            "name may only contain letters, digits, '-', '_', '.', '@'",
        ));
    }
    Ok(())
}

/// Ordered set of services, in registration order.
///
/// Replaced wholesale on reload, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistry {
    services: Vec<ServiceSpec>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ServiceSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &services {
            if !seen.insert(spec.name.as_str()) {
                return Err(SupervisorError::invalid_service(
                    &spec.name,
                    "duplicate service name",
                ));
            }
        }
        Ok(Self { services })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Observed status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Assumed until the first check says otherwise
    #[default]
    Up,
    Down,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Up => "up",
            ServiceStatus::Down => "down",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable per-service bookkeeping, owned by the monitoring loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub restart_count: u32,
    /// Start of the current restart-counting window
    #[serde(default)]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_restart_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_alert_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_check_at: Option<DateTime<Utc>>,
    /// Set once the Critical alert for the current window's exhaustion was raised
    #[serde(default)]
    pub exhaustion_reported: bool,
}

impl ServiceState {
    /// Baseline for a newly registered service: Up until first check
    pub fn baseline() -> Self {
        Self::default()
    }

    pub fn is_down(&self) -> bool {
        self.status == ServiceStatus::Down
    }
}
