use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::adapters::InitSystem;
use crate::domain::{ServiceRegistry, ServiceSpec};
use crate::error::{Result, SupervisorError};
use crate::supervisor::monitor::{MonitorSettings, RegistrySource};
use crate::supervisor::recovery::RecoveryConfig;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/supervisor/supervisor.toml";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds between monitoring iterations (default: 60)
    pub check_interval_secs: u64,
    /// Restart attempts allowed per window; 0 monitors without restarting (default: 3)
    pub restart_limit: u32,
    /// Length of the restart-counting window in seconds (default: 300)
    pub restart_window_secs: u64,
    /// Minimum seconds between alerts for one service (default: 600)
    pub alert_cooldown_secs: u64,
    /// Bound on a single probe or check script (default: 5)
    pub check_timeout_secs: u64,
    /// Delay between a restart and its verification check (default: 5)
    pub settle_period_secs: u64,
    /// How long `stop` waits after SIGTERM before SIGKILL (default: 30)
    pub stop_timeout_secs: u64,
    /// Bound on a service-manager restart command (default: 30)
    pub restart_timeout_secs: u64,
    pub pid_file: PathBuf,
    pub state_file: PathBuf,
    /// auto, systemd, openrc or sysvinit
    pub init_system: String,
    pub alerts: AlertsConfig,
    pub logging: LoggingConfig,
    pub services: Vec<ServiceEntry>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            restart_limit: 3,
            restart_window_secs: 300,
            alert_cooldown_secs: 600,
            check_timeout_secs: 5,
            settle_period_secs: 5,
            stop_timeout_secs: 30,
            restart_timeout_secs: 30,
            pid_file: PathBuf::from("/var/run/supervisor.pid"),
            state_file: PathBuf::from("/var/lib/supervisor/state.json"),
            init_system: "auto".to_string(),
            alerts: AlertsConfig::default(),
            logging: LoggingConfig::default(),
            services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// JSON webhook endpoint; unset disables the webhook sink
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    /// Mirror alerts to the system log via logger(1)
    pub syslog: bool,
    pub syslog_tag: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: 5,
            syslog: true,
            syslog_tag: "supervisor".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for a daily rolling log file
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One `[[services]]` entry: a table, or the compact `name:type:arg[:expected]` string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServiceEntry {
    Descriptor(String),
    Table {
        name: String,
        check: String,
        target: String,
        expected: Option<StatusValue>,
        unit: Option<String>,
    },
}

/// Expected HTTP status, written either as `200` or `"200"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusValue::Number(n) => write!(f, "{n}"),
            StatusValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl ServiceEntry {
    pub fn name(&self) -> &str {
        match self {
            ServiceEntry::Descriptor(raw) => raw.split(':').next().unwrap_or_default(),
            ServiceEntry::Table { name, .. } => name,
        }
    }

    pub fn to_spec(&self) -> Result<ServiceSpec> {
        match self {
            ServiceEntry::Descriptor(raw) => raw.parse(),
            ServiceEntry::Table {
                name,
                check,
                target,
                expected,
                unit,
            } => {
                let expected = expected.as_ref().map(|v| v.to_string());
                ServiceSpec::from_parts(name, check, target, expected.as_deref())?
                    .with_unit(unit.clone())
            }
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from a TOML file, with `SUPERVISOR_*` environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        Self::build(File::from(path).format(FileFormat::Toml).required(true))
    }

    /// Parse configuration from TOML text (environment overrides still apply)
    pub fn from_toml(raw: &str) -> std::result::Result<Self, ConfigError> {
        Self::build(File::from_str(raw, FileFormat::Toml))
    }

    fn build<S>(source: S) -> std::result::Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(source)
            // Override with environment variables (SUPERVISOR_CHECK_INTERVAL_SECS, SUPERVISOR_ALERTS__WEBHOOK_URL, etc.)
            .add_source(
                Environment::with_prefix("SUPERVISOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Load and validate; any problem is a configuration error
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(SupervisorError::InvalidConfig)?;
        Ok(config)
    }

    /// Validate configuration values, collecting every problem
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (key, value) in [
            ("check_interval_secs", self.check_interval_secs),
            ("restart_window_secs", self.restart_window_secs),
            ("check_timeout_secs", self.check_timeout_secs),
            ("stop_timeout_secs", self.stop_timeout_secs),
            ("restart_timeout_secs", self.restart_timeout_secs),
            ("alerts.webhook_timeout_secs", self.alerts.webhook_timeout_secs),
        ] {
            if value == 0 {
                errors.push(format!("{key} must be positive"));
            }
        }

        if self.init_system != "auto" {
            if let Err(e) = InitSystem::from_str(&self.init_system) {
                errors.push(e);
            }
        }

        if let Some(ref raw) = self.alerts.webhook_url {
            match url::Url::parse(raw) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "alerts.webhook_url must use http or https, got '{}'",
                    url.scheme()
                )),
                Err(e) => errors.push(format!("alerts.webhook_url '{raw}' is not a URL: {e}")),
            }
        }

        if self.alerts.syslog && self.alerts.syslog_tag.trim().is_empty() {
            errors.push("alerts.syslog_tag must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for entry in &self.services {
            match entry.to_spec() {
                Ok(spec) => {
                    if !seen.insert(spec.name.clone()) {
                        errors.push(format!("duplicate service name '{}'", spec.name));
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parsed services, in configuration order
    pub fn registry(&self) -> Result<ServiceRegistry> {
        let specs = self
            .services
            .iter()
            .map(ServiceEntry::to_spec)
            .collect::<Result<Vec<_>>>()?;
        ServiceRegistry::new(specs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn settle_period(&self) -> Duration {
        Duration::from_secs(self.settle_period_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }

    pub fn alert_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.alert_cooldown_secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.alerts.webhook_timeout_secs)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            check_interval: self.check_interval(),
            settle_period: self.settle_period(),
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            restart_limit: self.restart_limit,
            restart_window: chrono::Duration::seconds(
                i64::try_from(self.restart_window_secs).unwrap_or(i64::MAX / 1000),
            ),
        }
    }

    /// Daemon output log used when `start` detaches, next to the state file
    pub fn daemon_log_path(&self) -> PathBuf {
        self.state_file.with_file_name("supervisor.out")
    }
}

/// Reads the registry from the configuration file on every reload
#[derive(Debug, Clone)]
pub struct ConfigFileSource {
    path: PathBuf,
}

impl ConfigFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistrySource for ConfigFileSource {
    fn load_registry(&self) -> Result<ServiceRegistry> {
        SupervisorConfig::load(&self.path)?.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CheckKind;

    const SAMPLE: &str = r#"
check_interval_secs = 30
restart_limit = 2
init_system = "systemd"

[alerts]
webhook_url = "https://hooks.example.com/alerts"
syslog = false

[logging]
level = "debug"

[[services]]
name = "web"
check = "http"
target = "http://localhost:8080/health"
expected = 204

[[services]]
name = "db"
check = "port"
target = "5432"
unit = "postgresql"

[[services]]
name = "cron"
check = "process"
target = "crond"
"#;

    #[test]
    fn test_defaults_apply_to_empty_file() {
        let config = SupervisorConfig::from_toml("").unwrap();
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.restart_limit, 3);
        assert_eq!(config.restart_window_secs, 300);
        assert_eq!(config.alert_cooldown_secs, 600);
        assert_eq!(config.settle_period_secs, 5);
        assert_eq!(config.stop_timeout_secs, 30);
        assert_eq!(config.init_system, "auto");
        assert!(config.alerts.syslog);
        assert_eq!(config.logging.level, "info");
        assert!(config.services.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = SupervisorConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.check_interval(), Duration::from_secs(30));
        assert_eq!(config.recovery_config().restart_limit, 2);
        assert!(!config.alerts.syslog);
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();

        let registry = config.registry().unwrap();
        assert_eq!(registry.names(), vec!["web", "db", "cron"]);
        assert_eq!(
            registry.get("web").unwrap().check,
            CheckKind::Http {
                url: "http://localhost:8080/health".into(),
                expected_status: 204
            }
        );
        assert_eq!(registry.get("db").unwrap().restart_unit(), "postgresql");
    }

    #[test]
    fn test_compact_descriptors() {
        let config = SupervisorConfig::from_toml(
            r#"services = ["web:port:8080", "api:http:http://localhost:9000/ping:200"]"#,
        )
        .unwrap();
        let registry = config.registry().unwrap();
        assert_eq!(registry.names(), vec!["web", "api"]);
        assert_eq!(
            registry.get("web").unwrap().check,
            CheckKind::Port {
                host: "localhost".into(),
                port: 8080
            }
        );
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let config = SupervisorConfig::from_toml(
            r#"
check_interval_secs = 0
init_system = "upstart"
services = [
    "web:port:8080",
    "web:port:8081",
    "bad:ping:host",
    "api:port:notaport",
    { name = "h", check = "http", target = "ftp://example.com" },
]
"#,
        )
        .unwrap();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 6, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("check_interval_secs")));
        assert!(errors.iter().any(|e| e.contains("duplicate service name 'web'")));
    }

    #[test]
    fn test_zero_restart_limit_is_monitor_only() {
        let config = SupervisorConfig::from_toml("restart_limit = 0").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = SupervisorConfig::load("/nonexistent/supervisor.toml").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_config_file_source_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supervisor.toml");
        std::fs::write(&path, r#"services = ["web:port:99999"]"#).unwrap();
        let source = ConfigFileSource::new(&path);
        assert!(source.load_registry().is_err());

        std::fs::write(&path, r#"services = ["web:port:8080"]"#).unwrap();
        assert_eq!(source.load_registry().unwrap().names(), vec!["web"]);
    }
}
