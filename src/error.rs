use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Invalid service '{name}': {reason}")]
    InvalidService { name: String, reason: String },

    // Daemon lifecycle errors
    #[error("already running (PID {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("not running")]
    NotRunning,

    #[error("PID file error at {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal PID {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    // State persistence errors
    #[error("State file error at {path}: {source}")]
    StateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // External command errors
    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Health probe error: {0}")]
    Probe(String),

    #[error("Alert sink '{sink}' failed: {reason}")]
    AlertSink { sink: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Whether this error comes from configuration (fatal at load, rejected on reload)
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::Config(_)
                | SupervisorError::InvalidConfig(_)
                | SupervisorError::InvalidService { .. }
        )
    }

    pub fn invalid_service(name: &str, reason: impl Into<String>) -> Self {
        SupervisorError::InvalidService {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for SupervisorError
pub type Result<T> = std::result::Result<T, SupervisorError>;
