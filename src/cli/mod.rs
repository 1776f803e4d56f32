//! Supervisor CLI
//!
//! Commands:
//! - `supervisor start [--foreground]` - Start the daemon
//! - `supervisor stop [--force]` - Stop the daemon
//! - `supervisor status` - Report whether the daemon runs (exit 3 if not)
//! - `supervisor restart` - Stop, then start
//! - `supervisor reload` - Re-read the service list without restarting
//! - `supervisor validate` - Check the configuration file

pub mod daemon;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{SupervisorConfig, DEFAULT_CONFIG_PATH};
use crate::error::SupervisorError;
use crate::logging::init_logging_simple;
use crate::supervisor::StateSnapshot;

pub use daemon::{DaemonController, DaemonStatus, StopOutcome};

/// Success
pub const EXIT_OK: u8 = 0;
/// Operation failed
pub const EXIT_FAILURE: u8 = 1;
/// Usage error (clap's own exit code)
pub const EXIT_USAGE: u8 = 2;
/// `status`: daemon is not running
pub const EXIT_NOT_RUNNING: u8 = 3;

/// Service supervision daemon
#[derive(Parser, Debug)]
#[command(name = "supervisor")]
#[command(author, version, about = "Monitors services, restarts them within limits, and raises alerts")]
pub struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SUPERVISOR_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the daemon
    Start {
        /// Run in this process instead of detaching (for systemd units)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the daemon: SIGTERM, then SIGKILL after the stop timeout
    Stop {
        /// Send SIGKILL right away
        #[arg(long)]
        force: bool,
    },

    /// Show whether the daemon is running, with the last persisted service state
    Status,

    /// Stop the daemon if running, then start it
    Restart,

    /// Re-read the service list without restarting (SIGHUP)
    Reload,

    /// Validate the configuration file and print the services it defines
    Validate,
}

impl Cli {
    pub async fn run(self) -> Result<ExitCode> {
        let controller = DaemonController::new(self.config.clone());

        if !matches!(self.command, Commands::Start { foreground: true }) {
            init_logging_simple();
        }

        let code = match self.command {
            Commands::Start { foreground: true } => {
                match controller.run_foreground().await {
                    Ok(()) => EXIT_OK,
                    Err(SupervisorError::AlreadyRunning { pid }) => {
                        eprintln!("already running (PID {pid})");
                        EXIT_FAILURE
                    }
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("supervisor failed (config {})", self.config.display())
                        })
                    }
                }
            }
            Commands::Start { foreground: false } => start(&controller).await?,
            Commands::Stop { force } => stop(&controller, force).await?,
            Commands::Status => status(&controller).await?,
            Commands::Restart => {
                match controller.stop(false).await {
                    Ok(outcome) => println!("stopped (PID {})", outcome.pid()),
                    Err(SupervisorError::NotRunning) => {}
                    Err(e) => return Err(e).context("failed to stop the running daemon"),
                }
                start(&controller).await?
            }
            Commands::Reload => match controller.reload() {
                Ok(pid) => {
                    println!("reload requested (PID {pid})");
                    EXIT_OK
                }
                Err(SupervisorError::NotRunning) => {
                    eprintln!("not running");
                    EXIT_FAILURE
                }
                Err(e) => return Err(e).context("reload failed"),
            },
            Commands::Validate => validate(&self.config),
        };

        Ok(ExitCode::from(code))
    }
}

async fn start(controller: &DaemonController) -> Result<u8> {
    match controller.start().await {
        Ok(pid) => {
            println!("started (PID {pid})");
            Ok(EXIT_OK)
        }
        Err(SupervisorError::AlreadyRunning { pid }) => {
            eprintln!("already running (PID {pid})");
            Ok(EXIT_FAILURE)
        }
        Err(e) => Err(e).with_context(|| {
            format!(
                "failed to start supervisor (config {})",
                controller.config_path().display()
            )
        }),
    }
}

async fn stop(controller: &DaemonController, force: bool) -> Result<u8> {
    match controller.stop(force).await {
        Ok(StopOutcome::Graceful(pid)) => {
            println!("stopped (PID {pid})");
            Ok(EXIT_OK)
        }
        Ok(StopOutcome::Killed(pid)) => {
            println!("killed (PID {pid})");
            Ok(EXIT_OK)
        }
        Err(SupervisorError::NotRunning) => {
            eprintln!("not running");
            Ok(EXIT_FAILURE)
        }
        Err(e) => Err(e).context("failed to stop supervisor"),
    }
}

async fn status(controller: &DaemonController) -> Result<u8> {
    match controller.status().context("failed to read daemon status")? {
        DaemonStatus::Running(pid) => {
            println!("running (PID {pid})");
            match controller.snapshot().await {
                Ok(snapshot) => print!("{}", format_snapshot(&snapshot)),
                Err(e) => eprintln!("state unavailable: {e}"),
            }
            Ok(EXIT_OK)
        }
        DaemonStatus::NotRunning => {
            println!("not running");
            Ok(EXIT_NOT_RUNNING)
        }
    }
}

fn validate(path: &std::path::Path) -> u8 {
    let config = match SupervisorConfig::load_from(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            return EXIT_FAILURE;
        }
    };
    if let Err(errors) = config.validate() {
        eprintln!("{}: {} problem(s)", path.display(), errors.len());
        for error in errors {
            eprintln!("  - {error}");
        }
        return EXIT_FAILURE;
    }

    match config.registry() {
        Ok(registry) => {
            println!("{}: OK, {} service(s)", path.display(), registry.len());
            for spec in registry.iter() {
                println!(
                    "  {:<20} {:<8} {}",
                    spec.name,
                    spec.check.check_type().as_str(),
                    spec.check.target()
                );
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            EXIT_FAILURE
        }
    }
}

/// One line per service: name, status, restarts in window, last check/restart
pub fn format_snapshot(snapshot: &StateSnapshot) -> String {
    let stamp = |ts: Option<chrono::DateTime<chrono::Utc>>| {
        ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    snapshot
        .iter()
        .map(|(name, state)| {
            format!(
                "  {:<20} {:<5} restarts={:<3} last_check={} last_restart={}\n",
                name,
                state.status.as_str(),
                state.restart_count,
                stamp(state.last_check_at),
                stamp(state.last_restart_at)
            )
        })
        .collect()
}
