use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::traits::{CommandOutput, CommandRunner};
use crate::error::{Result, SupervisorError};

/// Runs external commands as child processes, killing them on timeout
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::CommandFailed {
                command: render(program, args),
                reason: e.to_string(),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(e)) => Err(SupervisorError::CommandFailed {
                command: render(program, args),
                reason: e.to_string(),
            }),
            Err(_) => Err(SupervisorError::CommandFailed {
                command: render(program, args),
                reason: format!("timed out after {}s", timeout.as_secs_f64()),
            }),
        }
    }
}
