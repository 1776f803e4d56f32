//! Capabilities the supervisor uses to observe and control services.
//!
//! The core logic only talks to these traits; the real implementations are
//! thin adapters over the process table, TCP, HTTP and child processes.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Exit status of an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessLister: Send + Sync {
    /// Names of every process currently in the process table
    async fn process_names(&self) -> Result<Vec<String>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortDialer: Send + Sync {
    /// Whether a TCP connection to host:port completes within `timeout`
    async fn dial(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Status code returned by a GET, or an error when no response arrived in time
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion; errors mean it could not be run or timed out
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput>;
}
