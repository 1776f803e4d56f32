use async_trait::async_trait;
use sysinfo::{ProcessesToUpdate, System};

use super::traits::ProcessLister;
use crate::error::{Result, SupervisorError};

/// Process table backed by `sysinfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessLister;

impl SystemProcessLister {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLister for SystemProcessLister {
    async fn process_names(&self) -> Result<Vec<String>> {
        tokio::task::spawn_blocking(|| {
            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::All, true);

            let mut names = Vec::with_capacity(system.processes().len());
            for process in system.processes().values() {
                let comm = process.name().to_string_lossy();
                let exe_name = process
                    .exe()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy());
                names.extend(match_names(&comm, exe_name.as_deref()));
            }
            names.sort_unstable();
            names.dedup();
            names
        })
        .await
        .map_err(|e| SupervisorError::Probe(format!("process table scan failed: {e}")))
    }
}

/// Longest `comm` the kernel keeps; longer names are cut to this many bytes
const COMM_MAX_LEN: usize = 15;

/// Names a Process check may match exactly for one process. A `comm` cut
/// down from the executable name is dropped so it cannot act as a prefix.
fn match_names(comm: &str, exe_name: Option<&str>) -> Vec<String> {
    match exe_name {
        None => vec![comm.to_string()],
        Some(exe) if comm.len() >= COMM_MAX_LEN && exe != comm && exe.starts_with(comm) => {
            vec![exe.to_string()]
        }
        Some(exe) if exe == comm => vec![exe.to_string()],
        Some(exe) => vec![comm.to_string(), exe.to_string()],
    }
}
