//! State Store
//!
//! JSON snapshot of every service's state, written atomically (temp file +
//! rename) after each monitoring iteration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::domain::ServiceState;
use crate::error::{Result, SupervisorError};

/// Service name -> state
pub type StateSnapshot = BTreeMap<String, ServiceState>;

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> SupervisorError {
        SupervisorError::StateFile {
            path: self.path.clone(),
            source,
        }
    }

    pub async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }

        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| self.io_err(e))?;
        file.write_all(&body).await.map_err(|e| self.io_err(e))?;
        file.sync_all().await.map_err(|e| self.io_err(e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        Ok(())
    }

    /// Read the snapshot; a missing file is an empty snapshot
    pub async fn load(&self) -> Result<StateSnapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateSnapshot::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// Best-effort load used at boot: unreadable or corrupt state starts empty
    pub async fn load_or_default(&self) -> StateSnapshot {
        match self.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "Ignoring unreadable state file {}: {}",
                    self.path.display(),
                    e
                );
                StateSnapshot::new()
            }
        }
    }
}
