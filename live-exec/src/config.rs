use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// Runner settings shared read-only by every session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory under which per-run workspaces are created
    pub workspace_root: PathBuf,
    /// Name prefix of each workspace directory
    pub workspace_prefix: String,
    /// Class introspection tool used to confirm runnable Java classes
    pub introspection_tool: String,
    /// Upper bound on the summed size of submitted files, unlimited when unset
    pub max_payload_bytes: Option<u64>,
    /// How long to keep draining output after the program has exited
    pub drain_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            workspace_prefix: "live-exec-".to_string(),
            introspection_tool: "javap".to_string(),
            max_payload_bytes: None,
            drain_grace_ms: 250,
        }
    }
}

impl RunnerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_max_payload_bytes(mut self, limit: u64) -> Self {
        self.max_payload_bytes = Some(limit);
        self
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}
