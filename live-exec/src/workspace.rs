use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::RunnerConfig, error::Error, types::SourceFile};

/// Scratch directory holding one run's sources and build artifacts
#[derive(Debug)]
pub struct Workspace {
    /// Root directory for the workspace
    root_dir: PathBuf,
    /// Set once the directory has been removed
    cleaned: bool,
}

impl Workspace {
    /// Create a fresh, uniquely named workspace and materialize `files` in it.
    ///
    /// Nothing is left on disk when this returns an error.
    pub async fn create(config: &RunnerConfig, files: &[SourceFile]) -> Result<Self, Error> {
        let id = Uuid::new_v4();
        let root_dir = config
            .workspace_root
            .join(format!("{}{}", config.workspace_prefix, id));

        fs::create_dir_all(&root_dir).await.map_err(|e| {
            Error::Workspace(format!("Failed to create workspace directory: {}", e))
        })?;

        let mut workspace = Workspace {
            root_dir,
            cleaned: false,
        };

        if let Err(e) = workspace.write_files(files).await {
            workspace.cleanup().await;
            return Err(e);
        }

        debug!(
            "Created workspace {} with {} file(s)",
            workspace.root_dir.display(),
            files.len()
        );
        Ok(workspace)
    }

    async fn write_files(&self, files: &[SourceFile]) -> Result<(), Error> {
        for file in files {
            let path = self.resolve(&file.name)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Workspace(format!("Failed to create directory for {}: {}", file.name, e))
                })?;
            }
            fs::write(&path, &file.content)
                .await
                .map_err(|e| Error::Workspace(format!("Failed to write {}: {}", file.name, e)))?;
        }
        Ok(())
    }

    /// Map a submitted relative name onto a path inside the workspace.
    ///
    /// The check is lexical since the target does not exist yet: absolute
    /// paths, prefixes and any `..` component are refused outright.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, Error> {
        let mut relative = PathBuf::new();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Workspace(format!(
                        "File name escapes the workspace: {}",
                        name
                    )));
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(Error::Workspace(format!("Invalid file name: {:?}", name)));
        }
        Ok(self.root_dir.join(relative))
    }

    pub fn path(&self) -> &Path {
        &self.root_dir
    }

    /// Remove the workspace tree. Idempotent; failures are logged and dropped.
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        let result = fs::remove_dir_all(&self.root_dir).await;
        self.cleaned = true;
        match result {
            Ok(()) => debug!("Removed workspace {}", self.root_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to clean up workspace {}: {}",
                self.root_dir.display(),
                e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up workspace directory: {}", e);
            }
        }
    }
}
