//! Per-session workspace directories

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const UPLOADS_DIR: &str = "uploads";
pub const OUTPUTS_DIR: &str = "outputs";
pub const TEMPLATES_LINK: &str = "templates";

/// Directories provisioned for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
    pub uploads: PathBuf,
    pub outputs: PathBuf,
    pub templates: Option<PathBuf>,
}

impl Workspace {
    pub fn path_for(data_dir: &Path, session_id: &str) -> PathBuf {
        data_dir.join(session_id)
    }

    /// Create the workspace and link shared templates into it
    pub async fn provision(data_dir: &Path, session_id: &str, templates_dir: Option<&Path>) -> Result<Self> {
        let root = Self::path_for(data_dir, session_id);
        let uploads = root.join(UPLOADS_DIR);
        let outputs = root.join(OUTPUTS_DIR);

        fs::create_dir_all(&uploads).await?;
        fs::create_dir_all(&outputs).await?;

        let templates = match templates_dir {
            Some(source) if source.is_dir() => {
                let target = root.join(TEMPLATES_LINK);
                link_templates(source, &target).await?;
                Some(target)
            }
            Some(source) => {
                warn!("Template directory {} does not exist, skipping", source.display());
                None
            }
            None => None,
        };

        debug!("Provisioned workspace at {}", root.display());

        Ok(Self {
            root,
            uploads,
            outputs,
            templates,
        })
    }

    /// Remove a session's workspace; a missing directory is not an error
    pub async fn remove(data_dir: &Path, session_id: &str) -> Result<()> {
        let root = Self::path_for(data_dir, session_id);
        match fs::remove_dir_all(&root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn link_templates(source: &Path, target: &Path) -> Result<()> {
    let source = fs::canonicalize(source).await?;
    fs::symlink(&source, target).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn link_templates(source: &Path, target: &Path) -> Result<()> {
    copy_dir(source.to_path_buf(), target.to_path_buf()).await
}

/// Recursive copy for platforms without cheap symlinks
#[cfg(not(unix))]
fn copy_dir(
    source: PathBuf,
    target: PathBuf,
) -> futures::future::BoxFuture<'static, Result<()>> {
    use futures::FutureExt;

    async move {
        fs::create_dir_all(&target).await?;
        let mut entries = fs::read_dir(&source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dest = target.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_dir(entry.path(), dest).await?;
            } else {
                fs::copy(entry.path(), &dest).await?;
                let mut permissions = fs::metadata(&dest).await?.permissions();
                permissions.set_readonly(true);
                fs::set_permissions(&dest, permissions).await?;
            }
        }
        Ok(())
    }
    .boxed()
}
