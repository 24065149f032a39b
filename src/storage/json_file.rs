//! Session metadata persisted as `<root>/<session_id>/metadata.json`

use super::MetadataStore;
use crate::error::Result;
use crate::session::SessionMetadata;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const METADATA_FILE: &str = "metadata.json";

/// File-backed metadata store sharing the session workspace directories
pub struct JsonFileMetadataStore {
    root: PathBuf,
}

impl JsonFileMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id).join(METADATA_FILE)
    }

    async fn read(path: &Path) -> Result<Option<SessionMetadata>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MetadataStore for JsonFileMetadataStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        Self::read(&self.path_for(session_id)).await
    }

    async fn put(&self, metadata: &SessionMetadata) -> Result<()> {
        let path = self.path_for(&metadata.session_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never observe a torn file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(metadata)?).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Persisted metadata for session {}", metadata.session_id);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<SessionMetadata>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(METADATA_FILE);
            match Self::read(&path).await {
                Ok(Some(metadata)) => sessions.push(metadata),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable metadata at {}: {}", path.display(), e),
            }
        }

        Ok(sessions)
    }
}
