//! Filesystem object store: `<root>/<container>/<key>`.
//!
//! Writes go to a temp file in the destination directory and are renamed into
//! place, so a concurrent `list_by_prefix` never observes a half-written
//! artifact under its final name. Temp files are dot-prefixed and skipped by
//! listings.

use super::{ObjectStore, StoreError};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::StreamExt;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_segment(container)?;
        let mut path = self.root.join(container);
        for segment in key.split('/') {
            validate_segment(segment).map_err(|_| StoreError::InvalidKey(key.to_string()))?;
            path.push(segment);
        }
        Ok(path)
    }
}

fn validate_segment(segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.object_path(container, key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        tokio::fs::create_dir_all(&parent).await?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut tmp = tempfile::Builder::new().prefix(".tmp").tempfile_in(&parent)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| StoreError::Io(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(format!("write task panicked: {e}")))??;

        debug!("Stored {}", path.display());
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(container, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_by_prefix(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        validate_segment(container)?;
        let base = self.root.join(container);
        let mut keys = Vec::new();
        let mut pending = vec![(base, String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => ReadDirStream::new(entries),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next().await {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };
                if entry.file_type().await?.is_dir() {
                    // Only descend where a matching key could still appear.
                    let as_dir = format!("{key}/");
                    if as_dir.starts_with(prefix) || prefix.starts_with(&as_dir) {
                        pending.push((entry.path(), key));
                    }
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
