//! Local-directory sink: `<root>/<recipient>/<title>.pdf`.
//!
//! Uses atomic write (uniquely named temp file + rename) so a reader never sees a partial
//! PDF. Delivering the same title twice overwrites rather than duplicates.

use super::RecipientSink;
use crate::error::DeliveryError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `recipient` receives a document titled `title`.
    pub fn target_path(&self, recipient: &str, title: &str) -> PathBuf {
        self.root
            .join(recipient)
            .join(format!("{}.pdf", file_safe(title)))
    }
}

/// Replace characters that are path separators or reserved on common filesystems.
fn file_safe(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect()
}

#[async_trait]
impl RecipientSink for DirectorySink {
    async fn deliver(&self, recipient: &str, document: &[u8], title: &str) -> Result<(), DeliveryError> {
        let failed = |detail: String| DeliveryError::UploadFailed {
            recipient: recipient.to_string(),
            detail,
        };
        let path = self.target_path(recipient, title);
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| failed(format!("{}: no parent directory", path.display())))?;
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| failed(format!("{}: {e}", parent.display())))?;

        // Unique temp file per delivery: duplicate merges can deliver the same title at once.
        let bytes = document.to_vec();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::Builder::new().prefix(".tmp").tempfile_in(&parent)?;
            tmp.write_all(&bytes)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| failed(format!("write task panicked: {e}")))?
        .map_err(|e| failed(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_under_recipient_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        sink.deliver("sandy", b"%PDF-1.7", "Scanned Document - Tue 14 Nov 2023 at 17:13")
            .await
            .unwrap();

        let path = dir
            .path()
            .join("sandy")
            .join("Scanned Document - Tue 14 Nov 2023 at 17-13.pdf");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn redelivery_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        sink.deliver("wouter", b"one", "Doc").await.unwrap();
        sink.deliver("wouter", b"two", "Doc").await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("wouter")).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
        assert_eq!(tokio::fs::read(sink.target_path("wouter", "Doc")).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn simultaneous_duplicate_deliveries_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let document = vec![0x25u8; 256 * 1024];
        for round in 0..50 {
            let title = format!("Doc {round}");
            let (a, b) = tokio::join!(
                sink.deliver("sandy", &document, &title),
                sink.deliver("sandy", &document, &title),
            );
            a.unwrap();
            b.unwrap();
        }

        let mut entries = tokio::fs::read_dir(dir.path().join("sandy")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names.len(), 50);
        assert!(names.iter().all(|n| n.ends_with(".pdf") && !n.starts_with(".tmp")));
    }

    #[test]
    fn titles_cannot_escape_the_recipient_directory() {
        let sink = DirectorySink::new("/srv/out");
        assert_eq!(
            sink.target_path("sandy", "../etc/passwd"),
            PathBuf::from("/srv/out/sandy/..-etc-passwd.pdf")
        );
    }
}
