use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;

/// Coarse file category used for token estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Text,
    Document,
    #[serde(other)]
    Other,
}

impl FileKind {
    /// Text and documents are estimated by reading their content.
    pub fn is_readable(self) -> bool {
        matches!(self, FileKind::Text | FileKind::Document)
    }
}

/// A file attached to a prompt or a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    /// Original file name, shown to the model next to inlined content
    pub name: String,
    /// Location on disk, when the file has not been copied into app storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Extension including the leading dot, e.g. `.md`
    pub ext: String,
    pub size: u64,
    pub kind: FileKind,
    /// Cached token count. Never recomputed once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl FileRef {
    pub fn new(id: impl Into<String>, ext: impl Into<String>, size: u64, kind: FileKind) -> Self {
        let id = id.into();
        let ext = ext.into();
        Self {
            name: format!("{id}{ext}"),
            id,
            path: None,
            ext,
            size,
            kind,
            tokens: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Name of the stored copy: `<id><ext>`
    pub fn storage_name(&self) -> String {
        format!("{}{}", self.id, self.ext)
    }
}

/// Reads file content for token estimation
///
/// This is the only I/O the budgeting code performs. Implementations decide
/// where stored files live; `read_path` reads an arbitrary path as UTF-8.
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Reads the stored copy of a file
    async fn read(&self, file: &FileRef) -> Result<String>;

    /// Reads a file by path
    async fn read_path(&self, path: &Path) -> Result<String>;
}

/// Reads stored files from `<root>/<id><ext>`
#[derive(Debug, Clone)]
pub struct FsFileReader {
    root: PathBuf,
}

impl FsFileReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileReader for FsFileReader {
    #[instrument(skip(self, file), fields(file_id = %file.id))]
    async fn read(&self, file: &FileRef) -> Result<String> {
        let path = self.root.join(file.storage_name());
        self.read_path(&path).await
    }

    async fn read_path(&self, path: &Path) -> Result<String> {
        debug!("Reading {}", path.display());
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| Error::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        // binary documents decode lossily rather than failing the read
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_serialization() {
        assert_eq!(serde_json::to_string(&FileKind::Image).unwrap(), "\"image\"");
        let kind: FileKind = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(kind, FileKind::Other);
    }

    #[tokio::test]
    async fn test_fs_reader_reads_storage_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.txt"), "hello there").unwrap();

        let reader = FsFileReader::new(dir.path());
        let file = FileRef::new("abc", ".txt", 11, FileKind::Text);
        assert_eq!(reader.read(&file).await.unwrap(), "hello there");
    }

    #[tokio::test]
    async fn test_fs_reader_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scan.pdf"), b"%PDF-1.7 \xff\xfe body").unwrap();

        let reader = FsFileReader::new(dir.path());
        let file = FileRef::new("scan", ".pdf", 20, FileKind::Document);
        let content = reader.read(&file).await.unwrap();
        assert!(content.starts_with("%PDF-1.7 "));
        assert!(content.ends_with(" body"));
    }

    #[tokio::test]
    async fn test_fs_reader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FsFileReader::new(dir.path());
        let file = FileRef::new("missing", ".txt", 1, FileKind::Text);

        let err = reader.read(&file).await.unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
