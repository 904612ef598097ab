// Virtual File System
// "Open a stream by location" capability used by file-based steps

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Errors raised while opening a location
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("location '{0}' not found")]
    NotFound(String),

    #[error("unsupported location '{0}'")]
    Unsupported(String),

    #[error("cannot open '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: io::Error,
    },
}

pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;
pub type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens read and write streams for opaque locations
#[async_trait]
pub trait Vfs: Send + Sync + fmt::Debug {
    async fn open_read(&self, location: &str) -> Result<ReadStream, VfsError>;

    /// Open for writing, creating the target; `append` keeps existing content
    async fn open_write(&self, location: &str, append: bool) -> Result<WriteStream, VfsError>;
}

/// Local file system, optionally rooted at a base directory for relative paths
#[derive(Debug, Clone, Default)]
pub struct LocalVfs {
    root: Option<PathBuf>,
}

impl LocalVfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, VfsError> {
        let path = match location.split_once("://") {
            Some(("file", rest)) => rest,
            Some(_) => return Err(VfsError::Unsupported(location.to_string())),
            None => location,
        };
        let path = Path::new(path);
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        })
    }
}

fn io_error(location: &str, source: io::Error) -> VfsError {
    if source.kind() == io::ErrorKind::NotFound {
        VfsError::NotFound(location.to_string())
    } else {
        VfsError::Io {
            location: location.to_string(),
            source,
        }
    }
}

#[async_trait]
impl Vfs for LocalVfs {
    async fn open_read(&self, location: &str) -> Result<ReadStream, VfsError> {
        let path = self.resolve(location)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_error(location, e))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, location: &str, append: bool) -> Result<WriteStream, VfsError> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(location, e))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| io_error(location, e))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_write_then_read_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = LocalVfs::with_root(dir.path());

        let mut out = vfs.open_write("nested/out.txt", false).await.unwrap();
        out.write_all(b"hello").await.unwrap();
        out.shutdown().await.unwrap();
        drop(out);

        let mut out = vfs.open_write("file://nested/out.txt", true).await.unwrap();
        out.write_all(b" world").await.unwrap();
        out.shutdown().await.unwrap();
        drop(out);

        let mut text = String::new();
        vfs.open_read("nested/out.txt")
            .await
            .unwrap()
            .read_to_string(&mut text)
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_missing_and_unsupported_locations() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = LocalVfs::with_root(dir.path());
        assert!(matches!(
            vfs.open_read("missing.txt").await,
            Err(VfsError::NotFound(_))
        ));
        assert!(matches!(
            vfs.open_read("s3://bucket/key").await,
            Err(VfsError::Unsupported(_))
        ));
    }
}
