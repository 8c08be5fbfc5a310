//! Chunked sequential file I/O used by both the client and server transfer drivers

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::PAYLOAD_SIZE;

/// Errors raised while reading or writing transfer files
#[derive(Debug, Error)]
pub enum FileError {
    /// The source file could not be opened for reading
    #[error("cannot open '{path}' for reading: {source}")]
    OpenForRead {
        /// Path that failed to open
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The destination file could not be created
    #[error("cannot create '{path}': {source}")]
    Create {
        /// Path that failed to create
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A read or write against an open file failed
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The supplied file name was rejected (empty or escapes the storage directory)
    #[error("invalid file name: {0}")]
    InvalidName(String),
}

/// Rejects empty names and any path component that could escape the storage directory
pub fn sanitize_file_name(name: &str) -> Result<&str, FileError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FileError::InvalidName("file name is empty".into()));
    }
    let rejected = trimmed
        .split(['/', '\\'])
        .any(|part| part == ".." || part.is_empty() && trimmed.len() > 1);
    if rejected || trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(FileError::InvalidName(format!(
            "file name escapes storage directory: {trimmed}"
        )));
    }
    Ok(trimmed)
}

/// Sequential reader over a source file, yielding chunks of at most [`PAYLOAD_SIZE`]
pub struct ChunkReader {
    path: PathBuf,
    file: File,
}

impl ChunkReader {
    /// Open `path` for chunked sequential reads
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|source| FileError::OpenForRead {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file })
    }

    /// Read the next chunk. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, FileError> {
        let mut buf = vec![0u8; PAYLOAD_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|source| FileError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            Ok(None)
        } else {
            buf.truncate(filled);
            Ok(Some(buf))
        }
    }
}

/// Sequential writer that flushes after every write, matching the source's
/// write-then-flush discipline.
pub struct ChunkWriter {
    path: PathBuf,
    file: File,
}

impl ChunkWriter {
    /// Create (truncating) `path` for chunked sequential writes
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .await
            .map_err(|source| FileError::Create {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file })
    }

    /// Append `data` and flush immediately
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), FileError> {
        self.file
            .write_all(data)
            .await
            .map_err(|source| FileError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.file.flush().await.map_err(|source| FileError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_empty() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("   ").is_err());
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_file_name("../etc/passwd").is_err());
        assert!(sanitize_file_name("/etc/passwd").is_err());
    }

    #[test]
    fn sanitize_accepts_plain_name() {
        assert_eq!(sanitize_file_name("  report.txt  ").unwrap(), "report.txt");
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!(
            "rft-filestore-test-{}",
            std::process::id()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("sample.bin");

        let mut writer = ChunkWriter::create(&path).await.unwrap();
        writer.write_chunk(b"hello ").await.unwrap();
        writer.write_chunk(b"world").await.unwrap();

        let mut reader = ChunkReader::open(&path).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello world");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
