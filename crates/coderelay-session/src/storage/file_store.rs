//! Working-directory-scoped file storage.

use std::{
    io,
    path::{Path, PathBuf},
};

use coderelay_core::join_confined;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// File store error.
///
/// The messages of `NotFound` and `AlreadyExists` are shown to clients.
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("File does not exist")]
    NotFound(PathBuf),
    #[error("File already exists")]
    AlreadyExists(PathBuf),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// File operations on paths relative to a base directory.
///
/// Paths that would leave the base directory are rejected.
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Absolute location of `path`.
    ///
    /// # Errors
    /// Returns `InvalidPath` if `path` is empty or escapes the base directory.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FileStoreError> {
        join_confined(&self.base, path).ok_or_else(|| FileStoreError::InvalidPath(path.to_string()))
    }

    /// Whether `path` names an existing regular file.
    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::metadata(full)
                .await
                .is_ok_and(|m| m.is_file()),
            Err(_) => false,
        }
    }

    /// Read a file as text. Invalid UTF-8 is replaced, not rejected.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no such file.
    pub async fn read(&self, path: &str) -> Result<String, FileStoreError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if is_missing(&e) => Err(FileStoreError::NotFound(full)),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a file as raw bytes.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no such file.
    pub async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if is_missing(&e) => Err(FileStoreError::NotFound(full)),
            Err(e) => Err(e.into()),
        }
    }

    /// Create or overwrite a file, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns error if the path is invalid or the write fails.
    pub async fn write(&self, path: &str, contents: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path)?;
        create_parent(&full).await?;
        tokio::fs::write(&full, contents).await?;
        Ok(())
    }

    /// Create an empty file, creating parent directories as needed.
    ///
    /// An existing file is left untouched.
    ///
    /// # Errors
    /// Returns `AlreadyExists` if the file is already there.
    pub async fn create(&self, path: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path)?;
        create_parent(&full).await?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(FileStoreError::AlreadyExists(full));
            }
            Err(e) => return Err(e.into()),
        };
        file.flush().await?;
        Ok(())
    }

    /// Remove a file.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no such file.
    pub async fn delete(&self, path: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Err(FileStoreError::NotFound(full)),
            Err(e) => Err(e.into()),
        }
    }
}

// A directory where a file is expected reads as missing too.
fn is_missing(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::IsADirectory | io::ErrorKind::NotADirectory
    )
}

async fn create_parent(path: &Path) -> Result<(), FileStoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
