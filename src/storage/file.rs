//! File storage module
//!
//! Preallocation of download targets, positional piece writes and the
//! bounded piece reads served to other peers.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::ShareError;
use crate::storage::piece::{piece_offset, PIECE_SIZE};

/// Create `path` (and its parents) and resize it to exactly `size` bytes
///
/// Existing bytes below `size` are preserved, any extension reads as zeros.
pub async fn preallocate(path: &Path, size: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create directory {}: {}", parent.display(), e);
                ShareError::storage_error_full("Failed to create directory", parent.display().to_string(), e.to_string())
            })?;
        }
    }

    let mut f = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| {
            error!("Failed to create file {}: {}", path.display(), e);
            ShareError::storage_error_full("Failed to create file", path.display().to_string(), e.to_string())
        })?;

    f.set_len(size).await.map_err(|e| {
        error!("Failed to set file length for {}: {}", path.display(), e);
        ShareError::storage_error_full("Failed to set file length", path.display().to_string(), e.to_string())
    })?;

    f.flush().await.map_err(|e| {
        ShareError::storage_error_full("Failed to flush file", path.display().to_string(), e.to_string())
    })?;

    debug!("Preallocated {} to {} bytes", path.display(), size);
    Ok(())
}

/// Write `data` at `offset` and flush before returning
pub async fn write_at(path: &Path, offset: u64, data: &[u8]) -> Result<()> {
    let mut file_handle = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| {
            error!("Failed to open {} for writing: {}", path.display(), e);
            ShareError::storage_error_full("Failed to open file for writing", path.display().to_string(), e.to_string())
        })?;

    file_handle.seek(SeekFrom::Start(offset)).await.map_err(|e| {
        ShareError::storage_error_full("Failed to seek in file", path.display().to_string(), e.to_string())
    })?;

    file_handle.write_all(data).await.map_err(|e| {
        error!("Failed to write {} bytes at {} in {}: {}", data.len(), offset, path.display(), e);
        ShareError::storage_error_full("Failed to write to file", path.display().to_string(), e.to_string())
    })?;

    file_handle.flush().await.map_err(|e| {
        ShareError::storage_error_full("Failed to flush file", path.display().to_string(), e.to_string())
    })?;

    Ok(())
}

/// Read piece `index` of the file at `path`, truncated at end of file
///
/// Returns `None` when the piece starts at or past the end of the file.
pub async fn read_piece(path: &Path, index: usize) -> Result<Option<Vec<u8>>> {
    let mut file_handle = fs::File::open(path).await.map_err(|e| {
        ShareError::storage_error_full("Failed to open file for reading", path.display().to_string(), e.to_string())
    })?;

    let file_len = file_handle.metadata().await?.len();
    let offset = piece_offset(index);
    if offset >= file_len {
        return Ok(None);
    }

    let length = (file_len - offset).min(PIECE_SIZE as u64) as usize;
    file_handle.seek(SeekFrom::Start(offset)).await.map_err(|e| {
        ShareError::storage_error_full("Failed to seek in file", path.display().to_string(), e.to_string())
    })?;

    let mut data = vec![0u8; length];
    file_handle.read_exact(&mut data).await.map_err(|e| {
        ShareError::storage_error_full("Failed to read from file", path.display().to_string(), e.to_string())
    })?;

    Ok(Some(data))
}

/// Local files this peer serves, by filename
///
/// Filenames are the keys other peers request pieces by. A later
/// registration of the same name replaces the earlier path.
#[derive(Debug, Default)]
pub struct SharedFiles {
    files: RwLock<HashMap<String, PathBuf>>,
}

impl SharedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start serving `path` under `name`
    pub async fn add(&self, name: impl Into<String>, path: PathBuf) {
        let name = name.into();
        info!("Sharing {} as {}", path.display(), name);
        self.files.write().await.insert(name, path);
    }

    /// Stop serving `name`, returning its path if it was shared
    pub async fn remove(&self, name: &str) -> Option<PathBuf> {
        self.files.write().await.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<PathBuf> {
        self.files.read().await.get(name).cloned()
    }

    /// All shared names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_preallocate_preserves_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");

        preallocate(&path, 10).await.unwrap();
        write_at(&path, 0, b"abc").await.unwrap();
        preallocate(&path, 20).await.unwrap();

        let data = fs::read(&path).await.unwrap();
        assert_eq!(data.len(), 20);
        assert_eq!(&data[..3], b"abc");
        assert!(data[3..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_positional_writes_any_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        preallocate(&path, 6).await.unwrap();

        write_at(&path, 3, b"def").await.unwrap();
        write_at(&path, 0, b"abc").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_read_piece_truncates_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        let data = vec![5u8; PIECE_SIZE + 10];
        fs::write(&path, &data).await.unwrap();

        assert_eq!(read_piece(&path, 0).await.unwrap().unwrap().len(), PIECE_SIZE);
        assert_eq!(read_piece(&path, 1).await.unwrap().unwrap().len(), 10);
        assert!(read_piece(&path, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shared_files_latest_wins() {
        let shared = SharedFiles::new();
        shared.add("data.bin", PathBuf::from("/a/data.bin")).await;
        shared.add("data.bin", PathBuf::from("/b/data.bin")).await;
        shared.add("other.bin", PathBuf::from("/a/other.bin")).await;

        assert_eq!(shared.get("data.bin").await, Some(PathBuf::from("/b/data.bin")));
        assert_eq!(shared.names().await, vec!["data.bin", "other.bin"]);

        assert!(shared.remove("data.bin").await.is_some());
        assert!(shared.get("data.bin").await.is_none());
    }
}
