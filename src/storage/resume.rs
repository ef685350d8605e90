//! Resume data module
//!
//! A download keeps two sidecar files next to its destination:
//! `<dest>.downloading`, one status byte per piece, and `<dest>.resume.json`,
//! the identity of the file the bytes belong to.

use std::ffi::OsString;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::error::ShareError;
use crate::storage::piece::PieceStatus;

const RECORD_SUFFIX: &str = ".downloading";
const MANIFEST_SUFFIX: &str = ".resume.json";

fn with_suffix(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the per-piece status record for `dest`
pub fn record_path(dest: &Path) -> PathBuf {
    with_suffix(dest, RECORD_SUFFIX)
}

/// Path of the identity manifest for `dest`
pub fn manifest_path(dest: &Path) -> PathBuf {
    with_suffix(dest, MANIFEST_SUFFIX)
}

/// Identity of the file a resume record describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeManifest {
    pub group: String,
    pub filename: String,
    pub size: u64,
    pub full_hash: String,
    pub piece_count: usize,
}

impl ResumeManifest {
    /// Whether a stored manifest describes the same content
    pub fn same_content(&self, other: &ResumeManifest) -> bool {
        self.size == other.size && self.full_hash == other.full_hash && self.piece_count == other.piece_count
    }

    /// Save to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data).await.map_err(|e| {
            error!("Failed to write resume manifest {}: {}", path.display(), e);
            ShareError::storage_error_full("Failed to write resume manifest", path.display().to_string(), e.to_string())
        })?;
        Ok(())
    }

    /// Load from file, `None` when absent or unreadable
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        let data = fs::read(path).await?;
        match serde_json::from_slice(&data) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!("Ignoring unreadable resume manifest {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

/// Persisted per-piece status, rewritten one byte at a time
#[derive(Debug)]
pub struct ResumeRecord {
    path: PathBuf,
    file: File,
}

impl ResumeRecord {
    /// Create a fresh all-pending record
    pub async fn create(path: &Path, piece_count: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| {
                error!("Failed to create resume record {}: {}", path.display(), e);
                ShareError::storage_error_full("Failed to create resume record", path.display().to_string(), e.to_string())
            })?;

        file.write_all(&vec![PieceStatus::Pending.as_byte(); piece_count]).await?;
        file.flush().await?;

        Ok(Self { path: path.to_path_buf(), file })
    }

    /// Open an existing record and decode its statuses
    pub async fn open(path: &Path, piece_count: usize) -> Result<(Self, Vec<PieceStatus>)> {
        let bytes = fs::read(path).await.map_err(|e| {
            ShareError::storage_error_full("Failed to read resume record", path.display().to_string(), e.to_string())
        })?;

        if bytes.len() != piece_count {
            return Err(ShareError::storage_error_with_path(
                format!("Resume record holds {} entries, expected {}", bytes.len(), piece_count),
                path.display().to_string(),
            )
            .into());
        }

        let statuses = bytes
            .into_iter()
            .map(PieceStatus::from_byte)
            .collect::<Result<Vec<_>, _>>()?;

        let file = OpenOptions::new().write(true).open(path).await?;
        Ok((Self { path: path.to_path_buf(), file }, statuses))
    }

    /// Persist the status of one piece
    pub async fn write_status(&mut self, index: usize, status: PieceStatus) -> Result<()> {
        self.file.seek(SeekFrom::Start(index as u64)).await?;
        self.file.write_all(&[status.as_byte()]).await.map_err(|e| {
            error!("Failed to persist status of piece {}: {}", index, e);
            ShareError::storage_error_full("Failed to update resume record", self.path.display().to_string(), e.to_string())
        })?;
        self.file.flush().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load the record for `dest` if its manifest matches, otherwise start fresh
///
/// Returns the open record, the starting statuses and whether an earlier
/// run was resumed.
pub async fn prepare(dest: &Path, manifest: &ResumeManifest) -> Result<(ResumeRecord, Vec<PieceStatus>, bool)> {
    let record = record_path(dest);
    let manifest_file = manifest_path(dest);

    if let Some(stored) = ResumeManifest::load(&manifest_file).await? {
        if stored.same_content(manifest) && fs::try_exists(&record).await.unwrap_or(false) {
            match ResumeRecord::open(&record, manifest.piece_count).await {
                Ok((opened, statuses)) => {
                    let done = statuses.iter().filter(|s| **s == PieceStatus::Completed).count();
                    info!("Resuming {}: {}/{} pieces already completed", dest.display(), done, statuses.len());
                    return Ok((opened, statuses, true));
                }
                Err(e) => warn!("Discarding resume record {}: {}", record.display(), e),
            }
        } else {
            debug!("Resume manifest for {} describes other content, starting over", dest.display());
        }
    }

    manifest.save(&manifest_file).await?;
    let created = ResumeRecord::create(&record, manifest.piece_count).await?;
    Ok((created, vec![PieceStatus::Pending; manifest.piece_count], false))
}

/// Delete the record and manifest for `dest`
pub async fn remove(dest: &Path) -> Result<()> {
    for path in [record_path(dest), manifest_path(dest)] {
        match fs::remove_file(&path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ShareError::storage_error_full("Failed to remove resume data", path.display().to_string(), e.to_string()).into())
            }
        }
    }
    Ok(())
}
