//! Download state module
//!
//! Per-download piece ledger shared by the download workers, and the
//! registry of every download started by this peer.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ShareError;
use crate::storage::piece::{piece_count, PieceStatus};
use crate::storage::resume::ResumeRecord;

/// Number of pieces in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.downloading + self.completed + self.failed
    }
}

/// Where a download currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Running,
    Completed,
    Incomplete,
    Cancelled,
    Corrupted,
    Failed,
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadPhase::Running => "running",
            DownloadPhase::Completed => "completed",
            DownloadPhase::Incomplete => "incomplete",
            DownloadPhase::Cancelled => "cancelled",
            DownloadPhase::Corrupted => "corrupted",
            DownloadPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// In-memory piece statuses and the record that mirrors them
#[derive(Debug)]
struct PieceLedger {
    statuses: Vec<PieceStatus>,
    completed: usize,
    record: Option<ResumeRecord>,
}

/// State of one download
#[derive(Debug)]
pub struct DownloadState {
    pub filename: String,
    pub group: String,
    pub dest: PathBuf,
    pub size: u64,
    pub full_hash: String,
    pub piece_hashes: Vec<String>,
    active: AtomicBool,
    phase: std::sync::Mutex<DownloadPhase>,
    cancel: CancellationToken,
    ledger: Mutex<PieceLedger>,
}

impl DownloadState {
    /// Create a running download with every piece pending and no record yet
    pub fn new(
        filename: impl Into<String>,
        group: impl Into<String>,
        dest: PathBuf,
        size: u64,
        full_hash: impl Into<String>,
        piece_hashes: Vec<String>,
    ) -> Self {
        let count = piece_count(size);
        Self {
            filename: filename.into(),
            group: group.into(),
            dest,
            size,
            full_hash: full_hash.into(),
            piece_hashes,
            active: AtomicBool::new(true),
            phase: std::sync::Mutex::new(DownloadPhase::Running),
            cancel: CancellationToken::new(),
            ledger: Mutex::new(PieceLedger {
                statuses: vec![PieceStatus::Pending; count],
                completed: 0,
                record: None,
            }),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Adopt statuses loaded from (or freshly written to) a resume record
    pub async fn attach_record(&self, statuses: Vec<PieceStatus>, record: ResumeRecord) -> Result<()> {
        if statuses.len() != self.piece_count() {
            return Err(ShareError::storage_error(format!(
                "Resume record holds {} pieces, download has {}",
                statuses.len(),
                self.piece_count()
            ))
            .into());
        }
        let mut ledger = self.ledger.lock().await;
        ledger.completed = statuses.iter().filter(|s| **s == PieceStatus::Completed).count();
        ledger.statuses = statuses;
        ledger.record = Some(record);
        Ok(())
    }

    /// Release the record file handle
    pub async fn detach_record(&self) {
        self.ledger.lock().await.record = None;
    }

    /// Change the status of one piece and persist it
    pub async fn set_status(&self, index: usize, status: PieceStatus) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let previous = *ledger.statuses.get(index).ok_or_else(|| {
            ShareError::argument_error_with_field(format!("Piece index {} out of range", index), "index")
        })?;

        ledger.statuses[index] = status;
        if previous != PieceStatus::Completed && status == PieceStatus::Completed {
            ledger.completed += 1;
        } else if previous == PieceStatus::Completed && status != PieceStatus::Completed {
            ledger.completed -= 1;
        }

        if let Some(record) = ledger.record.as_mut() {
            record.write_status(index, status).await?;
        }
        trace!("{} piece {}: {} -> {}", self.filename, index, previous.label(), status.label());
        Ok(())
    }

    pub async fn status(&self, index: usize) -> Option<PieceStatus> {
        self.ledger.lock().await.statuses.get(index).copied()
    }

    /// Indices still to fetch, ascending
    pub async fn remaining_indices(&self) -> Vec<usize> {
        self.ledger
            .lock()
            .await
            .statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != PieceStatus::Completed)
            .map(|(i, _)| i)
            .collect()
    }

    pub async fn completed(&self) -> usize {
        self.ledger.lock().await.completed
    }

    pub async fn counts(&self) -> StatusCounts {
        let ledger = self.ledger.lock().await;
        let mut counts = StatusCounts::default();
        for status in &ledger.statuses {
            match status {
                PieceStatus::Pending => counts.pending += 1,
                PieceStatus::Downloading => counts.downloading += 1,
                PieceStatus::Completed => counts.completed += 1,
                PieceStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> DownloadPhase {
        self.phase.lock().map(|p| *p).unwrap_or(DownloadPhase::Failed)
    }

    /// Record the final phase and mark the download inactive
    pub fn finish(&self, phase: DownloadPhase) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
        self.active.store(false, Ordering::SeqCst);
        debug!("Download of {} finished: {}", self.filename, phase);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the workers to stop claiming pieces
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Every download started by this peer, by filename
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    downloads: RwLock<HashMap<String, Arc<DownloadState>>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new download, refusing a second active one for the same name
    pub async fn register(&self, state: Arc<DownloadState>) -> Result<()> {
        let mut downloads = self.downloads.write().await;
        if let Some(existing) = downloads.get(&state.filename) {
            if existing.is_active() {
                return Err(ShareError::argument_error_with_field(
                    format!("Download of {} is already in progress", state.filename),
                    "filename",
                )
                .into());
            }
        }
        downloads.insert(state.filename.clone(), state);
        Ok(())
    }

    pub async fn get(&self, filename: &str) -> Option<Arc<DownloadState>> {
        self.downloads.read().await.get(filename).cloned()
    }

    pub async fn is_active(&self, filename: &str) -> bool {
        self.get(filename).await.map(|d| d.is_active()).unwrap_or(false)
    }

    /// All downloads, sorted by filename
    pub async fn all(&self) -> Vec<Arc<DownloadState>> {
        let mut all: Vec<_> = self.downloads.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.filename.cmp(&b.filename));
        all
    }

    /// Cancel an active download
    pub async fn cancel(&self, filename: &str) -> Result<()> {
        match self.get(filename).await {
            Some(state) if state.is_active() => {
                state.cancel();
                Ok(())
            }
            Some(_) => Err(ShareError::argument_error(format!("Download of {} is not active", filename)).into()),
            None => Err(ShareError::not_found_with_entity(format!("No download named {}", filename), "download").into()),
        }
    }

    /// Cancel every active download
    pub async fn cancel_all(&self) {
        for state in self.downloads.read().await.values() {
            if state.is_active() {
                state.cancel();
            }
        }
    }
}
