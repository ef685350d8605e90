//! Download engine
//!
//! Fetches every missing piece of a file from a set of seeders using a
//! bounded worker pool over a shared queue of piece indices. Each piece is
//! verified against its digest before it is written at its absolute offset,
//! and every status change is persisted so an interrupted download resumes
//! where it stopped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::ShareError;
use crate::peer::queue::JobQueue;
use crate::peer::server::fetch_line;
use crate::protocol::{wire, DownloadListing, PeerEndpoint};
use crate::storage::download::{DownloadPhase, DownloadRegistry, DownloadState};
use crate::storage::hash::{digest_hex, file_digest};
use crate::storage::piece::{piece_count, piece_length, piece_offset, PieceStatus};
use crate::storage::resume::{self, ResumeManifest};
use crate::storage::file;

/// Default number of passes over the peer list per piece
pub const DEFAULT_RETRY_ROUNDS: usize = 5;

/// Default connect and I/O timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker limits
const MAX_WORKERS: usize = 8;
const MAX_WORKERS_LARGE: usize = 4;
const LARGE_FILE_PIECES: usize = 1000;

/// Download engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry_rounds: usize,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_rounds: DEFAULT_RETRY_ROUNDS,
            connect_timeout: DEFAULT_TIMEOUT,
            io_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// How a download ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every piece and the whole file verified
    Completed,
    /// Some pieces could not be fetched; the resume record is kept
    Incomplete { failed: Vec<usize> },
    /// Stopped on request with pieces still missing
    Cancelled { remaining: usize },
    /// All pieces verified but the whole-file digest did not match
    Corrupted { expected: String, actual: String },
}

impl DownloadOutcome {
    pub fn phase(&self) -> DownloadPhase {
        match self {
            DownloadOutcome::Completed => DownloadPhase::Completed,
            DownloadOutcome::Incomplete { .. } => DownloadPhase::Incomplete,
            DownloadOutcome::Cancelled { .. } => DownloadPhase::Cancelled,
            DownloadOutcome::Corrupted { .. } => DownloadPhase::Corrupted,
        }
    }
}

/// Result of one attempt to fetch a piece from one peer
#[derive(Debug)]
enum AttemptOutcome {
    Verified(Vec<u8>),
    Transient(ShareError),
    Corrupt(ShareError),
}

/// Hook invoked when a download verifies, so the file is served onwards
#[async_trait]
pub trait SeedAnnouncer: Send + Sync {
    async fn announce_seeder(&self, group: &str, name: &str, path: &Path) -> Result<()>;
}

/// Number of workers for a download
pub fn worker_count(peers: usize, pieces: usize, queued: usize) -> usize {
    let cap = if pieces > LARGE_FILE_PIECES { MAX_WORKERS_LARGE } else { MAX_WORKERS };
    peers.min(cap).min(queued).max(1)
}

/// Reject names that would escape the destination directory
fn validate_name(name: &str) -> Result<(), ShareError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(ShareError::argument_error_with_field(format!("Invalid file name: {}", name), "filename"));
    }
    Ok(())
}

/// Everything a worker needs, shared across the pool
struct PieceJob {
    state: Arc<DownloadState>,
    peers: Vec<PeerEndpoint>,
    queue: JobQueue<usize>,
    config: EngineConfig,
}

/// Drives downloads and records them in the registry
pub struct DownloadEngine {
    config: EngineConfig,
    registry: Arc<DownloadRegistry>,
    announcer: Arc<dyn SeedAnnouncer>,
}

impl DownloadEngine {
    pub fn new(config: EngineConfig, registry: Arc<DownloadRegistry>, announcer: Arc<dyn SeedAnnouncer>) -> Self {
        Self { config, registry, announcer }
    }

    pub fn registry(&self) -> &Arc<DownloadRegistry> {
        &self.registry
    }

    /// Validate a download and register it, without touching the disk
    pub async fn prepare(&self, group: &str, listing: &DownloadListing, dest_dir: &Path) -> Result<Arc<DownloadState>> {
        validate_name(&listing.name)?;
        if listing.peers.is_empty() {
            return Err(ShareError::network_error(format!("No peers are sharing {}", listing.name)).into());
        }
        if listing.piece_hashes.len() != piece_count(listing.size) {
            return Err(ShareError::argument_error_with_field(
                format!("{} lists {} hashes for {} pieces", listing.name, listing.piece_hashes.len(), piece_count(listing.size)),
                "piece_hashes",
            )
            .into());
        }

        let state = Arc::new(DownloadState::new(
            listing.name.clone(),
            group,
            destination(dest_dir, &listing.name),
            listing.size,
            listing.full_hash.clone(),
            listing.piece_hashes.clone(),
        ));
        self.registry.register(state.clone()).await?;
        Ok(state)
    }

    /// Run a registered download to its end
    pub async fn run(&self, state: Arc<DownloadState>, peers: Vec<PeerEndpoint>) -> Result<DownloadOutcome> {
        match self.run_inner(&state, peers).await {
            Ok(outcome) => {
                state.finish(outcome.phase());
                Ok(outcome)
            }
            Err(e) => {
                error!("Download of {} failed: {}", state.filename, e);
                state.detach_record().await;
                state.finish(DownloadPhase::Failed);
                Err(e)
            }
        }
    }

    /// Prepare and run a download
    pub async fn download(&self, group: &str, listing: DownloadListing, dest_dir: &Path) -> Result<DownloadOutcome> {
        let state = self.prepare(group, &listing, dest_dir).await?;
        self.run(state, listing.peers).await
    }

    async fn run_inner(&self, state: &Arc<DownloadState>, peers: Vec<PeerEndpoint>) -> Result<DownloadOutcome> {
        let dest = state.dest.clone();
        file::preallocate(&dest, state.size).await?;

        let manifest = ResumeManifest {
            group: state.group.clone(),
            filename: state.filename.clone(),
            size: state.size,
            full_hash: state.full_hash.clone(),
            piece_count: state.piece_count(),
        };
        let (record, statuses, _resumed) = resume::prepare(&dest, &manifest).await?;
        state.attach_record(statuses, record).await?;

        let queued = state.remaining_indices().await;
        let workers = worker_count(peers.len(), state.piece_count(), queued.len());
        info!(
            "Downloading {} ({} bytes): {} of {} pieces to fetch from {} peers with {} workers",
            state.filename,
            state.size,
            queued.len(),
            state.piece_count(),
            peers.len(),
            workers
        );

        let job = Arc::new(PieceJob {
            state: state.clone(),
            peers,
            queue: JobQueue::sealed(queued),
            config: self.config.clone(),
        });

        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                let job = job.clone();
                tokio::spawn(async move { piece_worker(job, worker_id).await })
            })
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Download worker panicked: {}", e);
            }
        }

        self.conclude(state, &dest).await
    }

    async fn conclude(&self, state: &Arc<DownloadState>, dest: &Path) -> Result<DownloadOutcome> {
        let remaining = state.remaining_indices().await;

        if !remaining.is_empty() {
            state.detach_record().await;
            if state.cancel_token().is_cancelled() {
                info!("Download of {} cancelled with {} pieces remaining", state.filename, remaining.len());
                return Ok(DownloadOutcome::Cancelled { remaining: remaining.len() });
            }
            warn!("Download of {} incomplete: {} pieces failed", state.filename, remaining.len());
            return Ok(DownloadOutcome::Incomplete { failed: remaining });
        }

        let actual = file_digest(dest).await?;
        state.detach_record().await;
        if actual != state.full_hash {
            error!("Whole-file digest mismatch for {}: expected {}, got {}", state.filename, state.full_hash, actual);
            return Ok(DownloadOutcome::Corrupted { expected: state.full_hash.clone(), actual });
        }

        if let Err(e) = self.announcer.announce_seeder(&state.group, &state.filename, dest).await {
            warn!("Failed to announce {} as seeded: {}", state.filename, e);
        }
        resume::remove(dest).await?;
        info!("Download of {} completed and verified", state.filename);
        Ok(DownloadOutcome::Completed)
    }
}

async fn piece_worker(job: Arc<PieceJob>, worker_id: usize) {
    let state = &job.state;
    let cancel = state.cancel_token().clone();
    let total = state.piece_count();
    let milestone = (total / 10).max(1);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(index) = job.queue.pop().await else {
            break;
        };

        if let Err(e) = state.set_status(index, PieceStatus::Downloading).await {
            error!("Worker {} could not claim piece {}: {}", worker_id, index, e);
            continue;
        }

        // An attempt already under way runs to its end; it is bounded by the I/O timeout
        let status = match fetch_piece(&job, worker_id, index).await {
            Some(data) => match file::write_at(state.dest(), piece_offset(index), &data).await {
                Ok(()) => PieceStatus::Completed,
                Err(e) => {
                    error!("Failed to write piece {} of {}: {}", index, state.filename, e);
                    PieceStatus::Failed
                }
            },
            // Left as downloading, which a resume fetches again
            None if cancel.is_cancelled() => break,
            None => {
                warn!("Piece {} of {} failed after {} rounds", index, state.filename, job.config.retry_rounds);
                PieceStatus::Failed
            }
        };

        if let Err(e) = state.set_status(index, status).await {
            error!("Failed to record status of piece {}: {}", index, e);
            continue;
        }

        if status == PieceStatus::Completed {
            let done = state.completed().await;
            debug!("Piece {} of {} done ({}/{})", index, state.filename, done, total);
            if total > 100 && done % milestone == 0 {
                info!("{}: {}% complete", state.filename, done * 100 / total);
            }
        }
    }
}

/// Try every peer, starting at this worker's offset, for up to the configured
/// rounds. Cancellation is checked between attempts, never during one.
async fn fetch_piece(job: &PieceJob, worker_id: usize, index: usize) -> Option<Vec<u8>> {
    let peers = &job.peers;
    if peers.is_empty() {
        return None;
    }
    let expected_len = piece_length(job.state.size, index);
    let expected_hash = job.state.piece_hashes.get(index)?;
    let cancel = job.state.cancel_token();

    for round in 0..job.config.retry_rounds {
        for k in 0..peers.len() {
            if cancel.is_cancelled() {
                return None;
            }
            let peer = &peers[(worker_id + k) % peers.len()];
            match attempt(peer, &job.state.filename, index, expected_len, expected_hash, &job.config).await {
                AttemptOutcome::Verified(data) => {
                    debug!("Piece {} verified from {} ({})", index, peer.id, peer.socket_addr());
                    return Some(data);
                }
                AttemptOutcome::Transient(e) => {
                    debug!("Piece {} from {} round {}: {}", index, peer.socket_addr(), round + 1, e);
                }
                AttemptOutcome::Corrupt(e) => {
                    warn!("Piece {} from {} rejected: {}", index, peer.socket_addr(), e);
                }
            }
        }
    }
    None
}

async fn attempt(
    peer: &PeerEndpoint,
    name: &str,
    index: usize,
    expected_len: usize,
    expected_hash: &str,
    config: &EngineConfig,
) -> AttemptOutcome {
    let addr = peer.socket_addr();
    let transient = |message: &str, source: String| {
        AttemptOutcome::Transient(ShareError::network_error_full(message, addr.as_str(), source))
    };

    let mut stream = match timeout(config.connect_timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return transient("Failed to connect", e.to_string()),
        Err(e) => return transient("Connection timeout", e.to_string()),
    };

    match timeout(config.io_timeout, wire::write_line(&mut stream, &fetch_line(name, index))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return transient("Failed to send request", e.to_string()),
        Err(e) => return transient("Request timeout", e.to_string()),
    }

    let length = match timeout(config.io_timeout, wire::read_frame_len(&mut stream)).await {
        Ok(Ok(length)) => length,
        Ok(Err(e)) => return transient("No response", e.to_string()),
        Err(e) => return transient("Response timeout", e.to_string()),
    };
    if length != expected_len {
        return AttemptOutcome::Corrupt(ShareError::integrity_mismatch(
            format!("piece {} length mismatch", index),
            expected_len.to_string(),
            length.to_string(),
        ));
    }

    let mut data = vec![0u8; length];
    match timeout(config.io_timeout, stream.read_exact(&mut data)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return transient("Truncated piece", e.to_string()),
        Err(e) => return transient("Piece read timeout", e.to_string()),
    }

    let actual = digest_hex(&data);
    if actual != expected_hash {
        return AttemptOutcome::Corrupt(ShareError::integrity_mismatch(
            format!("piece {} digest mismatch", index),
            expected_hash,
            actual,
        ));
    }
    AttemptOutcome::Verified(data)
}

/// Destination path a download of `name` into `dest_dir` writes to
pub fn destination(dest_dir: &Path, name: &str) -> PathBuf {
    dest_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::server::PieceServer;
    use crate::storage::file::SharedFiles;
    use crate::storage::hash::hash_file;
    use crate::storage::piece::PIECE_SIZE;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAnnouncer {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SeedAnnouncer for RecordingAnnouncer {
        async fn announce_seeder(&self, _group: &str, name: &str, _path: &Path) -> Result<()> {
            self.seen.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn quick_config() -> EngineConfig {
        EngineConfig {
            retry_rounds: 2,
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(5),
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    async fn seeder(dir: &Path, name: &str, data: &[u8]) -> (crate::peer::server::PieceServerHandle, PeerEndpoint) {
        let path = dir.join(name);
        tokio::fs::write(&path, data).await.unwrap();
        let shared = Arc::new(SharedFiles::new());
        shared.add(name, path).await;
        let server = PieceServer::bind("127.0.0.1:0".parse().unwrap(), shared, 2, Duration::from_secs(5))
            .await
            .unwrap()
            .start()
            .unwrap();
        let endpoint = PeerEndpoint::new(format!("seed{}", server.local_addr().port()), "127.0.0.1", server.local_addr().port());
        (server, endpoint)
    }

    async fn listing_for(path: &Path, name: &str, peers: Vec<PeerEndpoint>) -> DownloadListing {
        let digests = hash_file(path).await.unwrap();
        DownloadListing {
            name: name.to_string(),
            size: digests.size,
            full_hash: digests.full_hash,
            piece_hashes: digests.piece_hashes,
            peers,
        }
    }

    fn engine(announcer: Arc<RecordingAnnouncer>) -> DownloadEngine {
        DownloadEngine::new(quick_config(), Arc::new(DownloadRegistry::new()), announcer)
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(3, 10, 10), 3);
        assert_eq!(worker_count(20, 10, 10), 8);
        assert_eq!(worker_count(20, 2000, 2000), 4);
        assert_eq!(worker_count(20, 10, 2), 2);
        assert_eq!(worker_count(5, 10, 0), 1);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("data.bin").is_ok());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("").is_err());
    }

    #[tokio::test]
    async fn test_no_peers_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        tokio::fs::write(&src, b"hello").await.unwrap();
        let listing = listing_for(&src, "src.bin", vec![]).await;

        let err = engine(Arc::default()).download("G1", listing, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err.downcast::<ShareError>().unwrap(), ShareError::NetworkError { .. }));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_download_from_seeder() {
        let seed_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let data = sample(PIECE_SIZE * 2 + 1234);
        let (server, endpoint) = seeder(seed_dir.path(), "data.bin", &data).await;
        let listing = listing_for(&seed_dir.path().join("data.bin"), "data.bin", vec![endpoint]).await;

        let announcer = Arc::new(RecordingAnnouncer::default());
        let outcome = engine(announcer.clone()).download("G1", listing, out_dir.path()).await.unwrap();

        assert_eq!(outcome, DownloadOutcome::Completed);
        let dest = out_dir.path().join("data.bin");
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        assert!(!resume::record_path(&dest).exists());
        assert!(!resume::manifest_path(&dest).exists());
        assert_eq!(*announcer.seen.lock().unwrap(), vec!["data.bin".to_string()]);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_seeder_is_skipped() {
        let good_dir = tempfile::tempdir().unwrap();
        let bad_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let data = sample(PIECE_SIZE + 500);
        let mut corrupt = data.clone();
        corrupt[10] ^= 0xff;
        corrupt[PIECE_SIZE + 10] ^= 0xff;

        let (good, good_peer) = seeder(good_dir.path(), "data.bin", &data).await;
        let (bad, bad_peer) = seeder(bad_dir.path(), "data.bin", &corrupt).await;
        let listing = listing_for(&good_dir.path().join("data.bin"), "data.bin", vec![bad_peer, good_peer]).await;

        let outcome = engine(Arc::default()).download("G1", listing, out_dir.path()).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Completed);
        assert_eq!(tokio::fs::read(out_dir.path().join("data.bin")).await.unwrap(), data);

        good.shutdown().await;
        bad.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_peer_leaves_incomplete_record() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("data.bin");
        tokio::fs::write(&src, sample(1000)).await.unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let listing = listing_for(&src, "data.bin", vec![PeerEndpoint::new("gone", "127.0.0.1", port)]).await;

        let outcome = engine(Arc::default()).download("G1", listing, out_dir.path()).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Incomplete { failed: vec![0] });

        let record = tokio::fs::read(resume::record_path(&out_dir.path().join("data.bin"))).await.unwrap();
        assert_eq!(record, vec![PieceStatus::Failed.as_byte()]);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_pieces() {
        let seed_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let data = sample(PIECE_SIZE * 2 + 7);
        let src = seed_dir.path().join("data.bin");
        tokio::fs::write(&src, &data).await.unwrap();
        let listing = listing_for(&src, "data.bin", vec![]).await;

        // An earlier run completed piece 0 and was interrupted during piece 1
        let dest = out_dir.path().join("data.bin");
        file::preallocate(&dest, data.len() as u64).await.unwrap();
        file::write_at(&dest, 0, &data[..PIECE_SIZE]).await.unwrap();
        let manifest = ResumeManifest {
            group: "G1".to_string(),
            filename: "data.bin".to_string(),
            size: listing.size,
            full_hash: listing.full_hash.clone(),
            piece_count: 3,
        };
        let (mut record, _, _) = resume::prepare(&dest, &manifest).await.unwrap();
        record.write_status(0, PieceStatus::Completed).await.unwrap();
        record.write_status(1, PieceStatus::Downloading).await.unwrap();
        drop(record);

        // The seeder only holds a file whose first piece is wrong, so a
        // re-fetch of piece 0 would fail verification
        let mut seeded = data.clone();
        seeded[0] ^= 0xff;
        let (server, endpoint) = seeder(seed_dir.path(), "data.bin", &seeded).await;
        let mut listing = listing;
        listing.peers = vec![endpoint];

        let outcome = engine(Arc::default()).download("G1", listing, out_dir.path()).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Completed);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let seed_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let data = sample(PIECE_SIZE * 3);
        let (server, endpoint) = seeder(seed_dir.path(), "data.bin", &data).await;
        let listing = listing_for(&seed_dir.path().join("data.bin"), "data.bin", vec![endpoint]).await;

        let engine = engine(Arc::default());
        let state = engine.prepare("G1", &listing, out_dir.path()).await.unwrap();
        state.cancel();
        let outcome = engine.run(state.clone(), listing.peers.clone()).await.unwrap();

        assert_eq!(outcome, DownloadOutcome::Cancelled { remaining: 3 });
        assert_eq!(state.phase(), DownloadPhase::Cancelled);
        assert!(resume::record_path(&out_dir.path().join("data.bin")).exists());

        server.shutdown().await;
    }

    /// Serves pieces of `data` from memory, answering each request after `delay`
    async fn slow_seeder(data: Vec<u8>, delay: Duration) -> PeerEndpoint {
        use tokio::io::BufReader;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let data = Arc::new(data);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let data = data.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.split();
                    let mut reader = BufReader::new(read_half);
                    let line = wire::read_line(&mut reader).await.unwrap().unwrap().into_text().unwrap();
                    let index: usize = line.split_whitespace().nth(2).unwrap().parse().unwrap();
                    tokio::time::sleep(delay).await;

                    let start = piece_offset(index) as usize;
                    let end = (start + PIECE_SIZE).min(data.len());
                    let _ = wire::write_frame(&mut write_half, &data[start..end]).await;
                });
            }
        });
        PeerEndpoint::new("slow", "127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_piece_finish() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let data = sample(PIECE_SIZE + 100);
        let src = src_dir.path().join("data.bin");
        tokio::fs::write(&src, &data).await.unwrap();

        let peer = slow_seeder(data.clone(), Duration::from_millis(600)).await;
        let listing = listing_for(&src, "data.bin", vec![peer]).await;

        let engine = Arc::new(engine(Arc::default()));
        let state = engine.prepare("G1", &listing, out_dir.path()).await.unwrap();
        let task = {
            let engine = engine.clone();
            let state = state.clone();
            let peers = listing.peers.clone();
            tokio::spawn(async move { engine.run(state, peers).await })
        };

        // One peer means one worker, which is mid-way through piece 0
        tokio::time::sleep(Duration::from_millis(200)).await;
        state.cancel();
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(outcome, DownloadOutcome::Cancelled { remaining: 1 });
        let dest = out_dir.path().join("data.bin");
        let record = tokio::fs::read(resume::record_path(&dest)).await.unwrap();
        assert_eq!(record, vec![PieceStatus::Completed.as_byte(), PieceStatus::Pending.as_byte()]);
        assert_eq!(tokio::fs::read(&dest).await.unwrap()[..PIECE_SIZE], data[..PIECE_SIZE]);
    }

    #[tokio::test]
    async fn test_cancel_during_last_piece_still_completes() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let data = sample(1000);
        let src = src_dir.path().join("data.bin");
        tokio::fs::write(&src, &data).await.unwrap();

        let peer = slow_seeder(data.clone(), Duration::from_millis(600)).await;
        let listing = listing_for(&src, "data.bin", vec![peer]).await;

        let announcer = Arc::new(RecordingAnnouncer::default());
        let engine = Arc::new(engine(announcer.clone()));
        let state = engine.prepare("G1", &listing, out_dir.path()).await.unwrap();
        let task = {
            let engine = engine.clone();
            let state = state.clone();
            let peers = listing.peers.clone();
            tokio::spawn(async move { engine.run(state, peers).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        state.cancel();

        assert_eq!(task.await.unwrap().unwrap(), DownloadOutcome::Completed);
        assert_eq!(tokio::fs::read(out_dir.path().join("data.bin")).await.unwrap(), data);
        assert_eq!(announcer.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_whole_file_mismatch_is_corrupted() {
        let seed_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let data = sample(PIECE_SIZE + 300);
        let (server, endpoint) = seeder(seed_dir.path(), "data.bin", &data).await;
        let mut listing = listing_for(&seed_dir.path().join("data.bin"), "data.bin", vec![endpoint]).await;
        let wrong = digest_hex(b"some other file");
        listing.full_hash = wrong.clone();

        let announcer = Arc::new(RecordingAnnouncer::default());
        let outcome = engine(announcer.clone()).download("G1", listing, out_dir.path()).await.unwrap();

        let dest = out_dir.path().join("data.bin");
        assert_eq!(
            outcome,
            DownloadOutcome::Corrupted { expected: wrong, actual: digest_hex(&data) }
        );
        assert!(resume::record_path(&dest).exists());
        assert!(resume::manifest_path(&dest).exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        assert!(announcer.seen.lock().unwrap().is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_download_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("data.bin");
        tokio::fs::write(&src, b"hello").await.unwrap();
        let listing = listing_for(&src, "data.bin", vec![PeerEndpoint::new("p", "127.0.0.1", 1)]).await;

        let engine = engine(Arc::default());
        engine.prepare("G1", &listing, dir.path()).await.unwrap();
        assert!(engine.prepare("G1", &listing, dir.path()).await.is_err());
    }
}
