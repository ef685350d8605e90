//! rust-group-share
//!
//! Group-based peer-to-peer file sharing: a tracker that keeps users,
//! groups and file metadata, and peer nodes that download verified pieces
//! from each other and resume interrupted transfers.

pub mod protocol;
pub mod peer;
pub mod tracker;
pub mod storage;
pub mod cli;
pub mod error;

pub use error::ShareError;

pub use protocol::{CommandSpec, CommandTable, DownloadListing, FileEntry, PeerEndpoint, TrackerRequest};
pub use peer::{
    DownloadEngine, DownloadOutcome, EngineConfig, JobQueue, NodeConfig, PeerNode,
    PieceServer, PieceServerHandle, SeedAnnouncer, TrackerClient,
};
pub use tracker::{Registry, Tables, TrackerServer};
pub use storage::{
    DownloadPhase, DownloadRegistry, DownloadState, FileDigests, PieceStatus,
    ResumeManifest, ResumeRecord, SharedFiles, StatusCounts, PIECE_SIZE,
};
pub use cli::{CliArgs, Command, PeerConfig, TrackerConfig, TrackerInfo};
