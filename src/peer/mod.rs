//! Peer module
//!
//! The peer side of the network: tracker client, piece server, download
//! engine and the node tying them together.

pub mod client;
pub mod downloader;
pub mod node;
pub mod queue;
pub mod server;

// Re-export main types
pub use client::TrackerClient;
pub use downloader::{worker_count, DownloadEngine, DownloadOutcome, EngineConfig, SeedAnnouncer};
pub use node::{NodeConfig, PeerNode};
pub use queue::JobQueue;
pub use server::{PieceServer, PieceServerHandle};
