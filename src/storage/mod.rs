//! Storage module
//!
//! Handles digests, piece geometry, file storage, resume records and
//! download state.

pub mod hash;
pub mod piece;
pub mod file;
pub mod resume;
pub mod download;

// Re-export hash helpers
pub use hash::{digest_hex, file_digest, hash_file, is_digest, FileDigests, DIGEST_HEX_LEN};

// Re-export piece types
pub use piece::{piece_count, piece_length, piece_offset, PieceStatus, PIECE_SIZE};

// Re-export file storage types
pub use file::SharedFiles;

// Re-export resume types
pub use resume::{ResumeManifest, ResumeRecord};

// Re-export download types
pub use download::{DownloadPhase, DownloadRegistry, DownloadState, StatusCounts};
