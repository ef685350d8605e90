//! Protocol module
//!
//! Command lines, response framing and the tracker's structured messages.

pub mod command;
pub mod tracker;
pub mod wire;

// Re-export main types
pub use command::{tokenize, CommandSpec, CommandTable, Resolved};
pub use tracker::{DownloadListing, FileEntry, PeerEndpoint, TrackerRequest};
pub use wire::{read_frame, read_line, read_text_frame, write_frame, write_line, RequestLine};
