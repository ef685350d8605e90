//! Tracker module
//!
//! Authoritative registry of users, groups and advertised files, and the
//! server that exposes it to peers.

pub mod file_meta;
pub mod group;
pub mod handler;
pub mod registry;
pub mod server;
pub mod user;

// Re-export main types
pub use file_meta::FileMeta;
pub use group::{Group, OwnerChange};
pub use handler::{command_table, handle_line, Handler, Session};
pub use registry::{Registry, Tables};
pub use server::TrackerServer;
pub use user::User;
