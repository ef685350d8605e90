//! CLI module
//!
//! Command-line interface for the tracker and the peer node.

pub mod args;
pub mod config;
pub mod progress;
pub mod shell;

pub use args::{CliArgs, Command};
pub use config::{PeerConfig, TrackerConfig, TrackerInfo};
pub use progress::{format_bytes, render_downloads, snapshot, DownloadRow};
pub use shell::{run_shell, ShellAction, ShellCommand};
