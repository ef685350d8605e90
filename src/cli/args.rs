//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::peer::downloader::DEFAULT_RETRY_ROUNDS;
use crate::peer::server::DEFAULT_SERVER_WORKERS;

/// CLI arguments for the group share network
#[derive(Debug, Parser)]
#[command(name = "rust-group-share")]
#[command(about = "Group-based peer-to-peer file sharing: tracker and peer node", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Which role this process plays
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the tracker
    Tracker {
        /// File whose first two tokens are the tracker's `<ip> <port>`
        #[arg(value_name = "TRACKER_INFO")]
        tracker_info: PathBuf,

        /// Close sessions idle for this many seconds (0 = never)
        #[arg(long, default_value_t = 1800)]
        idle_timeout: u64,
    },

    /// Run a peer node with an interactive shell
    Peer {
        /// Address the piece server listens on and advertises, as ip:port
        #[arg(value_name = "LISTEN_ADDR")]
        listen: String,

        /// File whose first two tokens are the tracker's `<ip> <port>`
        #[arg(value_name = "TRACKER_INFO")]
        tracker_info: PathBuf,

        /// Number of piece server workers
        #[arg(long, default_value_t = DEFAULT_SERVER_WORKERS)]
        server_workers: usize,

        /// Passes over the peer list before a piece is marked failed
        #[arg(long, default_value_t = DEFAULT_RETRY_ROUNDS)]
        retry_rounds: usize,

        /// Connect and I/O timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
