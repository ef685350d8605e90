//! CLI configuration module
//!
//! Turns parsed arguments and the tracker info file into validated
//! tracker and peer configurations.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::ShareError;
use crate::peer::downloader::EngineConfig;
use crate::peer::node::NodeConfig;

/// Tracker endpoint read from the tracker info file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerInfo {
    pub ip: String,
    pub port: u16,
}

impl TrackerInfo {
    /// Parse the first two whitespace-separated tokens as `<ip> <port>`
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let (ip, port) = match (tokens.next(), tokens.next()) {
            (Some(ip), Some(port)) => (ip, port),
            _ => return Err(ShareError::argument_error("Tracker info must contain <ip> <port>").into()),
        };
        let port = port
            .parse()
            .map_err(|_| ShareError::argument_error_with_field(format!("Invalid tracker port: {}", port), "port"))?;
        Ok(Self { ip: ip.to_string(), port })
    }

    /// Read and parse a tracker info file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ShareError::storage_error_full("Failed to read tracker info", path.display().to_string(), e.to_string()))?;
        let info = Self::parse(&text).with_context(|| format!("Invalid tracker info file {}", path.display()))?;
        debug!("Tracker info from {}: {}", path.display(), info.addr());
        Ok(info)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Configuration for the tracker process
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub bind_addr: SocketAddr,
    pub idle_timeout: Option<Duration>,
}

impl TrackerConfig {
    /// Create configuration from CLI arguments
    pub fn from_args(info: &TrackerInfo, idle_timeout_secs: u64) -> Result<Self> {
        let bind_addr: SocketAddr = info.addr().parse()?;
        let idle_timeout = (idle_timeout_secs > 0).then(|| Duration::from_secs(idle_timeout_secs));
        Ok(Self { bind_addr, idle_timeout })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.port() == 0 {
            return Err(anyhow::anyhow!("Tracker port cannot be 0"));
        }
        Ok(())
    }
}

/// Configuration for a peer process
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub listen_addr: SocketAddr,
    pub tracker_addr: String,
    pub server_workers: usize,
    pub retry_rounds: usize,
    pub timeout: Duration,
}

impl PeerConfig {
    /// Create configuration from CLI arguments
    pub fn from_args(listen: &str, info: &TrackerInfo, server_workers: usize, retry_rounds: usize, timeout_secs: u64) -> Result<Self> {
        let listen_addr: SocketAddr = listen.parse().context("Listen address must be ip:port")?;
        Ok(Self {
            listen_addr,
            tracker_addr: info.addr(),
            server_workers,
            retry_rounds,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.port() == 0 {
            return Err(anyhow::anyhow!("Listen port cannot be 0"));
        }
        if self.listen_addr.ip().is_unspecified() {
            return Err(anyhow::anyhow!("Listen address must be reachable by other peers, not {}", self.listen_addr.ip()));
        }
        if self.server_workers == 0 {
            return Err(anyhow::anyhow!("server_workers must be at least 1"));
        }
        if self.retry_rounds == 0 {
            return Err(anyhow::anyhow!("retry_rounds must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(anyhow::anyhow!("timeout must be at least 1 second"));
        }
        Ok(())
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen_addr: self.listen_addr,
            tracker_addr: self.tracker_addr.clone(),
            server_workers: self.server_workers,
            engine: EngineConfig {
                retry_rounds: self.retry_rounds,
                connect_timeout: self.timeout,
                io_timeout: self.timeout,
            },
        }
    }
}
