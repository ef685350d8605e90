//! Peer node
//!
//! A peer is a tracker client, a piece server and a download engine at
//! once. The node owns all three and exposes the operations the shell
//! drives.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::ShareError;
use crate::peer::client::TrackerClient;
use crate::peer::downloader::{DownloadEngine, DownloadOutcome, EngineConfig, SeedAnnouncer};
use crate::peer::server::{PieceServer, PieceServerHandle};
use crate::protocol::{FileEntry, TrackerRequest};
use crate::storage::download::{DownloadRegistry, DownloadState};
use crate::storage::file::SharedFiles;
use crate::storage::hash::hash_file;

/// Settings for starting a node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub tracker_addr: String,
    pub server_workers: usize,
    pub engine: EngineConfig,
}

/// A login and the tracker session it was made on
#[derive(Debug, Clone)]
struct Login {
    name: String,
    session: u64,
}

/// The logged-in user, if the tracker session that logged in is still open
async fn active_user(login: &RwLock<Option<Login>>, tracker: &TrackerClient) -> Option<String> {
    login
        .read()
        .await
        .as_ref()
        .filter(|login| login.session == tracker.session())
        .map(|login| login.name.clone())
}

/// Shares a verified download onwards: locally and with the tracker
struct TrackerAnnouncer {
    tracker: Arc<TrackerClient>,
    shared: Arc<SharedFiles>,
    login: Arc<RwLock<Option<Login>>>,
}

#[async_trait]
impl SeedAnnouncer for TrackerAnnouncer {
    async fn announce_seeder(&self, group: &str, name: &str, path: &Path) -> Result<()> {
        let user = active_user(&self.login, &self.tracker)
            .await
            .ok_or_else(|| ShareError::authorization_error("Logged out before the download finished"))?;

        // Shared before the tracker can list this peer as a seeder
        let previous = self.shared.get(name).await;
        self.shared.add(name, path.to_path_buf()).await;
        if let Err(e) = self.tracker.file_downloaded(group, name, &user).await {
            warn!("Tracker did not register {} as seeder of {}: {}", user, name, e);
            match previous {
                Some(previous) => self.shared.add(name, previous).await,
                None => {
                    self.shared.remove(name).await;
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

/// A running peer
pub struct PeerNode {
    tracker: Arc<TrackerClient>,
    shared: Arc<SharedFiles>,
    downloads: Arc<DownloadRegistry>,
    engine: Arc<DownloadEngine>,
    server: PieceServerHandle,
    login: Arc<RwLock<Option<Login>>>,
}

impl PeerNode {
    /// Bind the piece server and connect to the tracker
    pub async fn start(config: NodeConfig) -> Result<Self> {
        let shared = Arc::new(SharedFiles::new());
        let server = PieceServer::bind(
            config.listen_addr,
            shared.clone(),
            config.server_workers,
            config.engine.io_timeout,
        )
        .await?
        .start()?;

        let tracker = Arc::new(TrackerClient::connect(&config.tracker_addr, config.engine.io_timeout).await?);
        let login = Arc::new(RwLock::new(None));
        let downloads = Arc::new(DownloadRegistry::new());
        let announcer = Arc::new(TrackerAnnouncer {
            tracker: tracker.clone(),
            shared: shared.clone(),
            login: login.clone(),
        });
        let engine = Arc::new(DownloadEngine::new(config.engine, downloads.clone(), announcer));

        Ok(Self {
            tracker,
            shared,
            downloads,
            engine,
            server,
            login,
        })
    }

    /// Address other peers fetch pieces from
    pub fn piece_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn downloads(&self) -> &Arc<DownloadRegistry> {
        &self.downloads
    }

    pub fn shared(&self) -> &Arc<SharedFiles> {
        &self.shared
    }

    pub async fn current_user(&self) -> Option<String> {
        active_user(&self.login, &self.tracker).await
    }

    async fn require_user(&self) -> Result<String> {
        self.current_user()
            .await
            .ok_or_else(|| ShareError::authorization_error("Login required").into())
    }

    /// Forward a raw command line to the tracker
    pub async fn raw(&self, line: &str) -> Result<String> {
        self.tracker.send_line(line).await
    }

    pub async fn create_user(&self, name: &str, pass: &str) -> Result<String> {
        self.tracker
            .request(&TrackerRequest::CreateUser { name: name.to_string(), pass: pass.to_string() })
            .await
    }

    /// Log in, advertising this node's piece server
    pub async fn login(&self, name: &str, pass: &str) -> Result<String> {
        if let Some(current) = self.current_user().await {
            return Err(ShareError::argument_error(format!("Already logged in as {}", current)).into());
        }

        let addr = self.piece_addr();
        let response = self
            .tracker
            .request(&TrackerRequest::Login {
                name: name.to_string(),
                pass: pass.to_string(),
                address: addr.ip().to_string(),
                port: addr.port(),
            })
            .await?;
        *self.login.write().await = Some(Login {
            name: name.to_string(),
            session: self.tracker.session(),
        });
        info!("Logged in as {}", name);
        Ok(response)
    }

    pub async fn logout(&self) -> Result<String> {
        let user = self.require_user().await?;
        let response = self.tracker.request(&TrackerRequest::Logout { name: user }).await?;
        *self.login.write().await = None;
        Ok(response)
    }

    pub async fn create_group(&self, group: &str) -> Result<String> {
        let owner = self.require_user().await?;
        self.tracker
            .request(&TrackerRequest::CreateGroup { group: group.to_string(), owner })
            .await
    }

    pub async fn join_group(&self, group: &str) -> Result<String> {
        let user = self.require_user().await?;
        self.tracker
            .request(&TrackerRequest::JoinGroup { group: group.to_string(), user })
            .await
    }

    pub async fn leave_group(&self, group: &str) -> Result<String> {
        let user = self.require_user().await?;
        self.tracker
            .request(&TrackerRequest::LeaveGroup { group: group.to_string(), user })
            .await
    }

    pub async fn list_requests(&self, group: &str) -> Result<String> {
        let requester = self.require_user().await?;
        self.tracker
            .request(&TrackerRequest::ListRequests { group: group.to_string(), requester })
            .await
    }

    pub async fn accept_request(&self, group: &str, applicant: &str) -> Result<String> {
        let requester = self.require_user().await?;
        self.tracker
            .request(&TrackerRequest::AcceptRequest {
                group: group.to_string(),
                applicant: applicant.to_string(),
                requester,
            })
            .await
    }

    pub async fn list_groups(&self) -> Result<String> {
        self.require_user().await?;
        self.tracker.request(&TrackerRequest::ListGroups).await
    }

    pub async fn list_files(&self, group: &str) -> Result<String> {
        let requester = self.require_user().await?;
        self.tracker
            .request(&TrackerRequest::ListFiles { group: group.to_string(), requester })
            .await
    }

    /// Parsed `list_files` entries; an empty group yields no entries
    pub async fn file_entries(&self, group: &str) -> Result<Vec<FileEntry>> {
        let response = self.list_files(group).await?;
        Ok(response.lines().filter_map(|line| FileEntry::parse(line).ok()).collect())
    }

    /// Hash a local file, register it with the tracker and start serving it
    pub async fn upload_file(&self, group: &str, path: &Path) -> Result<String> {
        let uploader = self.require_user().await?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ShareError::argument_error_with_field(format!("Not a file path: {}", path.display()), "path"))?
            .to_string();
        if name.split_whitespace().count() != 1 {
            return Err(ShareError::argument_error_with_field(format!("File names cannot contain whitespace: {}", name), "path").into());
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ShareError::storage_error_full("Cannot read file", path.display().to_string(), e.to_string())
        })?;
        if !metadata.is_file() {
            return Err(ShareError::argument_error_with_field(format!("{} is not a regular file", path.display()), "path").into());
        }
        if metadata.len() == 0 {
            return Err(ShareError::argument_error_with_field(format!("{} is empty", path.display()), "path").into());
        }

        let digests = hash_file(path).await?;
        info!("Uploading {} to {} ({} pieces)", name, group, digests.piece_hashes.len());
        let response = self
            .tracker
            .request(&TrackerRequest::Upload {
                group: group.to_string(),
                name: name.clone(),
                uploader,
                size: digests.size,
                full_hash: digests.full_hash,
                piece_hashes: digests.piece_hashes,
            })
            .await?;

        let absolute = tokio::fs::canonicalize(path).await.unwrap_or_else(|_| path.to_path_buf());
        self.shared.add(name, absolute).await;
        Ok(response)
    }

    /// Query the tracker and start a download in the background
    pub async fn start_download(
        &self,
        group: &str,
        name: &str,
        dest_dir: &Path,
    ) -> Result<(Arc<DownloadState>, JoinHandle<Result<DownloadOutcome>>)> {
        let user = self.require_user().await?;
        if self.downloads.is_active(name).await {
            return Err(ShareError::argument_error(format!("Download of {} is already in progress", name)).into());
        }

        let mut listing = self.tracker.download_listing(group, name, &user).await?;
        listing.peers.retain(|peer| peer.id != user);

        let state = self.engine.prepare(group, &listing, dest_dir).await?;
        let engine = self.engine.clone();
        let peers = listing.peers;
        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            let outcome = engine.run(task_state.clone(), peers).await;
            match &outcome {
                Ok(DownloadOutcome::Completed) => info!("{} downloaded to {}", task_state.filename, task_state.dest.display()),
                Ok(other) => warn!("{} did not complete: {:?}", task_state.filename, other),
                Err(e) => error!("{} failed: {}", task_state.filename, e),
            }
            outcome
        });
        Ok((state, handle))
    }

    /// Download a file and wait for the result
    pub async fn download_file(&self, group: &str, name: &str, dest_dir: &Path) -> Result<DownloadOutcome> {
        let (_, handle) = self.start_download(group, name, dest_dir).await?;
        handle
            .await
            .map_err(|e| ShareError::storage_error(format!("Download task ended abnormally: {}", e)))?
    }

    pub async fn cancel_download(&self, name: &str) -> Result<String> {
        self.downloads.cancel(name).await?;
        Ok(format!("Cancelling download of {}", name))
    }

    /// Stop seeding a file in a group
    pub async fn stop_share(&self, group: &str, name: &str) -> Result<String> {
        let peer = self.require_user().await?;
        let response = self
            .tracker
            .request(&TrackerRequest::StopShare {
                group: group.to_string(),
                name: name.to_string(),
                peer,
            })
            .await?;
        self.shared.remove(name).await;
        Ok(response)
    }

    /// Local path of a shared file
    pub async fn shared_path(&self, name: &str) -> Option<PathBuf> {
        self.shared.get(name).await
    }

    /// Cancel downloads, log out and stop the piece server
    pub async fn shutdown(self) {
        self.downloads.cancel_all().await;
        if self.current_user().await.is_some() {
            if let Err(e) = self.logout().await {
                warn!("Failed to log out during shutdown: {}", e);
            }
        }
        self.server.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerServer;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn tracker() -> (Arc<TrackerClient>, CancellationToken) {
        let server = TrackerServer::bind("127.0.0.1:0".parse().unwrap(), None).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));
        let client = TrackerClient::connect(&addr, Duration::from_secs(5)).await.unwrap();
        (Arc::new(client), shutdown)
    }

    #[tokio::test]
    async fn test_rejected_announce_rolls_back_local_share() {
        let (client, shutdown) = tracker().await;
        client.send_line("create_user alice pw").await.unwrap();
        client.send_line("login alice pw 127.0.0.1 7001").await.unwrap();

        let shared = Arc::new(SharedFiles::new());
        shared.add("old.bin", PathBuf::from("/tmp/old.bin")).await;
        let announcer = TrackerAnnouncer {
            tracker: client.clone(),
            shared: shared.clone(),
            login: Arc::new(RwLock::new(Some(Login { name: "alice".into(), session: client.session() }))),
        };

        // No group G1, so the tracker refuses the seeder
        assert!(announcer.announce_seeder("G1", "data.bin", Path::new("/tmp/data.bin")).await.is_err());
        assert!(shared.get("data.bin").await.is_none());

        assert!(announcer.announce_seeder("G1", "old.bin", Path::new("/tmp/new.bin")).await.is_err());
        assert_eq!(shared.get("old.bin").await, Some(PathBuf::from("/tmp/old.bin")));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_login_from_an_earlier_session_is_not_active() {
        let (client, shutdown) = tracker().await;
        let login = RwLock::new(Some(Login { name: "alice".into(), session: client.session() }));
        assert_eq!(active_user(&login, &client).await.as_deref(), Some("alice"));

        let stale = RwLock::new(Some(Login { name: "alice".into(), session: client.session() + 1 }));
        assert!(active_user(&stale, &client).await.is_none());
        assert!(active_user(&RwLock::new(None), &client).await.is_none());
        shutdown.cancel();
    }
}
