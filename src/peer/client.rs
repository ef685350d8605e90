//! Tracker client
//!
//! One persistent session with the tracker. Requests are serialised so
//! each response is matched with the request that produced it. A failed
//! exchange leaves the stream at an unknown position, so the stream is
//! dropped and the next request opens a fresh session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::ShareError;
use crate::protocol::{read_text_frame, write_line, DownloadListing, TrackerRequest};

/// Session with the tracker
#[derive(Debug)]
pub struct TrackerClient {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
    session: AtomicU64,
    io_timeout: Duration,
}

async fn open(addr: &str, io_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(io_timeout, TcpStream::connect(addr))
        .await
        .map_err(|e| {
            warn!("Connection timeout to tracker {}", addr);
            ShareError::network_error_full("Connection timeout", addr, e.to_string())
        })?
        .map_err(|e| {
            error!("Failed to connect to tracker {}: {}", addr, e);
            ShareError::network_error_full("Failed to connect to tracker", addr, e.to_string())
        })?;
    Ok(stream)
}

impl TrackerClient {
    /// Connect to the tracker at `addr`
    pub async fn connect(addr: &str, io_timeout: Duration) -> Result<Self> {
        info!("Connecting to tracker at {}", addr);
        let stream = open(addr, io_timeout).await?;

        Ok(Self {
            addr: addr.to_string(),
            stream: Mutex::new(Some(stream)),
            session: AtomicU64::new(1),
            io_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of sessions opened so far. The tracker logs a user out when
    /// its session ends, so a login only holds while this stays the same.
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Send a raw line and return the response text, failures included
    pub async fn send_line(&self, line: &str) -> Result<String> {
        let mut slot = self.stream.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => {
                info!("Opening a new tracker session with {}", self.addr);
                let stream = open(&self.addr, self.io_timeout).await?;
                self.session.fetch_add(1, Ordering::AcqRel);
                stream
            }
        };

        debug!("-> tracker: {}", line);
        match self.exchange(&mut stream, line).await {
            Ok(response) => {
                debug!("<- tracker: {}", response.lines().next().unwrap_or(""));
                *slot = Some(stream);
                Ok(response)
            }
            Err(e) => {
                warn!("Dropping tracker session after failed request: {}", e);
                Err(e)
            }
        }
    }

    async fn exchange(&self, stream: &mut TcpStream, line: &str) -> Result<String> {
        write_line(&mut *stream, line).await.map_err(|e| {
            ShareError::network_error_full("Failed to send request", self.addr.as_str(), e.to_string())
        })?;

        let response = timeout(self.io_timeout, read_text_frame(&mut *stream))
            .await
            .map_err(|_| ShareError::network_error_with_address("Tracker response timed out", self.addr.as_str()))?
            .map_err(|e| ShareError::network_error_full("Failed to read response", self.addr.as_str(), e.to_string()))?;
        Ok(response)
    }

    /// Send a request, turning an error response into a typed error
    pub async fn request(&self, request: &TrackerRequest) -> Result<String> {
        let response = self.send_line(&request.to_line()).await?;
        if ShareError::is_error_response(&response) {
            return Err(ShareError::from_response(&response).into());
        }
        Ok(response)
    }

    /// Query metadata and seeders of a file
    pub async fn download_listing(&self, group: &str, name: &str, requester: &str) -> Result<DownloadListing> {
        let response = self
            .request(&TrackerRequest::DownloadFile {
                group: group.to_string(),
                name: name.to_string(),
                requester: requester.to_string(),
            })
            .await?;
        Ok(DownloadListing::parse(&response)?)
    }

    /// Register `peer` as a seeder of a file
    pub async fn file_downloaded(&self, group: &str, name: &str, peer: &str) -> Result<()> {
        self.request(&TrackerRequest::FileDownloaded {
            group: group.to_string(),
            name: name.to_string(),
            peer: peer.to_string(),
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerServer;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_typed_errors_from_tracker() {
        let server = TrackerServer::bind("127.0.0.1:0".parse().unwrap(), None).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));

        let client = TrackerClient::connect(&addr, Duration::from_secs(5)).await.unwrap();
        client
            .request(&TrackerRequest::CreateUser { name: "alice".into(), pass: "pw".into() })
            .await
            .unwrap();

        let err = client
            .request(&TrackerRequest::Login {
                name: "alice".into(),
                pass: "bad".into(),
                address: "127.0.0.1".into(),
                port: 7001,
            })
            .await
            .unwrap_err();
        let err = err.downcast::<ShareError>().unwrap();
        assert!(matches!(err, ShareError::AuthorizationError { .. }));

        let err = client.download_listing("G1", "a.bin", "alice").await.unwrap_err();
        assert!(matches!(err.downcast::<ShareError>().unwrap(), ShareError::NotFoundError { .. }));

        shutdown.cancel();
    }

    /// Answers `reply-to-<command>`, stalling on `slow`
    async fn stalling_tracker() -> String {
        use crate::protocol::{read_line, write_frame};
        use tokio::io::BufReader;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    while let Ok(Some(line)) = read_line(&mut reader).await {
                        let line = line.into_text().unwrap();
                        if line == "slow" {
                            tokio::time::sleep(Duration::from_millis(600)).await;
                        }
                        let reply = format!("reply-to-{}", line);
                        if write_frame(&mut write_half, reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_timed_out_session_is_not_reused() {
        let addr = stalling_tracker().await;
        let client = TrackerClient::connect(&addr, Duration::from_millis(200)).await.unwrap();
        assert_eq!(client.send_line("create_user").await.unwrap(), "reply-to-create_user");
        assert_eq!(client.session(), 1);

        let err = client.send_line("slow").await.unwrap_err();
        assert!(matches!(err.downcast::<ShareError>().unwrap(), ShareError::NetworkError { .. }));

        // The late reply must not be taken for this one
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(client.send_line("list_groups").await.unwrap(), "reply-to-list_groups");
        assert_eq!(client.session(), 2);
        assert_eq!(client.send_line("logout").await.unwrap(), "reply-to-logout");
        assert_eq!(client.session(), 2);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(TrackerClient::connect(&addr, Duration::from_secs(2)).await.is_err());
    }
}
