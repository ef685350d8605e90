//! Tracker server
//!
//! Accepts peer sessions and runs one task per connection. Each request
//! line gets exactly one framed response, malformed lines included; the
//! session ends on EOF, read failure or idle timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::ShareError;
use crate::protocol::{read_line, write_frame, CommandTable, RequestLine};
use crate::tracker::handler::{command_table, handle_line, Handler, Session};
use crate::tracker::registry::Registry;

/// Tracker accept loop and the state shared by its sessions
#[derive(Debug)]
pub struct TrackerServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    table: Arc<CommandTable<Handler>>,
    idle_timeout: Option<Duration>,
}

impl TrackerServer {
    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr, idle_timeout: Option<Duration>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind tracker to {}: {}", addr, e);
            ShareError::network_error_full("Failed to bind tracker", addr.to_string(), e.to_string())
        })?;

        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            table: Arc::new(command_table()),
            idle_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Serve sessions until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("Tracker listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            debug!("Session opened from {}", peer);
            let registry = self.registry.clone();
            let table = self.table.clone();
            let idle = self.idle_timeout;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = serve_session(stream, peer, registry, table, idle) => {}
                }
            });
        }

        info!("Tracker stopped");
        Ok(())
    }
}

async fn serve_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    table: Arc<CommandTable<Handler>>,
    idle_timeout: Option<Duration>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut session = Session::new();

    loop {
        let next = match idle_timeout {
            Some(limit) => match timeout(limit, read_line(&mut reader)).await {
                Ok(line) => line,
                Err(_) => {
                    info!("Session from {} idle for {:?}, closing", peer, limit);
                    break;
                }
            },
            None => read_line(&mut reader).await,
        };

        let response = match next {
            Ok(Some(RequestLine::Text(line))) => {
                trace!("{} -> {}", peer, line);
                handle_line(&registry, &table, &mut session, &line).await
            }
            Ok(Some(RequestLine::Malformed(e))) => {
                debug!("Malformed request from {}: {}", peer, e);
                e.to_response()
            }
            Ok(None) => {
                debug!("Session from {} reached EOF", peer);
                break;
            }
            Err(e) => {
                warn!("Failed to read from {}: {}", peer, e);
                break;
            }
        };

        if let Err(e) = write_frame(&mut write_half, response.as_bytes()).await {
            warn!("Failed to respond to {}: {}", peer, e);
            break;
        }
    }

    if let Some(user) = session.user() {
        registry.write().await.disconnect(user);
    }
}
