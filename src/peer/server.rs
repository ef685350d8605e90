//! Piece server
//!
//! Answers single-shot piece requests from other peers. An accept loop
//! feeds connections into a shared queue drained by a fixed worker pool.
//! Malformed or unanswerable requests are closed without a response.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::ShareError;
use crate::peer::queue::JobQueue;
use crate::protocol::{read_line, write_frame, CommandSpec, CommandTable};
use crate::storage::file::{read_piece, SharedFiles};

/// Default number of piece server workers
pub const DEFAULT_SERVER_WORKERS: usize = 4;

const FETCH: CommandSpec = CommandSpec::exact("fetch", 2, "fetch <file_name> <piece_index>");

/// Render a piece request line
pub fn fetch_line(name: &str, index: usize) -> String {
    format!("{} {} {}", FETCH.name, name, index)
}

/// A bound, not yet running piece server
#[derive(Debug)]
pub struct PieceServer {
    listener: TcpListener,
    shared: Arc<SharedFiles>,
    workers: usize,
    io_timeout: Duration,
}

/// Running piece server
#[derive(Debug)]
pub struct PieceServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    queue: Arc<JobQueue<TcpStream>>,
    accept_task: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl PieceServer {
    pub async fn bind(addr: SocketAddr, shared: Arc<SharedFiles>, workers: usize, io_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind piece server to {}: {}", addr, e);
            ShareError::network_error_full("Failed to bind piece server", addr.to_string(), e.to_string())
        })?;

        Ok(Self {
            listener,
            shared,
            workers: workers.max(1),
            io_timeout,
        })
    }

    /// Spawn the accept loop and the worker pool
    pub fn start(self) -> Result<PieceServerHandle> {
        let local_addr = self.listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let queue = Arc::new(JobQueue::new());
        let table = Arc::new(CommandTable::new().with(FETCH, ()));

        let workers = (0..self.workers)
            .map(|worker_id| {
                let queue = queue.clone();
                let shared = self.shared.clone();
                let table = table.clone();
                let io_timeout = self.io_timeout;
                tokio::spawn(async move {
                    while let Some(stream) = queue.pop().await {
                        if let Err(e) = serve_request(stream, &shared, &table, io_timeout).await {
                            debug!("Worker {} dropped request: {}", worker_id, e);
                        }
                    }
                    trace!("Piece server worker {} exiting", worker_id);
                })
            })
            .collect();

        let accept_task = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let listener = self.listener;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                trace!("Piece request connection from {}", peer);
                                if !queue.push(stream) {
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to accept piece request: {}", e),
                        },
                    }
                }
            })
        };

        info!("Piece server listening on {} with {} workers", local_addr, self.workers);
        Ok(PieceServerHandle {
            local_addr,
            shutdown,
            queue,
            accept_task,
            workers,
        })
    }
}

impl PieceServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, let workers drain queued requests, then wait for them
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.accept_task.await {
            warn!("Piece server accept loop ended abnormally: {}", e);
        }

        self.queue.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Piece server worker ended abnormally: {}", e);
            }
        }
        info!("Piece server on {} stopped", self.local_addr);
    }
}

async fn serve_request(
    mut stream: TcpStream,
    shared: &SharedFiles,
    table: &CommandTable<()>,
    io_timeout: Duration,
) -> Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let line = timeout(io_timeout, read_line(&mut reader))
        .await??
        .ok_or_else(|| ShareError::network_error("Connection closed before request"))?
        .into_text()?;

    let resolved = table.resolve(&line)?;
    let name = resolved.args[0];
    let index: usize = resolved.args[1]
        .parse()
        .map_err(|_| ShareError::argument_error_with_field(format!("Invalid piece index: {}", resolved.args[1]), "index"))?;

    let path = shared
        .get(name)
        .await
        .ok_or_else(|| ShareError::not_found_with_entity(format!("Not sharing {}", name), "file"))?;

    let data = read_piece(&path, index)
        .await?
        .ok_or_else(|| ShareError::argument_error_with_field(format!("Piece {} of {} is past end of file", index, name), "index"))?;

    timeout(io_timeout, write_frame(&mut write_half, &data)).await??;
    debug!("Served piece {} of {} ({} bytes)", index, name, data.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, write_line};
    use crate::storage::piece::PIECE_SIZE;
    use tokio::io::AsyncReadExt;

    async fn serve(dir: &std::path::Path, data: &[u8]) -> PieceServerHandle {
        let path = dir.join("data.bin");
        tokio::fs::write(&path, data).await.unwrap();
        let shared = Arc::new(SharedFiles::new());
        shared.add("data.bin", path).await;

        PieceServer::bind("127.0.0.1:0".parse().unwrap(), shared, 2, Duration::from_secs(5))
            .await
            .unwrap()
            .start()
            .unwrap()
    }

    async fn request(addr: SocketAddr, line: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_line(&mut stream, line).await.unwrap();
        stream
    }

    #[test]
    fn test_fetch_line() {
        assert_eq!(fetch_line("data.bin", 3), "fetch data.bin 3");
    }

    #[tokio::test]
    async fn test_serves_pieces_truncated_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..PIECE_SIZE + 100).map(|i| (i % 200) as u8).collect();
        let server = serve(dir.path(), &data).await;

        let mut stream = request(server.local_addr(), &fetch_line("data.bin", 1)).await;
        let piece = read_frame(&mut stream, PIECE_SIZE).await.unwrap();
        assert_eq!(piece, &data[PIECE_SIZE..]);

        let mut stream = request(server.local_addr(), &fetch_line("data.bin", 0)).await;
        let piece = read_frame(&mut stream, PIECE_SIZE).await.unwrap();
        assert_eq!(piece, &data[..PIECE_SIZE]);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_requests_close_without_response() {
        let dir = tempfile::tempdir().unwrap();
        let server = serve(dir.path(), b"hello").await;

        for line in ["fetch missing.bin 0", "fetch data.bin -1", "fetch data.bin 5", "fetch data.bin", "get data.bin 0"] {
            let mut stream = request(server.local_addr(), line).await;
            let mut buf = Vec::new();
            let n = stream.read_to_end(&mut buf).await.unwrap_or(0);
            assert_eq!(n, 0, "unexpected response to {:?}", line);
        }

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let dir = tempfile::tempdir().unwrap();
        let server = serve(dir.path(), b"hello").await;
        let addr = server.local_addr();

        tokio::time::timeout(Duration::from_secs(5), server.shutdown()).await.unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
