//! Tracker requests and structured responses
//!
//! Requests are rendered into the command lines the tracker resolves.
//! The download query and the file listing carry structured bodies that
//! both sides render and parse here.

use std::fmt;

use crate::error::ShareError;
use crate::storage::hash::is_digest;
use crate::storage::piece::piece_count;

/// Piece server endpoint of a seeding peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self { id: id.into(), address: address.into(), port }
    }

    /// `address:port`, ready for connecting
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A request to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerRequest {
    CreateUser { name: String, pass: String },
    Login { name: String, pass: String, address: String, port: u16 },
    Logout { name: String },
    CreateGroup { group: String, owner: String },
    JoinGroup { group: String, user: String },
    LeaveGroup { group: String, user: String },
    ListRequests { group: String, requester: String },
    AcceptRequest { group: String, applicant: String, requester: String },
    ListGroups,
    Upload {
        group: String,
        name: String,
        uploader: String,
        size: u64,
        full_hash: String,
        piece_hashes: Vec<String>,
    },
    ListFiles { group: String, requester: String },
    DownloadFile { group: String, name: String, requester: String },
    FileDownloaded { group: String, name: String, peer: String },
    StopShare { group: String, name: String, peer: String },
}

impl TrackerRequest {
    /// Render as a command line, without the terminator
    pub fn to_line(&self) -> String {
        match self {
            TrackerRequest::CreateUser { name, pass } => format!("create_user {} {}", name, pass),
            TrackerRequest::Login { name, pass, address, port } => format!("login {} {} {} {}", name, pass, address, port),
            TrackerRequest::Logout { name } => format!("logout {}", name),
            TrackerRequest::CreateGroup { group, owner } => format!("create_group {} {}", group, owner),
            TrackerRequest::JoinGroup { group, user } => format!("join_group {} {}", group, user),
            TrackerRequest::LeaveGroup { group, user } => format!("leave_group {} {}", group, user),
            TrackerRequest::ListRequests { group, requester } => format!("list_requests {} {}", group, requester),
            TrackerRequest::AcceptRequest { group, applicant, requester } => {
                format!("accept_request {} {} {}", group, applicant, requester)
            }
            TrackerRequest::ListGroups => "list_groups".to_string(),
            TrackerRequest::Upload { group, name, uploader, size, full_hash, piece_hashes } => {
                let mut line = format!(
                    "upload {} {} {} {} {} {}",
                    group,
                    name,
                    uploader,
                    size,
                    full_hash,
                    piece_hashes.len()
                );
                for hash in piece_hashes {
                    line.push(' ');
                    line.push_str(hash);
                }
                line
            }
            TrackerRequest::ListFiles { group, requester } => format!("list_files {} {}", group, requester),
            TrackerRequest::DownloadFile { group, name, requester } => {
                format!("download_file {} {} {}", group, name, requester)
            }
            TrackerRequest::FileDownloaded { group, name, peer } => format!("file_downloaded {} {} {}", group, name, peer),
            TrackerRequest::StopShare { group, name, peer } => format!("stop_share {} {} {}", group, name, peer),
        }
    }
}

/// One line of a `list_files` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub pieces: usize,
    pub full_hash: String,
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SIZE:{} PIECES:{} HASH:{}", self.name, self.size, self.pieces, self.full_hash)
    }
}

impl FileEntry {
    pub fn parse(line: &str) -> Result<Self, ShareError> {
        let bad = || ShareError::argument_error(format!("Malformed file entry: {}", line));
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 4 {
            return Err(bad());
        }

        let field = |token: &str, key: &str| token.strip_prefix(key).map(str::to_string);
        let size = field(tokens[1], "SIZE:").and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let pieces = field(tokens[2], "PIECES:").and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let full_hash = field(tokens[3], "HASH:").ok_or_else(bad)?;

        Ok(Self { name: tokens[0].to_string(), size, pieces, full_hash })
    }
}

/// Response body of a download query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadListing {
    pub name: String,
    pub size: u64,
    pub full_hash: String,
    pub piece_hashes: Vec<String>,
    pub peers: Vec<PeerEndpoint>,
}

impl DownloadListing {
    /// Render the response body
    pub fn render(&self) -> String {
        let mut out = format!(
            "FILE {} SIZE {} HASH {} PIECES {} PIECE_HASHES",
            self.name,
            self.size,
            self.full_hash,
            self.piece_hashes.len()
        );
        for hash in &self.piece_hashes {
            out.push(' ');
            out.push_str(hash);
        }
        out.push_str("\nPEERS\n");
        for peer in &self.peers {
            out.push_str(&format!("{} {} {}\n", peer.id, peer.address, peer.port));
        }
        out.push('\n');
        out
    }

    /// Parse a response body, checking the hash list against the size
    pub fn parse(text: &str) -> Result<Self, ShareError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| ShareError::argument_error("Empty download response"))?;
        let tokens: Vec<&str> = header.split_whitespace().collect();

        let malformed = |what: &str| ShareError::argument_error(format!("Malformed download response: {}", what));
        if tokens.len() < 9
            || tokens[0] != "FILE"
            || tokens[2] != "SIZE"
            || tokens[4] != "HASH"
            || tokens[6] != "PIECES"
            || tokens[8] != "PIECE_HASHES"
        {
            return Err(malformed("header"));
        }

        let size: u64 = tokens[3].parse().map_err(|_| malformed("size"))?;
        let pieces: usize = tokens[7].parse().map_err(|_| malformed("piece count"))?;
        let piece_hashes: Vec<String> = tokens[9..].iter().map(|h| h.to_string()).collect();

        if piece_hashes.len() != pieces || pieces != piece_count(size) {
            return Err(ShareError::argument_error(format!(
                "Download response lists {} hashes for {} pieces of a {} byte file",
                piece_hashes.len(),
                pieces,
                size
            )));
        }
        if !is_digest(tokens[5]) || !piece_hashes.iter().all(|h| is_digest(h)) {
            return Err(malformed("digest"));
        }

        if lines.next().map(str::trim) != Some("PEERS") {
            return Err(malformed("missing PEERS section"));
        }

        let mut peers = Vec::new();
        for line in lines {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [] => break,
                [id, address, port] => {
                    let port = port.parse().map_err(|_| malformed("peer port"))?;
                    peers.push(PeerEndpoint::new(*id, *address, port));
                }
                _ => return Err(malformed("peer line")),
            }
        }

        Ok(Self {
            name: tokens[1].to_string(),
            size,
            full_hash: tokens[5].to_string(),
            piece_hashes,
            peers,
        })
    }
}
