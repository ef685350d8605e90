//! Content digests
//!
//! SHA-1 digests rendered as lowercase hex, for single pieces and whole files.

use std::path::Path;

use anyhow::Result;
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

use crate::error::ShareError;
use crate::storage::piece::{piece_count, PIECE_SIZE};

/// Length of a hex-rendered digest
pub const DIGEST_HEX_LEN: usize = 40;

const READ_CHUNK: usize = 64 * 1024;

/// Digests produced by a single pass over a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    /// File size in bytes
    pub size: u64,
    /// Digest of the whole file
    pub full_hash: String,
    /// Digest of every piece, in index order
    pub piece_hashes: Vec<String>,
}

/// Digest of an in-memory byte range
pub fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check that `text` looks like a rendered digest
pub fn is_digest(text: &str) -> bool {
    text.len() == DIGEST_HEX_LEN && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

async fn open(path: &Path) -> Result<File> {
    File::open(path).await.map_err(|e| {
        error!("Failed to open {} for hashing: {}", path.display(), e);
        ShareError::storage_error_full(
            "Failed to open file for hashing",
            path.display().to_string(),
            e.to_string(),
        )
        .into()
    })
}

/// Stream a file through the digest without loading it whole
pub async fn file_digest(path: &Path) -> Result<String> {
    let mut file = open(path).await?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute size, whole-file digest and every piece digest in one pass
pub async fn hash_file(path: &Path) -> Result<FileDigests> {
    let mut file = open(path).await?;
    let mut whole = Sha1::new();
    let mut piece = Sha1::new();
    let mut in_piece = 0usize;
    let mut size = 0u64;
    let mut piece_hashes = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        whole.update(&buf[..n]);
        size += n as u64;

        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            let take = chunk.len().min(PIECE_SIZE - in_piece);
            piece.update(&chunk[..take]);
            in_piece += take;
            chunk = &chunk[take..];

            if in_piece == PIECE_SIZE {
                piece_hashes.push(hex::encode(piece.finalize_reset()));
                in_piece = 0;
            }
        }
    }

    if in_piece > 0 {
        piece_hashes.push(hex::encode(piece.finalize()));
    }

    debug!("Hashed {} ({} bytes, {} pieces)", path.display(), size, piece_hashes.len());
    debug_assert_eq!(piece_hashes.len(), piece_count(size));

    Ok(FileDigests {
        size,
        full_hash: hex::encode(whole.finalize()),
        piece_hashes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex_known_value() {
        assert_eq!(digest_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(digest_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_is_digest() {
        assert!(is_digest("a9993e364706816aba3e25717850c26c9cd0d89d"));
        assert!(!is_digest("A9993E364706816ABA3E25717850C26C9CD0D89D"));
        assert!(!is_digest("a9993e"));
        assert!(!is_digest("z9993e364706816aba3e25717850c26c9cd0d89d"));
    }

    #[tokio::test]
    async fn test_hash_file_multi_piece() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..(PIECE_SIZE * 2 + 100)).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let digests = hash_file(&path).await.unwrap();
        assert_eq!(digests.size, data.len() as u64);
        assert_eq!(digests.full_hash, digest_hex(&data));
        assert_eq!(digests.piece_hashes.len(), 3);
        assert_eq!(digests.piece_hashes[0], digest_hex(&data[..PIECE_SIZE]));
        assert_eq!(digests.piece_hashes[1], digest_hex(&data[PIECE_SIZE..PIECE_SIZE * 2]));
        assert_eq!(digests.piece_hashes[2], digest_hex(&data[PIECE_SIZE * 2..]));

        assert_eq!(file_digest(&path).await.unwrap(), digests.full_hash);
    }

    #[tokio::test]
    async fn test_hash_file_exact_multiple() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.bin");
        tokio::fs::write(&path, vec![7u8; PIECE_SIZE]).await.unwrap();

        let digests = hash_file(&path).await.unwrap();
        assert_eq!(digests.piece_hashes.len(), 1);
    }

    #[tokio::test]
    async fn test_hash_missing_file() {
        let result = hash_file(Path::new("/nonexistent/path/file.bin")).await;
        assert!(result.is_err());
    }
}
