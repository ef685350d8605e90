//! Metadata of a file advertised in a group

use std::collections::BTreeSet;

use crate::error::ShareError;
use crate::protocol::FileEntry;
use crate::storage::hash::is_digest;
use crate::storage::piece::piece_count;

/// Size, digests and seeders of one advertised file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub full_hash: String,
    pub piece_hashes: Vec<String>,
    seeders: BTreeSet<String>,
}

impl FileMeta {
    /// Build metadata, rejecting hash lists that disagree with the size
    pub fn new(name: impl Into<String>, size: u64, full_hash: impl Into<String>, piece_hashes: Vec<String>) -> Result<Self, ShareError> {
        let full_hash = full_hash.into();
        if !is_digest(&full_hash) {
            return Err(ShareError::argument_error_with_field("Malformed file digest", "hash"));
        }
        if let Some(bad) = piece_hashes.iter().position(|h| !is_digest(h)) {
            return Err(ShareError::argument_error_with_field(format!("Malformed digest for piece {}", bad), "piece_hashes"));
        }

        let expected = piece_count(size);
        if piece_hashes.len() != expected {
            return Err(ShareError::argument_error_with_field(
                format!("{} piece hashes given, a {} byte file has {} pieces", piece_hashes.len(), size, expected),
                "piece_hashes",
            ));
        }

        Ok(Self {
            name: name.into(),
            size,
            full_hash,
            piece_hashes,
            seeders: BTreeSet::new(),
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn add_seeder(&mut self, peer: impl Into<String>) {
        self.seeders.insert(peer.into());
    }

    pub fn remove_seeder(&mut self, peer: &str) -> bool {
        self.seeders.remove(peer)
    }

    pub fn seeders(&self) -> impl Iterator<Item = &String> {
        self.seeders.iter()
    }

    pub fn entry(&self) -> FileEntry {
        FileEntry {
            name: self.name.clone(),
            size: self.size,
            pieces: self.piece_count(),
            full_hash: self.full_hash.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::hash::digest_hex;

    #[test]
    fn test_valid_meta() {
        let hashes = vec![digest_hex(b"0"), digest_hex(b"1"), digest_hex(b"2")];
        let mut meta = FileMeta::new("data.bin", 1_200_000, digest_hex(b"all"), hashes).unwrap();
        assert_eq!(meta.piece_count(), 3);

        meta.add_seeder("alice");
        meta.add_seeder("alice");
        assert_eq!(meta.seeders().count(), 1);
        assert!(meta.remove_seeder("alice"));
        assert!(!meta.remove_seeder("alice"));
    }

    #[test]
    fn test_hash_count_must_match_size() {
        let hashes = vec![digest_hex(b"0"), digest_hex(b"1")];
        let err = FileMeta::new("data.bin", 1_200_000, digest_hex(b"all"), hashes).unwrap_err();
        assert!(matches!(err, ShareError::ArgumentError { .. }));
    }

    #[test]
    fn test_malformed_digests_rejected() {
        assert!(FileMeta::new("a", 1, "nothex", vec![digest_hex(b"0")]).is_err());
        assert!(FileMeta::new("a", 1, digest_hex(b"x"), vec!["short".to_string()]).is_err());
    }
}
