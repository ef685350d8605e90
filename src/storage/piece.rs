//! Piece geometry and status
//!
//! Files are split into fixed-size pieces; the last piece may be short.

use crate::error::ShareError;

/// Size of every piece except possibly the last
pub const PIECE_SIZE: usize = 512 * 1024;

/// Number of pieces for a file of `size` bytes
pub fn piece_count(size: u64) -> usize {
    size.div_ceil(PIECE_SIZE as u64) as usize
}

/// Byte offset of piece `index`
pub fn piece_offset(index: usize) -> u64 {
    index as u64 * PIECE_SIZE as u64
}

/// Length of piece `index` in a file of `size` bytes, zero when out of range
pub fn piece_length(size: u64, index: usize) -> usize {
    let offset = piece_offset(index);
    if offset >= size {
        return 0;
    }
    (size - offset).min(PIECE_SIZE as u64) as usize
}

/// Status of a piece in a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PieceStatus {
    /// Not yet claimed
    #[default]
    Pending,
    /// Claimed by a worker
    Downloading,
    /// Written and verified
    Completed,
    /// Every peer failed in every round
    Failed,
}

impl PieceStatus {
    /// One-byte code used by the resume record
    pub fn as_byte(self) -> u8 {
        match self {
            PieceStatus::Pending => 0,
            PieceStatus::Downloading => 1,
            PieceStatus::Completed => 2,
            PieceStatus::Failed => 3,
        }
    }

    /// Decode a resume record byte
    pub fn from_byte(byte: u8) -> Result<Self, ShareError> {
        match byte {
            0 => Ok(PieceStatus::Pending),
            1 => Ok(PieceStatus::Downloading),
            2 => Ok(PieceStatus::Completed),
            3 => Ok(PieceStatus::Failed),
            other => Err(ShareError::storage_error(format!("Invalid piece status byte: {}", other))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PieceStatus::Pending => "pending",
            PieceStatus::Downloading => "downloading",
            PieceStatus::Completed => "completed",
            PieceStatus::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_count() {
        assert_eq!(piece_count(0), 0);
        assert_eq!(piece_count(1), 1);
        assert_eq!(piece_count(PIECE_SIZE as u64), 1);
        assert_eq!(piece_count(PIECE_SIZE as u64 + 1), 2);
        assert_eq!(piece_count(1_200_000), 3);
    }

    #[test]
    fn test_piece_length_last_piece_short() {
        let size = 1_200_000u64;
        assert_eq!(piece_length(size, 0), PIECE_SIZE);
        assert_eq!(piece_length(size, 1), PIECE_SIZE);
        assert_eq!(piece_length(size, 2), 1_200_000 - 2 * PIECE_SIZE);
        assert_eq!(piece_length(size, 3), 0);
    }

    #[test]
    fn test_piece_length_exact_multiple() {
        let size = (PIECE_SIZE * 2) as u64;
        assert_eq!(piece_length(size, 1), PIECE_SIZE);
    }

    #[test]
    fn test_status_byte_codes() {
        for status in [
            PieceStatus::Pending,
            PieceStatus::Downloading,
            PieceStatus::Completed,
            PieceStatus::Failed,
        ] {
            assert_eq!(PieceStatus::from_byte(status.as_byte()).unwrap(), status);
        }
        assert!(PieceStatus::from_byte(9).is_err());
        assert_eq!(PieceStatus::default(), PieceStatus::Pending);
    }
}
