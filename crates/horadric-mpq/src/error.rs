//! Error types for the MPQ crate.

use std::sync::Arc;

use thiserror::Error;

use crate::tables::BlockFlags;

/// Errors that can occur when working with MPQ archives.
///
/// The error is cheap to clone so that one failed table load can be handed
/// to every caller that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Common library error (truncated header or record).
    #[error("{0}")]
    Common(#[from] horadric_common::Error),

    /// The archive does not start with the MPQ signature.
    #[error("invalid MPQ signature: expected {expected:#010x}, got {actual:#010x}")]
    InvalidSignature { expected: u32, actual: u32 },

    /// The archive uses a format version this reader does not handle.
    #[error("unsupported MPQ format version: {0}")]
    UnsupportedVersion(u16),

    /// The sector size shift would produce an unreasonable sector size.
    #[error("invalid sector size shift: {0}")]
    InvalidSectorSizeShift(u16),

    /// A table named by the header extends past the end of the source.
    #[error("{table} table at offset {offset} ({length} bytes) exceeds archive size {source_len}")]
    TableOutOfBounds {
        table: &'static str,
        offset: u64,
        length: u64,
        source_len: u64,
    },

    /// A hash lookup landed outside the encryption table.
    #[error("hash index {0:#x} is outside the encryption table")]
    HashIndexOutOfRange(usize),

    /// The block needs a feature this reader does not implement.
    #[error("unsupported block flags: {0:?}")]
    UnsupportedFlags(BlockFlags),

    /// A sector uses a compression method this reader does not implement.
    #[error("unsupported sector compression: {0:#04x}")]
    UnsupportedCompression(u8),

    /// The sector offset table violates its ordering or bounds invariants.
    #[error("corrupt sector table: {0}")]
    CorruptSectorTable(String),

    /// A sector could not be decoded.
    #[error("sector {index} failed to decode: {reason}")]
    SectorDecode { index: usize, reason: String },

    /// The byte source could not satisfy a read.
    #[error("read of {length} bytes at offset {offset} failed: {source}")]
    Io {
        offset: u64,
        length: usize,
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archive is not a readable MPQ. Raised while opening.
    Format,
    /// A specific file needs a feature this reader lacks.
    UnsupportedFeature,
    /// A specific file's stored data is inconsistent.
    CorruptArchive,
    /// The byte source failed.
    Io,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Common(_)
            | Self::InvalidSignature { .. }
            | Self::UnsupportedVersion(_)
            | Self::InvalidSectorSizeShift(_)
            | Self::TableOutOfBounds { .. }
            | Self::HashIndexOutOfRange(_) => ErrorKind::Format,
            Self::UnsupportedFlags(_) | Self::UnsupportedCompression(_) => {
                ErrorKind::UnsupportedFeature
            }
            Self::CorruptSectorTable(_) | Self::SectorDecode { .. } => ErrorKind::CorruptArchive,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(offset: u64, length: usize, source: std::io::Error) -> Self {
        Self::Io {
            offset,
            length,
            source: Arc::new(source),
        }
    }
}

/// Result type for MPQ operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::UnsupportedVersion(1).kind(), ErrorKind::Format);
        assert_eq!(
            Error::UnsupportedFlags(BlockFlags::ENCRYPTED).kind(),
            ErrorKind::UnsupportedFeature
        );
        assert_eq!(
            Error::CorruptSectorTable("x".into()).kind(),
            ErrorKind::CorruptArchive
        );
        let io = Error::io(16, 4, std::io::ErrorKind::UnexpectedEof.into());
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_io_display_carries_position() {
        let err = Error::io(1024, 32, std::io::ErrorKind::UnexpectedEof.into());
        let text = err.to_string();
        assert!(text.contains("32 bytes"));
        assert!(text.contains("offset 1024"));
    }
}
