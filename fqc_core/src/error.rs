/// Result alias used throughout `fqc_core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], convenient for matching in callers
/// that only care about the category (exit codes, retries, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Io,
    InvalidFormat,
    CompressionFailed,
    DecompressionFailed,
    Cancelled,
    Internal,
}

/// Every failure the archive engine can report.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad configuration: block size, compression level, memory budget, ranges.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Open/read/write failures from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt archive, malformed FASTQ, or an inconsistent reorder map.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A block's stored checksum disagrees with its decoded contents.
    #[error("block {block} checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        block: u32,
        expected: u64,
        actual: u64,
    },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// The run was cancelled through a progress callback or a cancel handle.
    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Io(_) => ErrorKind::Io,
            Self::InvalidFormat(_) | Self::ChecksumMismatch { .. } => ErrorKind::InvalidFormat,
            Self::CompressionFailed(_) => ErrorKind::CompressionFailed,
            Self::DecompressionFailed(_) => ErrorKind::DecompressionFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Builds an [`Error::InvalidFormat`] from anything printable.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Builds an [`Error::InvalidArgument`] from anything printable.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
