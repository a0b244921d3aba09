//! Error types for file transfers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::FileId;
use crate::remote::ServiceError;

/// Errors making a remote file present locally.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server has no such file.
    #[error("remote file {file} not found")]
    NotFound {
        /// The missing file.
        file: FileId,
    },

    /// Local filesystem error (create directory, write, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Bytes received do not match the remote size.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Destination that failed verification.
        path: PathBuf,
        /// Size recorded by the server.
        expected_bytes: u64,
        /// Bytes actually received.
        actual_bytes: u64,
    },

    /// Content hash does not match the remote checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Destination that failed verification.
        path: PathBuf,
        /// Checksum recorded by the server.
        expected: String,
        /// Checksum of the bytes received.
        actual: String,
    },

    /// Reading from the server failed.
    #[error("reading remote file {file}: {source}")]
    Remote {
        /// The file being read.
        file: FileId,
        /// The underlying service error.
        #[source]
        source: ServiceError,
    },

    /// The run was cancelled while the file was being read.
    #[error("transfer of remote file {file} cancelled")]
    Cancelled {
        /// The file being read.
        file: FileId,
    },
}

impl TransferError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a size mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Wraps a service error, turning a missing file into [`Self::NotFound`].
    pub fn remote(file: FileId, source: ServiceError) -> Self {
        match source {
            ServiceError::NotFound { .. } => Self::NotFound { file },
            source => Self::Remote { file, source },
        }
    }

    /// Returns true if the received bytes failed verification.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::ChecksumMismatch { .. })
    }

    /// Returns true if the error should abort the whole run rather than skip the file.
    ///
    /// Local write failures, a rejected session and cancellation qualify.
    /// Each would fail every remaining file the same way.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Cancelled { .. } => true,
            Self::Remote { source, .. } => source.is_auth(),
            Self::NotFound { .. } | Self::Integrity { .. } | Self::ChecksumMismatch { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_not_found_becomes_not_found() {
        let error = TransferError::remote(FileId(4), ServiceError::not_found("file 4"));
        assert!(matches!(error, TransferError::NotFound { file: FileId(4) }));
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_io_is_fatal_integrity_is_not() {
        let io = TransferError::io("/tmp/x", io::Error::other("disk full"));
        assert!(io.is_fatal());
        assert!(!TransferError::integrity("/tmp/x", 10, 4).is_fatal());
        assert!(TransferError::integrity("/tmp/x", 10, 4).is_integrity());
        assert!(TransferError::checksum_mismatch("/tmp/x", "aa", "bb").is_integrity());
    }

    #[test]
    fn test_rejected_session_is_fatal() {
        let error =
            TransferError::remote(FileId(4), ServiceError::auth_required("https://omero/file", 401));
        assert!(matches!(error, TransferError::Remote { .. }));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_other_remote_failures_skip_the_file() {
        let error =
            TransferError::remote(FileId(4), ServiceError::http_status("https://omero/file", 500));
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_cancelled_is_fatal() {
        assert!(TransferError::Cancelled { file: FileId(4) }.is_fatal());
    }

    #[test]
    fn test_integrity_message() {
        let error = TransferError::integrity("/data/a.tif", 10, 4);
        assert_eq!(
            error.to_string(),
            "integrity check failed for /data/a.tif: expected 10 bytes, got 4"
        );
    }
}
