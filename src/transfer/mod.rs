//! Makes remote original files present on local disk.
//!
//! [`TransferManager::ensure_local`] first checks whether the destination
//! already holds a copy matching the remote size (and SHA-256 checksum when
//! the server recorded one). Otherwise it reads the file in byte-range chunks
//! into a hidden `.<name>.part` file next to the destination, verifies it, and
//! renames it into place. The final path therefore never holds a partial file.
//!
//! A verification failure discards the temporary file and the transfer is
//! repeated once before the error is reported. Cancellation is checked before
//! every chunk and also discards the temporary file.

mod checksum;
mod error;

pub use checksum::{ContentHasher, expected_sha256, sha256_file};
pub use error::TransferError;

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::model::FileId;
use crate::remote::{RemoteFile, RemoteFileStore};

/// Default number of bytes requested per read (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Suffix of the temporary file a transfer writes to.
const PARTIAL_SUFFIX: &str = ".part";

/// Result of making a file present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The file was transferred.
    Downloaded {
        /// Bytes written.
        bytes: u64,
    },
    /// A matching local copy already existed.
    AlreadyPresent,
}

/// Copies remote files to local paths through a [`RemoteFileStore`].
pub struct TransferManager<'a> {
    store: &'a dyn RemoteFileStore,
    chunk_size: u64,
    cancel: CancellationToken,
}

impl<'a> TransferManager<'a> {
    /// Creates a manager reading `chunk_size` bytes per request (at least one).
    #[must_use]
    pub fn new(store: &'a dyn RemoteFileStore, chunk_size: u64) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops in-flight transfers when `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetches the remote record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the server has no such file, or
    /// [`TransferError::Remote`] for other service failures.
    pub async fn lookup(&self, id: FileId) -> Result<RemoteFile, TransferError> {
        self.store
            .metadata(id)
            .await
            .map_err(|source| TransferError::remote(id, source))
    }

    /// Returns true if `path` already holds a copy of `file`.
    pub async fn is_present(&self, file: &RemoteFile, path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path).await else {
            return false;
        };
        if !metadata.is_file() || metadata.len() != file.size {
            debug!(
                path = %path.display(),
                local_bytes = metadata.len(),
                remote_bytes = file.size,
                "local copy differs in size"
            );
            return false;
        }
        let Some(expected) = expected_sha256(file) else {
            return true;
        };
        match sha256_file(path).await {
            Ok(actual) if actual == expected => true,
            Ok(actual) => {
                debug!(path = %path.display(), %expected, %actual, "local copy differs in checksum");
                false
            }
            Err(error) => {
                debug!(path = %path.display(), error = %error, "cannot hash local copy");
                false
            }
        }
    }

    /// Makes `path` hold a verified copy of `file`.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotFound`] if the server no longer has the file
    /// - [`TransferError::Io`] if the destination cannot be written
    /// - [`TransferError::Integrity`] / [`TransferError::ChecksumMismatch`]
    ///   if both attempts produced bytes that failed verification
    /// - [`TransferError::Remote`] if reading from the server failed
    /// - [`TransferError::Cancelled`] if the cancellation token fired mid-transfer
    #[instrument(skip(self, file), fields(file = %file.id, path = %path.display()))]
    pub async fn ensure_local(
        &self,
        file: &RemoteFile,
        path: &Path,
    ) -> Result<TransferOutcome, TransferError> {
        if self.is_present(file, path).await {
            debug!("already present");
            return Ok(TransferOutcome::AlreadyPresent);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        let bytes = match self.transfer(file, path).await {
            Err(error) if error.is_integrity() => {
                warn!(error = %error, "verification failed, retrying once");
                self.transfer(file, path).await?
            }
            other => other?,
        };
        info!(bytes, "downloaded");
        Ok(TransferOutcome::Downloaded { bytes })
    }

    async fn transfer(&self, file: &RemoteFile, path: &Path) -> Result<u64, TransferError> {
        let partial = partial_path(path);
        let result = self.write_partial(file, &partial).await;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %partial.display(), "removing partial file after error");
                let _ = fs::remove_file(&partial).await;
                return Err(error);
            }
        };
        if let Err(source) = fs::rename(&partial, path).await {
            let _ = fs::remove_file(&partial).await;
            return Err(TransferError::io(path, source));
        }
        Ok(bytes)
    }

    async fn write_partial(&self, file: &RemoteFile, partial: &Path) -> Result<u64, TransferError> {
        let mut out = File::create(partial)
            .await
            .map_err(|e| TransferError::io(partial, e))?;
        let mut hasher = ContentHasher::new();
        let mut offset: u64 = 0;

        while offset < file.size {
            let length = self.chunk_size.min(file.size - offset);
            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(TransferError::Cancelled { file: file.id });
                }
                chunk = self.store.read(file.id, offset, length) => {
                    chunk.map_err(|source| TransferError::remote(file.id, source))?
                }
            };
            if chunk.is_empty() {
                break;
            }
            out.write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(partial, e))?;
            hasher.update(&chunk);
            offset += chunk.len() as u64;
        }
        out.flush().await.map_err(|e| TransferError::io(partial, e))?;
        out.sync_all()
            .await
            .map_err(|e| TransferError::io(partial, e))?;
        drop(out);

        if offset != file.size {
            return Err(TransferError::integrity(partial, file.size, offset));
        }
        if let Some(expected) = expected_sha256(file) {
            let actual = hasher.finish_hex();
            if actual != expected {
                return Err(TransferError::checksum_mismatch(partial, expected, actual));
            }
        }
        Ok(offset)
    }
}

/// Returns the hidden temporary path a transfer to `path` writes to.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::remote::ServiceError;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    /// Serves files from memory; the first `corrupt_reads` reads return garbage.
    #[derive(Default)]
    struct MemoryStore {
        files: HashMap<FileId, (RemoteFile, Vec<u8>)>,
        corrupt_reads: AtomicUsize,
        reject_reads: AtomicBool,
        reads: AtomicUsize,
    }

    impl MemoryStore {
        fn with(record: RemoteFile, content: &[u8]) -> Self {
            let mut files = HashMap::new();
            files.insert(record.id, (record, content.to_vec()));
            Self {
                files,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RemoteFileStore for MemoryStore {
        async fn metadata(&self, id: FileId) -> Result<RemoteFile, ServiceError> {
            self.files
                .get(&id)
                .map(|(record, _)| record.clone())
                .ok_or_else(|| ServiceError::not_found(format!("file {id}")))
        }

        async fn read(
            &self,
            id: FileId,
            offset: u64,
            length: u64,
        ) -> Result<Vec<u8>, ServiceError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.reject_reads.load(Ordering::SeqCst) {
                return Err(ServiceError::auth_required("memory://files", 401));
            }
            let (_, content) = self
                .files
                .get(&id)
                .ok_or_else(|| ServiceError::not_found(format!("file {id}")))?;
            let start = usize::try_from(offset).unwrap().min(content.len());
            let end = usize::try_from(offset + length).unwrap().min(content.len());
            let mut chunk = content[start..end].to_vec();
            let corrupt = self
                .corrupt_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if corrupt {
                chunk.iter_mut().for_each(|byte| *byte = b'!');
            }
            Ok(chunk)
        }
    }

    fn record(size: u64, sha256: Option<&str>) -> RemoteFile {
        RemoteFile {
            id: FileId(7),
            name: "abc.txt".to_string(),
            path: String::new(),
            size,
            hash: sha256.map(str::to_string),
            hasher: sha256.map(|_| "SHA-256".to_string()),
        }
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/data/Fileset/1/a.tif")),
            Path::new("/data/Fileset/1/.a.tif.part")
        );
    }

    #[tokio::test]
    async fn test_ensure_local_downloads_in_chunks() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("nested").join("abc.txt");
        let file = record(3, Some(ABC_SHA256));
        let store = MemoryStore::with(file.clone(), b"abc");
        let manager = TransferManager::new(&store, 2);

        let outcome = manager.ensure_local(&file, &dest).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Downloaded { bytes: 3 });
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_ensure_local_skips_matching_copy() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        std::fs::write(&dest, b"abc").unwrap();
        let file = record(3, Some(ABC_SHA256));
        let store = MemoryStore::with(file.clone(), b"abc");
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let outcome = manager.ensure_local(&file, &dest).await.unwrap();

        assert_eq!(outcome, TransferOutcome::AlreadyPresent);
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ensure_local_replaces_copy_with_wrong_checksum() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        std::fs::write(&dest, b"xyz").unwrap();
        let file = record(3, Some(ABC_SHA256));
        let store = MemoryStore::with(file.clone(), b"abc");
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let outcome = manager.ensure_local(&file, &dest).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Downloaded { bytes: 3 });
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_size_only_check_without_checksum() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        std::fs::write(&dest, b"xyz").unwrap();
        let file = record(3, None);
        let store = MemoryStore::with(file.clone(), b"abc");
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        assert!(manager.is_present(&file, &dest).await);
    }

    #[tokio::test]
    async fn test_checksum_failure_retried_once() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        let file = record(3, Some(ABC_SHA256));
        let store = MemoryStore::with(file.clone(), b"abc");
        store.corrupt_reads.store(1, Ordering::SeqCst);
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let outcome = manager.ensure_local(&file, &dest).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Downloaded { bytes: 3 });
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_checksum_failure_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        let file = record(3, Some(ABC_SHA256));
        let store = MemoryStore::with(file.clone(), b"abc");
        store.corrupt_reads.store(2, Ordering::SeqCst);
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let error = manager.ensure_local(&file, &dest).await.unwrap_err();

        assert!(matches!(error, TransferError::ChecksumMismatch { .. }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_short_remote_file_is_integrity_failure() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        let file = record(10, None);
        let store = MemoryStore::with(file.clone(), b"abc");
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let error = manager.ensure_local(&file, &dest).await.unwrap_err();

        assert!(matches!(
            error,
            TransferError::Integrity {
                expected_bytes: 10,
                actual_bytes: 3,
                ..
            }
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_lookup_maps_missing_file() {
        let store = MemoryStore::default();
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let error = manager.lookup(FileId(9)).await.unwrap_err();

        assert!(matches!(error, TransferError::NotFound { file: FileId(9) }));
    }

    #[tokio::test]
    async fn test_cancelled_transfer_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        let file = record(3, Some(ABC_SHA256));
        let store = MemoryStore::with(file.clone(), b"abc");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let manager = TransferManager::new(&store, 1).with_cancel(cancel);

        let error = manager.ensure_local(&file, &dest).await.unwrap_err();

        assert!(matches!(error, TransferError::Cancelled { file: FileId(7) }));
        assert!(error.is_fatal());
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_rejected_read_aborts_transfer() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("abc.txt");
        let file = record(3, None);
        let store = MemoryStore::with(file.clone(), b"abc");
        store.reject_reads.store(true, Ordering::SeqCst);
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let error = manager.ensure_local(&file, &dest).await.unwrap_err();

        assert!(error.is_fatal());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_empty_file_downloads() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("empty");
        let file = record(0, None);
        let store = MemoryStore::with(file.clone(), b"");
        let manager = TransferManager::new(&store, DEFAULT_CHUNK_SIZE);

        let outcome = manager.ensure_local(&file, &dest).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Downloaded { bytes: 0 });
        assert!(dest.is_file());
    }
}
