//! Content checksums recorded by the server.
//!
//! Only SHA-256 is verified. Files recorded with any other algorithm are
//! checked by size alone.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::remote::RemoteFile;

const READ_BUFFER: usize = 64 * 1024;

/// Returns the SHA-256 the server recorded for `file`, lowercased, if any.
#[must_use]
pub fn expected_sha256(file: &RemoteFile) -> Option<String> {
    let hasher = file.hasher.as_deref()?;
    let normalized: String = hasher
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    if normalized != "SHA256" {
        return None;
    }
    let hash = file.hash.as_deref()?.trim();
    (!hash.is_empty()).then(|| hash.to_ascii_lowercase())
}

/// Incremental SHA-256 over streamed chunks.
#[derive(Debug, Default, Clone)]
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Creates a hasher with no input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    /// Returns the lowercase hex digest.
    #[must_use]
    pub fn finish_hex(self) -> String {
        to_hex(&self.0.finalize())
    }
}

/// Hashes an existing local file.
///
/// # Errors
///
/// Returns the IO error if the file cannot be read.
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0_u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finish_hex())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}
