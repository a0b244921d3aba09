//! Contracts for the remote server and an HTTP implementation of them.
//!
//! The orchestrator talks to three collaborators:
//! - [`QueryService`] - parameterized projection queries returning scalar rows
//! - [`RemoteOperationService`] - asynchronous operations polled to completion
//! - [`RemoteFileStore`] - original-file metadata and byte-range reads
//!
//! [`HttpSession`] implements all three against the server's JSON API. Tests
//! substitute in-memory fakes; nothing in the crate holds a process-wide
//! session.

mod constants;
mod error;
mod http;
pub mod operation;
pub mod query;

pub use constants::{CONNECT_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_SERVER, READ_TIMEOUT_SECS};
pub use error::ServiceError;
pub use http::{ConnectionSettings, Credentials, HttpSession};
pub use operation::{
    ExpectedResponse, FoundChildren, HandleStatus, OperationDescriptor, OperationResponse,
    RemoteFailure, RequestHandle, ResponseKind, UsedFiles, UsedFilesLegacy,
};
pub use query::{ParamValue, QueryParams, Rows, ScalarValue};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::FileId;

/// Metadata of a remote original file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// File id.
    pub id: FileId,
    /// File name without directories.
    pub name: String,
    /// Directory of the file within the server's repository.
    #[serde(default)]
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Checksum as a lowercase hex string, when the server recorded one.
    #[serde(default)]
    pub hash: Option<String>,
    /// Name of the checksum algorithm, e.g. `SHA-256`.
    #[serde(default)]
    pub hasher: Option<String>,
}

/// Runs projection queries.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Executes `query` with `params` bound and returns every row.
    async fn projection(&self, query: &str, params: &QueryParams) -> Result<Rows, ServiceError>;
}

/// Submits and polls asynchronous server-side operations.
#[async_trait]
pub trait RemoteOperationService: Send + Sync {
    /// Submits an operation, returning a handle to poll.
    async fn submit(&self, descriptor: &OperationDescriptor)
    -> Result<RequestHandle, ServiceError>;

    /// Reports the current state of a submitted operation.
    async fn poll(&self, handle: &RequestHandle) -> Result<HandleStatus, ServiceError>;

    /// Releases server resources held by a handle.
    async fn close(&self, handle: &RequestHandle) -> Result<(), ServiceError>;
}

/// Reads original files.
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// Looks up metadata for a file.
    ///
    /// Returns [`ServiceError::NotFound`] if the file does not exist.
    async fn metadata(&self, id: FileId) -> Result<RemoteFile, ServiceError>;

    /// Reads up to `length` bytes starting at `offset`.
    ///
    /// A short read means the end of the file was reached.
    async fn read(&self, id: FileId, offset: u64, length: u64) -> Result<Vec<u8>, ServiceError>;
}
