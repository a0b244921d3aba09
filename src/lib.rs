//! OMERO Downloader Core Library
//!
//! This library resolves image, dataset, project (or any other container)
//! targets on an OMERO server into the set of original files backing them,
//! and downloads those files into a local directory tree.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`model`] - Typed ids and file-role classification
//! - [`target`] - `Type:id[,id...]` target parsing
//! - [`remote`] - Server collaborator traits and their HTTP implementation
//! - [`request`] - Submit-and-poll executor for asynchronous server operations
//! - [`graph`] - Bookkeeping of wanted images, filesets and files
//! - [`paths`] - Local directory layout
//! - [`transfer`] - Verified, atomic file downloads
//! - [`orchestrator`] - The end-to-end run and its exit codes

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod remote;
pub mod request;
pub mod target;
pub mod transfer;

// Re-export commonly used types
pub use graph::{GraphError, RelationshipGraph, WantedFile};
pub use model::{ContainerId, EntityId, FileId, FileRole, FileRoleFilter, StorageLayout};
pub use orchestrator::{
    DownloadSummary, ProcessExit, RunError, RunSettings, run, run_with_services,
};
pub use paths::{LocalPaths, PathError};
pub use remote::{ConnectionSettings, Credentials, HttpSession, ServiceError};
pub use request::{ExecutorSettings, RequestError, RequestExecutor};
pub use target::{Target, TargetError, parse_targets};
pub use transfer::{TransferError, TransferManager, TransferOutcome};
