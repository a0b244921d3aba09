//! Exit code logic for the download process.
//!
//! Single responsibility: map a run's outcome to the process exit code.

use std::process::ExitCode;

use thiserror::Error;

use super::DownloadSummary;
use crate::graph::GraphError;
use crate::paths::PathError;
use crate::remote::ServiceError;
use crate::request::RequestError;
use crate::transfer::TransferError;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessExit {
    /// Every required file is present locally.
    Success = 0,
    /// Help was printed; nothing was done.
    Help = 1,
    /// Bad arguments, conflicting flags, no targets, or nothing matched.
    Usage = 2,
    /// Authentication, server, protocol, or local IO failure.
    Failure = 3,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Errors that end a run before every wanted file was attempted.
#[derive(Debug, Error)]
pub enum RunError {
    /// The targets resolved to no images.
    #[error("no images found for the given targets")]
    NoImages,

    /// The session could not be established.
    #[error("cannot connect: {0}")]
    Connect(#[source] ServiceError),

    /// A projection query failed.
    #[error("query failed: {0}")]
    Query(#[source] ServiceError),

    /// The server answered a query with rows of an unexpected shape.
    #[error("unexpected query result: {reason}")]
    Protocol {
        /// What was wrong with the rows.
        reason: String,
    },

    /// A remote operation failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Resolution results contradicted each other.
    #[error("inconsistent server answers: {0}")]
    Graph(#[from] GraphError),

    /// The base directory is unusable.
    #[error(transparent)]
    Paths(#[from] PathError),

    /// A transfer failed in a way that aborts the run.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The run was interrupted.
    #[error("interrupted")]
    Cancelled,
}

impl RunError {
    /// Creates a protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Returns the exit code this error maps to.
    #[must_use]
    pub fn exit(&self) -> ProcessExit {
        match self {
            Self::NoImages => ProcessExit::Usage,
            _ => ProcessExit::Failure,
        }
    }
}

/// Determines the process exit outcome of a run that reached the download phase.
///
/// Files pulled in only by whole-container expansion may fail without
/// failing the run; a failed file owned by an explicitly requested image may not.
pub(crate) fn determine_exit_outcome(summary: &DownloadSummary) -> ProcessExit {
    if summary.required_failed == 0 {
        ProcessExit::Success
    } else {
        ProcessExit::Failure
    }
}
