//! Error types for the request executor.

use std::time::Duration;

use thiserror::Error;

use crate::remote::{RemoteFailure, ResponseKind, ServiceError};

/// Ways a remote operation can fail to produce the response a caller asked for.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The operation finished with a response of a different shape than expected.
    ///
    /// Indicates client/server version skew; never retried.
    #[error("{description}: expected {expected} response but server returned {actual}")]
    ProtocolMismatch {
        /// What the caller was trying to do.
        description: String,
        /// The shape the caller required.
        expected: ResponseKind,
        /// The shape the server sent.
        actual: ResponseKind,
    },

    /// The server reported an application-level failure for the operation.
    #[error("{description} failed: {diagnostic}")]
    OperationFailed {
        /// What the caller was trying to do.
        description: String,
        /// The server's diagnostic.
        diagnostic: RemoteFailure,
    },

    /// The operation did not reach a terminal state within the wait bound.
    #[error("{description} did not complete within {}ms", waited.as_millis())]
    Timeout {
        /// What the caller was trying to do.
        description: String,
        /// How long the executor waited.
        waited: Duration,
    },

    /// Polling was interrupted.
    #[error("{description} cancelled")]
    Cancelled {
        /// What the caller was trying to do.
        description: String,
    },

    /// Submitting or polling failed at the transport level.
    #[error("{description}: {source}")]
    Remote {
        /// What the caller was trying to do.
        description: String,
        /// The underlying service error.
        #[source]
        source: ServiceError,
    },
}

impl RequestError {
    /// Creates a protocol mismatch error.
    pub fn protocol_mismatch(
        description: impl Into<String>,
        expected: ResponseKind,
        actual: ResponseKind,
    ) -> Self {
        Self::ProtocolMismatch {
            description: description.into(),
            expected,
            actual,
        }
    }

    /// Creates an operation failure error.
    pub fn operation_failed(description: impl Into<String>, diagnostic: RemoteFailure) -> Self {
        Self::OperationFailed {
            description: description.into(),
            diagnostic,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(description: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            description: description.into(),
            waited,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(description: impl Into<String>) -> Self {
        Self::Cancelled {
            description: description.into(),
        }
    }

    /// Wraps a service error.
    pub fn remote(description: impl Into<String>, source: ServiceError) -> Self {
        Self::Remote {
            description: description.into(),
            source,
        }
    }

    /// Returns true if the server and client disagree about the protocol.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::ProtocolMismatch { .. })
            || matches!(
                self,
                Self::Remote {
                    source: ServiceError::Malformed { .. },
                    ..
                }
            )
    }

    /// Returns true if the error was caused by the session not being authorized.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Remote { source, .. } if source.is_auth())
    }
}
