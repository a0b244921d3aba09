//! Error types for calls against the remote service.
//!
//! Every variant carries the URL (or resource) that failed so log lines and
//! user-facing messages can say exactly which call broke.

use thiserror::Error;

/// Errors returned by the remote collaborators (query, operation, file store).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error calling {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The call did not complete within the client timeout.
    #[error("timeout calling {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Unexpected HTTP status.
    #[error("HTTP {status} calling {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server rejected the credentials or session key.
    #[error("[AUTH] server refused authorization (HTTP {status}) at {url}")]
    AuthRequired {
        /// The URL that rejected the request.
        url: String,
        /// The HTTP status code (401 or 403).
        status: u16,
    },

    /// The requested resource does not exist.
    #[error("not found: {resource}")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },

    /// The server answered with a body that does not fit the protocol.
    #[error("malformed response from {url}: {reason}")]
    Malformed {
        /// The URL whose response could not be decoded.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The configured server address cannot be turned into a URL.
    #[error("invalid server address: {address}")]
    InvalidAddress {
        /// The address as configured.
        address: String,
    },
}

impl ServiceError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an authorization error.
    pub fn auth_required(url: impl Into<String>, status: u16) -> Self {
        Self::AuthRequired {
            url: url.into(),
            status,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-address error.
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    /// Returns true if repeating the same call may succeed.
    ///
    /// | Error | Transient |
    /// |-------|-----------|
    /// | Timeout | yes |
    /// | Network (TLS/certificate) | no |
    /// | Network (other) | yes |
    /// | HTTP 408, 429, 5xx | yes |
    /// | everything else | no |
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network { source, .. } => !is_tls_error(source),
            Self::HttpStatus { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            Self::AuthRequired { .. }
            | Self::NotFound { .. }
            | Self::Malformed { .. }
            | Self::InvalidAddress { .. } => false,
        }
    }

    /// Returns true if the error means the session is not authorized.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
