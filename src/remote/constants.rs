//! Constants for the remote session (address defaults, timeouts).

/// Server host used when none is configured.
pub const DEFAULT_SERVER: &str = "localhost";

/// Server port used when none is configured.
pub const DEFAULT_PORT: u16 = 4064;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large byte ranges).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Header carrying the session key on every authenticated call.
pub(crate) const SESSION_KEY_HEADER: &str = "X-Session-Key";
