//! Error types for the RCON transport.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while talking to a remote console.
#[derive(Debug, Error)]
pub enum RconError {
    /// No response arrived within the configured timeout.
    #[error("RCON response timed out after {0:?}")]
    Timeout(Duration),

    /// The target refused the TCP connection (not listening yet, or gone).
    #[error("RCON connection refused")]
    ConnectionRefused,

    /// The peer reset or aborted the connection mid-exchange.
    #[error("RCON connection reset")]
    ConnectionReset,

    /// The peer closed the stream without sending anything.
    ///
    /// Source servers do this while sitting on a loading screen.
    #[error("RCON peer sent an empty response")]
    EmptyResponse,

    /// The server rejected the password.
    #[error("RCON authentication rejected")]
    AuthRejected,

    /// The command does not fit into one packet.
    #[error("RCON command is {len} bytes, maximum is {max}")]
    CommandTooLong {
        /// Encoded body length.
        len: usize,
        /// Largest accepted body length.
        max: usize,
    },

    /// The peer sent bytes that are not a valid RCON frame.
    #[error("RCON protocol violation: {0}")]
    Protocol(String),

    /// Any other socket error.
    #[error("RCON I/O error: {0}")]
    Io(#[source] io::Error),
}

impl RconError {
    /// Create a protocol violation error.
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Whether retrying the same command on a fresh connection can succeed.
    ///
    /// Only an oversized command is a caller bug that no retry can fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::CommandTooLong { .. })
    }

    /// Short label used in structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionReset => "connection_reset",
            Self::EmptyResponse => "empty_response",
            Self::AuthRejected => "auth_rejected",
            Self::CommandTooLong { .. } => "command_too_long",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }
}

impl From<io::Error> for RconError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionReset,
            io::ErrorKind::UnexpectedEof => Self::EmptyResponse,
            _ => Self::Io(err),
        }
    }
}

/// A specialized `Result` type for RCON operations.
pub type RconResult<T> = std::result::Result<T, RconError>;
