//! Error types for the chat engine.

use std::io;

/// Result type for chat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while framing, transporting, or routing messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame was shorter than its header or declared payload.
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected byte count.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// Frame contents violate the wire format.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Payload exceeds the 14-bit length field.
    #[error("payload too long: {len} bytes (limit {limit})")]
    PayloadTooLong {
        /// Payload byte count.
        len: usize,
        /// Maximum encodable payload length.
        limit: usize,
    },

    /// Nickname does not fit the 32-byte wire field.
    #[error("nickname too long: {len} bytes (limit {limit})")]
    NicknameTooLong {
        /// Nickname byte count.
        len: usize,
        /// Maximum nickname field length.
        limit: usize,
    },

    /// Malformed server-to-server control record.
    #[error("invalid control record: {0}")]
    InvalidControl(String),

    /// A `host:port` string could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Connecting to a remote server took too long.
    #[error("dial timed out connecting to {host}:{port}")]
    DialTimeout {
        /// Remote hostname.
        host: String,
        /// Remote port.
        port: u16,
    },
}

impl Error {
    /// Check if this error means the peer went away (reset, broken pipe, EOF).
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            Self::Truncated { .. } => true,
            _ => false,
        }
    }

    /// Check if this error is a wire-format violation rather than an I/O failure.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrame(_)
                | Self::PayloadTooLong { .. }
                | Self::NicknameTooLong { .. }
                | Self::InvalidControl(_)
        )
    }
}
