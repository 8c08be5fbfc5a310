//! Protocol error types

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Datagram was shorter than the fixed header size
    #[error("packet too short: expected at least {expected}, got {got}")]
    PacketTooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        got: usize,
    },

    /// Header described an impossible or unsupported flag combination
    #[error("invalid flag combination: {0:#04x}")]
    InvalidFlags(u8),

    /// Operation descriptor payload was malformed
    #[error("invalid operation descriptor: {0}")]
    InvalidOperation(String),

    /// File name payload was empty or otherwise unusable
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    /// Handshake did not complete within the configured number of attempts
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A reliable send exhausted its retry budget
    #[error("operation timed out")]
    Timeout,

    /// No datagram arrived on an established connection for the idle window
    #[error("connection idle for too long")]
    IdleTimeout,

    /// Peer reset or otherwise terminated the connection
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A file-store operation failed
    #[error("file error: {0}")]
    File(#[from] crate::filestore::FileError),
}
