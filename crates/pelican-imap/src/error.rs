//! Error types for the session core.

use thiserror::Error;

/// Errors surfaced by the session core.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Malformed server response the parser cannot advance past. Fatal for
    /// the connection: the session aborts the transport when it sees this.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Byte offset into the live buffer where the fault was detected.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Server completed a command with NO.
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server completed a command with BAD.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// Operation attempted in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Connection was lost before the operation completed.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::from(io);
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_parse_display() {
        let err = Error::Parse {
            position: 12,
            message: "unterminated quoted string".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("position 12"));
        assert!(text.contains("unterminated"));
    }
}
