//! Error types for the SMTP protocol engine.

use std::io;

use thiserror::Error;

/// Errors observable from a single SMTP session.
///
/// Framing errors (`LineTooLong`, `InvalidSentinel`) are recovered locally
/// with a 500 reply; the remaining kinds terminate the session.
#[derive(Debug, Error)]
pub enum SmtpError {
    /// Transport failure on the client connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read or write exceeded the idle deadline.
    #[error("session timed out")]
    Timeout,

    /// A command line exceeded the maximum line length before CRLF.
    #[error("command line too long")]
    LineTooLong,

    /// A line ended in a bare LF without the preceding CR.
    #[error("line not terminated with CRLF")]
    InvalidSentinel,

    /// A MAIL or RCPT command carried no `<...>` address span.
    #[error("could not find email address in command syntax")]
    AddressNotFound,

    /// The message body exceeded the maximum size allowed.
    #[error("message body was over maximum size allowed")]
    MessageTooLong,

    /// The server is draining and refuses new work.
    #[error("service shutting down")]
    InShutdown,

    /// The client closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A reply overflowed its formatting buffer.
    #[error("response formatting error: {0}")]
    Format(#[from] core::fmt::Error),
}

impl SmtpError {
    /// Returns `true` for exits that are part of normal operation and
    /// warrant at most a debug log line.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::Timeout | Self::InShutdown)
    }
}

/// Errors raised by the accept loop.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind the listening socket. Fatal.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A single accept failed. Logged; the loop continues.
    #[error("failed to accept connection: {0}")]
    Accept(#[from] io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(SmtpError::Timeout.to_string(), "session timed out");
        assert_eq!(
            SmtpError::AddressNotFound.to_string(),
            "could not find email address in command syntax"
        );

        let err = ListenerError::Bind {
            address: "0.0.0.0:1025".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(
            err.to_string(),
            "failed to bind to 0.0.0.0:1025: address in use"
        );

        let err = ListenerError::Accept(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert_eq!(
            err.to_string(),
            "failed to accept connection: connection reset"
        );
    }

    #[test]
    fn benign_exits() {
        assert!(SmtpError::Timeout.is_benign());
        assert!(SmtpError::InShutdown.is_benign());
        assert!(!SmtpError::Closed.is_benign());
        assert!(!SmtpError::LineTooLong.is_benign());
    }

    #[test]
    fn io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: SmtpError = io_err.into();
        assert!(matches!(err, SmtpError::Io(_)));
    }
}
