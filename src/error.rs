//! Error types shared across the server.
//!
//! Each layer has its own `thiserror` enum so callers can decide how to
//! recover:
//!
//! - **`ScpiError`**: protocol-level failures that are reported back to the
//!   client as a `<code>,"<description>;<info>"` line. Only invalid syntax
//!   (-102) and a wrong parameter count (-115) are modelled.
//! - **`CommandError`**: everything that can go wrong while executing a single
//!   request. Only the `Scpi` variant is written to the client; the others are
//!   logged and the remainder of the input line is dropped.
//! - **`SessionError`**: lifecycle and driver failures of a wavemeter session.
//! - **`ServerError`**: listener setup failures.
//!
//! Driver, channel-list, factory and configuration errors live next to the
//! code that raises them (`DriverError`, `ChannelListError`,
//! `UnknownMeasurementKind`, `ConfigError`).

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;
use crate::ProductId;

/// Errors reported to a client on the wire.
///
/// The `Display` implementation produces the exact reply line (without the
/// trailing newline).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScpiError {
    #[error("-102,\"Invalid syntax;{0}\"")]
    InvalidSyntax(String),

    /// The offending argument is kept for logging only; the reply line
    /// carries no info text.
    #[error("-115,\"Unexpected number of parameters;\"")]
    UnexpectedParameterCount(String),
}

impl ScpiError {
    /// Numeric SCPI error code.
    pub fn code(&self) -> i32 {
        match self {
            ScpiError::InvalidSyntax(_) => -102,
            ScpiError::UnexpectedParameterCount(_) => -115,
        }
    }
}

/// Failure of a single protocol request.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Scpi(#[from] ScpiError),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command '{command}' timed out after {timeout:?}")]
    DeviceTimeout { command: String, timeout: Duration },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Failures of a wavemeter session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Wavemeter {0} already has a connected session")]
    AlreadyConnected(ProductId),

    #[error("Wavemeter {0} is not connected")]
    NotConnected(ProductId),

    #[error("Wavemeter {0} is not available")]
    InstrumentUnavailable(ProductId),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Worker thread of wavemeter {0} stopped")]
    WorkerStopped(ProductId),
}

/// Failures while setting up or running a network server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scpi_error_wire_format() {
        let err = ScpiError::InvalidSyntax("(@1;2)".to_string());
        assert_eq!(err.to_string(), "-102,\"Invalid syntax;(@1;2)\"");
        assert_eq!(err.code(), -102);

        let err = ScpiError::UnexpectedParameterCount("3".to_string());
        assert_eq!(err.to_string(), "-115,\"Unexpected number of parameters;\"");
        assert_eq!(err.code(), -115);
    }

    #[test]
    fn test_session_error_from_driver() {
        let err: SessionError = DriverError::LowSignal.into();
        assert!(matches!(err, SessionError::Driver(DriverError::LowSignal)));
        assert!(err.to_string().starts_with("Driver error"));
    }
}
