//! Error context types shared across the workspace.

use std::fmt;

/// Socket-level failure on a session: connect, frame I/O, or connection loss.
///
/// Fatal for the affected session, never for a proposal as a whole.
#[derive(Debug)]
pub struct TransportError;

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("transport failure")
    }
}

impl std::error::Error for TransportError {}

/// The first frame on a new session was not a handshake.
#[derive(Debug)]
pub struct ProtocolViolation;

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected handshake frame")
    }
}

impl std::error::Error for ProtocolViolation {}

/// Shutdown was requested while an operation was in flight.
#[derive(Debug)]
pub struct Aborted;

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("node is shutting down")
    }
}

impl std::error::Error for Aborted {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(TransportError.to_string(), "transport failure");
        assert_eq!(ProtocolViolation.to_string(), "expected handshake frame");
        assert_eq!(Aborted.to_string(), "node is shutting down");
        let _: &dyn std::error::Error = &TransportError;
    }
}
