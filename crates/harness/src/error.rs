use std::time::Duration;

use respcheck_core::CoreError;
use thiserror::Error;

/// Faults of the harness itself, never attributable to a submission.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Harness I/O fault: {0}")]
    Io(#[from] std::io::Error),

    #[error("Harness fault: {0}")]
    Internal(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Submission has no launch command")]
    EmptyCommand,

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server exited during startup ({status})")]
    ExitedEarly { status: String, stderr: String },
}

/// Failures of one client connection to a running submission.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Could not connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Connection to {addr} timed out after {}ms", .timeout.as_millis())]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("No response within {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("Server closed the connection before replying")]
    Closed,

    #[error("Connection error: {0}")]
    Io(std::io::Error),

    #[error("Session already closed")]
    NotOpen,

    /// The host could not create or use a socket at all.
    #[error("Socket unavailable on this host: {0}")]
    Host(std::io::Error),
}

impl SessionError {
    /// True when the error says something about the host rather than the
    /// submission.
    pub fn is_host_fault(&self) -> bool {
        matches!(self, Self::Host(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SessionError::Timeout {
            timeout: Duration::from_millis(2000),
        };
        assert_eq!(error.to_string(), "No response within 2000ms");

        let error = ProcessError::ExitedEarly {
            status: "exit status: 1".into(),
            stderr: String::new(),
        };
        assert!(error.to_string().contains("exit status: 1"));
    }

    #[test]
    fn test_host_fault_classification() {
        let host = SessionError::Host(std::io::Error::other("EMFILE"));
        assert!(host.is_host_fault());
        assert!(!SessionError::Closed.is_host_fault());
    }
}
