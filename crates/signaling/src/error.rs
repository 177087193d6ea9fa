//! Error types for the signaling stack

/// Result type alias using the signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in signaling, RPC and negotiation operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport connect/send/close failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport connect did not finish in time
    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    /// Malformed envelope or unknown method
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reply received for an outbound call
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i32,
        /// Human-readable message from the remote side
        message: String,
    },

    /// The RPC channel was terminated before a reply arrived
    #[error("Channel terminated: {0}")]
    Terminated(String),

    /// Unmasked description failure; fatal to establishment
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// ICE candidate could not be applied
    #[error("ICE candidate error: {0}")]
    CandidateApplication(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Check if this error came from channel termination
    pub fn is_terminated(&self) -> bool {
        matches!(self, Error::Terminated(_))
    }

    /// Check if this error is a transport-level failure
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::ConnectTimeout(_) | Error::Io(_)
        )
    }

    /// Check if this error is fatal to session establishment
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_) | Error::CandidateApplication(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Terminated("terminated".to_string());
        assert_eq!(err.to_string(), "Channel terminated: terminated");

        let err = Error::Remote {
            code: -32601,
            message: "Method not found".to_string(),
        };
        assert_eq!(err.to_string(), "Remote error -32601: Method not found");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::Terminated("x".to_string()).is_terminated());
        assert!(Error::ConnectTimeout("x".to_string()).is_transport_error());
        assert!(!Error::Protocol("x".to_string()).is_transport_error());
        assert!(Error::Negotiation("x".to_string()).is_negotiation_error());
        assert!(Error::CandidateApplication("x".to_string()).is_negotiation_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_transport_error());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = Error::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert!(matches!(err, Error::Serialization(_)));
        assert!(!err.is_transport_error());
        assert!(!err.is_negotiation_error());
    }
}
