//! Error types for the microws agent

use microws_net::TransportError;
use microws_proto::{status, Exception, Status};
use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// The registry has no entry for a namespace
    #[error("Cannot find the namespace '{namespace}'")]
    NotFound {
        /// Namespace that was looked up
        namespace: String,
    },

    /// The registry channel is down
    #[error("Registry {registry} is unavailable")]
    DirectoryUnavailable {
        /// Registry host the agent is configured with
        registry: String,
    },

    /// A call failed, locally or on the remote side
    #[error("Call failed: {0}")]
    Call(#[from] Exception),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A service asked the container for something nobody provided
    #[error("Missing dependency: {0}")]
    MissingDependency(&'static str),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Status code this error travels with when returned from a procedure
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound { .. } => Status::from(status::NOT_FOUND),
            Self::DirectoryUnavailable { .. } => Status::from(status::DIRECTORY_UNAVAILABLE),
            Self::Call(exception) => exception.status.clone(),
            Self::Transport(TransportError::Closed) => Status::from(status::ABORT),
            Self::Serialization(_) => Status::from(status::BAD_REQUEST),
            _ => Status::from(status::INTERNAL),
        }
    }
}

impl From<AgentError> for Exception {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Call(exception) => exception,
            AgentError::Transport(e) => Exception::from(e),
            other => Exception::new(other.status(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = AgentError::NotFound {
            namespace: "a".to_string(),
        };
        assert_eq!(not_found.status(), Status::from(404));
        assert_eq!(not_found.to_string(), "Cannot find the namespace 'a'");

        let unavailable = AgentError::DirectoryUnavailable {
            registry: "127.0.0.1:8427".to_string(),
        };
        assert_eq!(unavailable.status(), Status::from(414));

        let config = AgentError::Config("missing namespace".to_string());
        assert_eq!(config.status(), Status::from(500));
    }

    #[test]
    fn test_call_exception_passes_through() {
        let remote = Exception::new(418, "teapot");
        let err = AgentError::from(remote.clone());

        assert_eq!(err.status(), Status::from(418));
        assert_eq!(Exception::from(err), remote);
    }

    #[test]
    fn test_into_exception() {
        let exception = Exception::from(AgentError::NotFound {
            namespace: "billing".to_string(),
        });

        assert_eq!(exception.status, Status::from(404));
        assert!(exception.message.contains("billing"));
    }
}
