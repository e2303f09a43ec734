//! Error types for ksagent-core

use thiserror::Error;

use crate::protocol::Verb;
use crate::session::{SessionId, SessionState};

/// Top-level error type for ksagent-core
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

/// Errors raised while building the action registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("action '{verb}' is already registered for resource '{kind}'")]
    DuplicateAction { kind: String, verb: Verb },
}

/// Errors reported back to the caller of a single command
///
/// The `Display` strings are what the control plane sees in `Response.error`.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unsupported action")]
    UnsupportedAction { kind: String, action: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Upstream(#[from] ClusterError),
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Errors related to streaming sessions
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found")]
    NotFound(SessionId),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("session does not accept input")]
    InputNotSupported(SessionId),

    /// The underlying subscribe/exec-start failed; message passed through verbatim
    #[error(transparent)]
    Upstream(#[from] ClusterError),
}

/// Errors from the cluster collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{0}")]
    Api(String),

    #[error("{0} is not supported by this cluster")]
    Unsupported(String),
}

/// The outbound channel of a connection has gone away
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("response sink closed")]
pub struct SinkClosed;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== DispatchError Tests ====================

    #[test]
    fn unsupported_action_displays_fixed_message() {
        let error = DispatchError::UnsupportedAction {
            kind: "pod".to_string(),
            action: "explode".to_string(),
        };
        assert_eq!(error.to_string(), "unsupported action");
    }

    #[test]
    fn session_not_found_displays_fixed_message() {
        let error: DispatchError = SessionError::NotFound("xyz".to_string()).into();
        assert_eq!(error.to_string(), "session not found");
    }

    #[test]
    fn upstream_error_passes_through_verbatim() {
        let error: DispatchError = ClusterError::Api("etcdserver: request timed out".into()).into();
        assert_eq!(error.to_string(), "etcdserver: request timed out");
    }

    #[test]
    fn session_upstream_error_passes_through_verbatim() {
        let error: DispatchError = SessionError::Upstream(ClusterError::NotFound {
            kind: "pod".to_string(),
            name: "web-0".to_string(),
        })
        .into();
        assert_eq!(error.to_string(), "pod \"web-0\" not found");
    }

    #[test]
    fn json_error_converts_to_invalid_payload() {
        let json_error = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let error: DispatchError = json_error.into();
        assert!(matches!(error, DispatchError::InvalidPayload(_)));
        assert!(error.to_string().starts_with("invalid payload:"));
    }

    // ==================== RegistryError Tests ====================

    #[test]
    fn duplicate_action_names_kind_and_verb() {
        let error = RegistryError::DuplicateAction {
            kind: "pod".to_string(),
            verb: Verb::Exec,
        };
        let message = error.to_string();
        assert!(message.contains("pod"));
        assert!(message.contains("exec"));
    }

    // ==================== SessionError Tests ====================

    #[test]
    fn invalid_transition_names_both_states() {
        let error = SessionError::InvalidStateTransition {
            from: SessionState::Closed,
            to: SessionState::Open,
        };
        let message = error.to_string();
        assert!(message.contains("closed"));
        assert!(message.contains("open"));
    }

    // ==================== AgentError Tests ====================

    #[test]
    fn agent_error_converts_from_registry_error() {
        let error: AgentError = RegistryError::DuplicateAction {
            kind: "node".to_string(),
            verb: Verb::Get,
        }
        .into();
        assert!(matches!(error, AgentError::Registry(_)));
        assert!(error.to_string().contains("Registry error"));
    }

    #[test]
    fn agent_error_converts_from_cluster_error() {
        let error: AgentError = ClusterError::Unsupported("apply".to_string()).into();
        assert!(matches!(error, AgentError::Cluster(_)));
    }
}
