//! Wire protocol message types
//!
//! The control plane sends [`InboundCommand`]s and receives [`OutboundFrame`]s.
//! One-shot verbs are answered by a single `response` frame; streaming verbs are
//! answered by a `response` carrying the session id followed by `session` frames.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{SessionId, SessionKind};

/// The fixed verb vocabulary understood by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    List,
    Get,
    Create,
    Delete,
    UpdateYaml,
    UpdateObj,
    Exec,
    Stdin,
    OpenLog,
    CloseLog,
    Apply,
    Status,
}

impl Verb {
    /// Every verb, in wire-table order
    pub const ALL: [Verb; 12] = [
        Verb::List,
        Verb::Get,
        Verb::Create,
        Verb::Delete,
        Verb::UpdateYaml,
        Verb::UpdateObj,
        Verb::Exec,
        Verb::Stdin,
        Verb::OpenLog,
        Verb::CloseLog,
        Verb::Apply,
        Verb::Status,
    ];

    /// Parses the wire spelling of a verb (case-sensitive)
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.as_str() == value)
    }

    /// Wire spelling used by the control plane
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::UpdateYaml => "update_yaml",
            Self::UpdateObj => "update_obj",
            Self::Exec => "exec",
            Self::Stdin => "stdin",
            Self::OpenLog => "openLog",
            Self::CloseLog => "closeLog",
            Self::Apply => "apply",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command received from the control plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundCommand {
    /// Correlation id echoed back on the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Resource kind, e.g. `pod`
    pub resource: String,
    /// Verb wire spelling, e.g. `list`
    pub action: String,
    /// Opaque handler payload
    #[serde(default)]
    pub payload: Value,
}

/// Result of a single command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Successful response carrying `data`
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// Failed response carrying an error message
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Why a session ended on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The upstream stream or process finished
    Completed,
    /// The upstream stream failed
    UpstreamError,
    /// An exec session saw no traffic for the configured idle period
    IdleTimeout,
}

/// Payload of a streaming frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Exec stdout/stderr chunk or a followed log line
    Output { data: String },
    /// Watch notification
    Event { data: Value },
    /// The session ended without being asked to
    Closed {
        reason: CloseReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Messages sent from the agent to the control plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundFrame {
    /// Reply to one inbound command
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(flatten)]
        response: Response,
    },

    /// Frame pushed by a streaming session
    Session {
        session_id: SessionId,
        session_kind: SessionKind,
        /// Per-session sequence number, starting at 0
        seq: u64,
        event: SessionEvent,
    },
}

impl OutboundFrame {
    /// Session id for streaming frames
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Session { session_id, .. } => Some(session_id),
            Self::Response { .. } => None,
        }
    }
}
