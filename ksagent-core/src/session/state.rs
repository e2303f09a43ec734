//! Session kinds, lifecycle states and metadata snapshots

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::ResourceRef;
use crate::error::SessionError;

/// Unique identifier for a streaming session
pub type SessionId = String;

/// Unique identifier for a control-plane connection
pub type ConnectionId = String;

/// Kind of long-lived interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Watch,
    Exec,
    Log,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Watch => "watch",
            Self::Exec => "exec",
            Self::Log => "log",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a session
///
/// `Created -> Open -> Closed`, with `Created -> Closed` for a failed open.
/// Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Registered, underlying subscribe/exec-start not yet confirmed
    Created,
    /// Streaming
    Open,
    /// Torn down
    Closed,
}

impl SessionState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Open) | (Self::Created, Self::Closed) | (Self::Open, Self::Closed)
        )
    }

    /// Returns the next state or an error for a forbidden move
    pub fn transition(self, next: SessionState) -> Result<SessionState, SessionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SessionError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a session's metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub connection_id: ConnectionId,
    pub resource: ResourceRef,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}
