//! The session contract between the router and the cluster collaborator
//!
//! A collaborator that starts a watch, log follow or exec hands back a
//! [`SessionIo`]: the stream of things to push to the caller, an optional
//! stdin sender, and a teardown hook that releases the upstream resource.

use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ClusterError;
use crate::protocol::SessionEvent;

/// One item produced by an upstream source
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Text output (exec stdout, a log line)
    Output(String),
    /// Structured watch notification
    Event(Value),
}

impl From<StreamItem> for SessionEvent {
    fn from(item: StreamItem) -> Self {
        match item {
            StreamItem::Output(data) => SessionEvent::Output { data },
            StreamItem::Event(data) => SessionEvent::Event { data },
        }
    }
}

/// Upstream output of a session
pub type OutputStream = BoxStream<'static, Result<StreamItem, ClusterError>>;

/// Releases the upstream stream or process; runs exactly once
pub type Teardown = Box<dyn FnOnce() + Send + 'static>;

/// Follow-up frame routed to a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Bytes for the process stdin
    Stdin(Vec<u8>),
    /// Close the process stdin
    Eof,
}

/// Handles to a started upstream stream or process
pub struct SessionIo {
    pub(crate) output: OutputStream,
    pub(crate) stdin: Option<mpsc::Sender<Vec<u8>>>,
    pub(crate) teardown: TeardownGuard,
}

impl SessionIo {
    /// Session fed by `output` only
    pub fn new(output: OutputStream) -> Self {
        Self {
            output,
            stdin: None,
            teardown: TeardownGuard::new(None),
        }
    }

    /// Attach a stdin sender (exec sessions)
    #[must_use]
    pub fn with_stdin(mut self, stdin: mpsc::Sender<Vec<u8>>) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Attach the hook that releases the upstream resource
    ///
    /// The hook also runs if the value is dropped before a session takes it over.
    #[must_use]
    pub fn with_teardown(mut self, teardown: impl FnOnce() + Send + 'static) -> Self {
        self.teardown = TeardownGuard::new(Some(Box::new(teardown)));
        self
    }

    /// Whether follow-up stdin frames can be routed to this session
    pub fn accepts_input(&self) -> bool {
        self.stdin.is_some()
    }

    /// Release the upstream resource without ever driving the session
    pub(crate) fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for SessionIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIo")
            .field("stdin", &self.stdin.is_some())
            .field("teardown", &self.teardown.0.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs the teardown hook when dropped, including when the owning task is aborted
pub(crate) struct TeardownGuard(Option<Teardown>);

impl TeardownGuard {
    pub(crate) fn new(teardown: Option<Teardown>) -> Self {
        Self(teardown)
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(teardown) = self.0.take() {
            teardown();
        }
    }
}
