//! Outbound response sink shared by everything on one connection
//!
//! Every frame for a connection goes through a single bounded channel drained
//! by one writer, so whole frames are written one at a time. A session pushes
//! through its own [`SessionEmitter`], one frame at a time, which keeps its
//! frames in order and makes a full channel stall only the sessions that are
//! actively trying to send.

use tokio::sync::mpsc;

use crate::error::SinkClosed;
use crate::protocol::{OutboundFrame, Response, SessionEvent};
use crate::session::{ConnectionId, SessionId, SessionKind};

/// Cloneable handle used to send frames to one connection
#[derive(Debug, Clone)]
pub struct ResponseSink {
    connection_id: ConnectionId,
    tx: mpsc::Sender<OutboundFrame>,
}

impl ResponseSink {
    /// Create a sink and the receiving half that the connection writer drains
    pub fn channel(
        connection_id: impl Into<ConnectionId>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            connection_id: connection_id.into(),
            tx,
        };
        (sink, rx)
    }

    /// Connection this sink writes to
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a frame, waiting for capacity
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), SinkClosed> {
        self.tx.send(frame).await.map_err(|_| SinkClosed)
    }

    /// Queue the reply to one inbound command
    pub async fn reply(
        &self,
        request_id: Option<String>,
        response: Response,
    ) -> Result<(), SinkClosed> {
        self.send(OutboundFrame::Response {
            request_id,
            response,
        })
        .await
    }

    /// Whether the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Emitter that stamps frames for one session
    pub fn session_emitter(&self, session_id: SessionId, kind: SessionKind) -> SessionEmitter {
        SessionEmitter {
            sink: self.clone(),
            session_id,
            kind,
            next_seq: 0,
        }
    }
}

/// Sends the frames of a single session in emission order
#[derive(Debug)]
pub struct SessionEmitter {
    sink: ResponseSink,
    session_id: SessionId,
    kind: SessionKind,
    next_seq: u64,
}

impl SessionEmitter {
    /// Push one event; sequence numbers increase by one per emitted frame
    pub async fn emit(&mut self, event: SessionEvent) -> Result<(), SinkClosed> {
        let frame = OutboundFrame::Session {
            session_id: self.session_id.clone(),
            session_kind: self.kind,
            seq: self.next_seq,
            event,
        };
        self.sink.send(frame).await?;
        self.next_seq += 1;
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
