//! One control-plane connection
//!
//! Reads text frames, dispatches each command on its own task, and writes
//! every outbound frame through a single writer. When the inbound side ends or
//! the writer fails, the connection is lost and all of its sessions are torn
//! down.

use std::fmt::Display;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::dispatch::Dispatcher;
use crate::protocol::{InboundCommand, OutboundFrame, Response};
use crate::session::ConnectionId;
use crate::sink::ResponseSink;

/// Serves commands arriving on one channel
pub struct Connection {
    id: ConnectionId,
    dispatcher: Dispatcher,
    config: RouterConfig,
}

impl Connection {
    pub fn new(dispatcher: Dispatcher, config: RouterConfig) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), dispatcher, config)
    }

    pub fn with_id(id: impl Into<ConnectionId>, dispatcher: Dispatcher, config: RouterConfig) -> Self {
        Self {
            id: id.into(),
            dispatcher,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until `inbound` ends or `outbound` fails
    ///
    /// Commands still in flight when the inbound side ends get the teardown
    /// timeout to reply. Returns the number of sessions torn down.
    pub async fn serve<I, O>(self, inbound: I, outbound: O) -> usize
    where
        I: Stream<Item = String> + Send + Unpin,
        O: Sink<String> + Send + Unpin + 'static,
        O::Error: Display,
    {
        let Self {
            id,
            dispatcher,
            config,
        } = self;
        let mut inbound = inbound;
        let (sink, rx) = ResponseSink::channel(id.clone(), config.outbound_buffer);
        let mut writer = tokio::spawn(write_frames(id.clone(), rx, outbound));
        let mut tasks: JoinSet<()> = JoinSet::new();

        info!(connection_id = %id, "Connection opened");

        let writer_failed = loop {
            tokio::select! {
                message = inbound.next() => match message {
                    Some(text) => accept(&dispatcher, &sink, &mut tasks, &text),
                    None => break false,
                },
                _ = &mut writer => break true,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined
                        && err.is_panic()
                    {
                        warn!(connection_id = %id, "Command task panicked");
                    }
                }
            }
        };

        let grace = dispatcher.sessions().config().teardown_timeout();
        if writer_failed {
            debug!(connection_id = %id, "Outbound channel failed");
            tasks.shutdown().await;
        } else {
            let drained = tokio::time::timeout(grace, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(connection_id = %id, pending = tasks.len(), "Abandoning commands in flight");
                tasks.shutdown().await;
            }
        }

        let torn_down = dispatcher.sessions().drop_connection(&id).await;

        drop(sink);
        if !writer_failed && tokio::time::timeout(grace, &mut writer).await.is_err() {
            writer.abort();
        }

        info!(connection_id = %id, sessions = torn_down, "Connection closed");
        torn_down
    }
}

/// Parse one inbound text frame and dispatch it on its own task
fn accept(dispatcher: &Dispatcher, sink: &ResponseSink, tasks: &mut JoinSet<()>, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }

    match serde_json::from_str::<InboundCommand>(text) {
        Ok(command) => {
            let dispatcher = dispatcher.clone();
            let ctx = dispatcher.context(sink.clone());
            tasks.spawn(async move {
                if dispatcher.dispatch_and_reply(&ctx, command).await.is_err() {
                    debug!(connection_id = %ctx.connection_id, "Reply dropped, connection gone");
                }
            });
        }
        Err(err) => {
            debug!(connection_id = %sink.connection_id(), error = %err, "Malformed command");
            let request_id = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|value| value.get("requestId")?.as_str().map(str::to_string));
            let response = Response::failure(format!("invalid message: {}", err));
            let sink = sink.clone();
            tasks.spawn(async move {
                let _ = sink.reply(request_id, response).await;
            });
        }
    }
}

/// Single writer: whole frames go out one at a time
async fn write_frames<O>(connection_id: ConnectionId, mut rx: mpsc::Receiver<OutboundFrame>, mut outbound: O)
where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "Failed to encode frame");
                continue;
            }
        };
        if let Err(err) = outbound.send(text).await {
            warn!(connection_id = %connection_id, error = %err, "Failed to write frame");
            return;
        }
    }
    let _ = outbound.close().await;
}
