//! Command dispatch
//!
//! Resolves the handler for an inbound (resource, action) pair and turns its
//! outcome into a [`Response`]. Every failure becomes a failed response; nothing
//! here ends the connection.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::{DispatchError, SinkClosed};
use crate::handler::{HandlerOutcome, RequestContext};
use crate::protocol::{InboundCommand, Response};
use crate::registry::ActionRegistry;
use crate::session::{SessionManager, SessionStart};
use crate::sink::ResponseSink;

/// Routes commands to registered handlers
///
/// Cheap to share: the registry is immutable and the session manager does its
/// own locking, so any number of dispatches may run at once.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    sessions: Arc<SessionManager>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ActionRegistry>, sessions: Arc<SessionManager>) -> Self {
        Self { registry, sessions }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Request context for commands arriving on the connection behind `sink`
    pub fn context(&self, sink: ResponseSink) -> RequestContext {
        RequestContext::new(sink, Arc::clone(&self.sessions))
    }

    /// Run one command and return its response
    ///
    /// A session opened here starts emitting as soon as this returns. Use
    /// [`Dispatcher::dispatch_and_reply`] when the reply must precede the
    /// session's frames on the wire.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        resource: &str,
        action: &str,
        payload: Value,
    ) -> Response {
        let (response, start) = self.run(ctx, resource, action, payload).await;
        if let Some(start) = start {
            start.release();
        }
        response
    }

    /// Run one command and queue its reply on the context's sink
    ///
    /// For streaming verbs the reply carrying the session id is queued before
    /// the session is allowed to emit.
    #[instrument(
        name = "dispatch",
        skip_all,
        fields(
            connection_id = %ctx.connection_id,
            resource = %command.resource,
            action = %command.action,
        )
    )]
    pub async fn dispatch_and_reply(
        &self,
        ctx: &RequestContext,
        command: InboundCommand,
    ) -> Result<(), SinkClosed> {
        let InboundCommand {
            request_id,
            resource,
            action,
            payload,
        } = command;

        let (response, start) = self.run(ctx, &resource, &action, payload).await;
        let sent = ctx.sink.reply(request_id, response).await;
        if let Some(start) = start {
            start.release();
        }
        sent
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        resource: &str,
        action: &str,
        payload: Value,
    ) -> (Response, Option<SessionStart>) {
        let outcome = match self.registry.resolve(resource, action) {
            Ok(handler) => handler.handle(ctx, payload).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(HandlerOutcome::Reply(data)) => (Response::ok(data), None),
            Ok(HandlerOutcome::SessionOpened(start)) => {
                let data = json!({ "sessionId": start.session_id() });
                (Response::ok(data), Some(start))
            }
            Err(err) => {
                log_failure(resource, action, &err);
                (Response::failure(err.to_string()), None)
            }
        }
    }
}

fn log_failure(resource: &str, action: &str, err: &DispatchError) {
    match err {
        DispatchError::UnsupportedAction { .. } => {
            debug!(resource, action, "Unsupported action");
        }
        _ => debug!(resource, action, error = %err, "Command failed"),
    }
}
