//! The handler contract used by the dispatcher

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DispatchError;
use crate::session::{ConnectionId, SessionManager, SessionStart};
use crate::sink::ResponseSink;

/// What a handler produced for one command
#[derive(Debug)]
pub enum HandlerOutcome {
    /// One-shot result, returned as `Response.data`
    Reply(Value),
    /// A streaming session was opened (or an identical watch joined)
    SessionOpened(SessionStart),
}

/// Per-command context handed to handlers
///
/// Handlers reach the connection's response sink and the session manager here;
/// they never hold session state themselves.
#[derive(Clone)]
pub struct RequestContext {
    pub connection_id: ConnectionId,
    pub sink: ResponseSink,
    pub sessions: Arc<SessionManager>,
}

impl RequestContext {
    pub fn new(sink: ResponseSink, sessions: Arc<SessionManager>) -> Self {
        Self {
            connection_id: sink.connection_id().to_string(),
            sink,
            sessions,
        }
    }
}

/// Consumes one opaque payload and produces one outcome
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError>;
}

/// Deserialize a handler payload; a missing payload reads as `{}`
pub fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, DispatchError> {
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload
    };
    Ok(serde_json::from_value(payload)?)
}

type HandlerFuture = BoxFuture<'static, Result<HandlerOutcome, DispatchError>>;
type HandlerFn = dyn Fn(&RequestContext, Value) -> HandlerFuture + Send + Sync;

/// Adapts a closure into an [`ActionHandler`]
pub struct FnHandler {
    handler: Box<HandlerFn>,
}

impl FnHandler {
    /// Handler answering with whatever `f` returns; `f` gets an owned context
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutcome, DispatchError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |ctx: &RequestContext, payload: Value| -> HandlerFuture {
                Box::pin(f(ctx.clone(), payload))
            }),
        }
    }
}

#[async_trait]
impl ActionHandler for FnHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        (self.handler)(ctx, payload).await
    }
}
