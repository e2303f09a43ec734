//! Session-initiating and session-routing handlers
//!
//! These handlers only translate payloads; the session table, ordering and
//! teardown all belong to the [`SessionManager`](crate::session::SessionManager).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::kinds;
use super::payloads::{ExecPayload, OpenLogPayload, SessionPayload, StdinPayload, WatchPayload};
use crate::cluster::{ClusterClient, ExecRequest, LogRequest, ResourceRef, WatchRequest};
use crate::error::DispatchError;
use crate::handler::{ActionHandler, HandlerOutcome, RequestContext, parse_payload};
use crate::session::{SessionInput, SessionKind, SessionRequest};

/// `pod.exec`: start an interactive process
pub struct ExecHandler {
    cluster: Arc<dyn ClusterClient>,
}

impl ExecHandler {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl ActionHandler for ExecHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        let payload: ExecPayload = parse_payload(payload)?;
        if payload.cmd.is_empty() {
            return Err(DispatchError::InvalidPayload("`cmd` must not be empty".to_string()));
        }

        let target = ResourceRef {
            kind: kinds::POD.to_string(),
            namespace: payload.namespace,
            name: payload.name,
            container: Some(payload.container),
        };
        let request = SessionRequest::new(ctx.connection_id.clone(), SessionKind::Exec, target.clone());
        let open = self.cluster.exec(ExecRequest {
            target,
            command: payload.cmd,
        });

        let start = ctx.sessions.start(request, &ctx.sink, open).await?;
        Ok(HandlerOutcome::SessionOpened(start))
    }
}

/// `pod.stdin`: forward bytes to an exec session
pub struct StdinHandler;

#[async_trait]
impl ActionHandler for StdinHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        let payload: StdinPayload = parse_payload(payload)?;
        let connection_id = ctx.connection_id.as_str();
        let session_id = payload.session_id.as_str();

        if !payload.bytes.is_empty() || !payload.eof {
            ctx.sessions
                .route(
                    connection_id,
                    session_id,
                    SessionInput::Stdin(payload.bytes.into_bytes()),
                )
                .await?;
        }
        if payload.eof {
            ctx.sessions
                .route(connection_id, session_id, SessionInput::Eof)
                .await?;
        }
        Ok(HandlerOutcome::Reply(Value::Null))
    }
}

/// `pod.openLog`: follow a container log
pub struct OpenLogHandler {
    cluster: Arc<dyn ClusterClient>,
}

impl OpenLogHandler {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl ActionHandler for OpenLogHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        let payload: OpenLogPayload = parse_payload(payload)?;
        let target = ResourceRef::new(kinds::POD)
            .namespace(payload.namespace)
            .name(payload.name)
            .container(payload.container);
        let request = SessionRequest::new(ctx.connection_id.clone(), SessionKind::Log, target.clone());
        let open = self.cluster.logs(LogRequest {
            target,
            tail_lines: payload.tail_lines,
        });

        let start = ctx.sessions.start(request, &ctx.sink, open).await?;
        Ok(HandlerOutcome::SessionOpened(start))
    }
}

/// `watch.get`: subscribe to changes of a kind
///
/// An identical watch already open on this connection is reused.
pub struct WatchHandler {
    cluster: Arc<dyn ClusterClient>,
}

impl WatchHandler {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl ActionHandler for WatchHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        let payload: WatchPayload = parse_payload(payload)?;
        let resource = ResourceRef::new(payload.resource).namespace(payload.namespace);
        let request = SessionRequest::new(ctx.connection_id.clone(), SessionKind::Watch, resource.clone())
            .with_filter(payload.filter.clone());
        // Only polled when no identical watch exists
        let open = self.cluster.watch(WatchRequest {
            resource,
            filter: payload.filter,
        });

        let start = ctx.sessions.start(request, &ctx.sink, open).await?;
        Ok(HandlerOutcome::SessionOpened(start))
    }
}

/// `pod.closeLog` and `watch.delete`: close a session of one kind
pub struct CloseSessionHandler {
    kind: SessionKind,
}

impl CloseSessionHandler {
    pub fn new(kind: SessionKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl ActionHandler for CloseSessionHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        let payload: SessionPayload = parse_payload(payload)?;
        let info = ctx
            .sessions
            .close(&ctx.connection_id, &payload.session_id, Some(self.kind))
            .await?;
        Ok(HandlerOutcome::Reply(json!({ "sessionId": info.id })))
    }
}
