//! SessionManager: sole owner of the streaming session table
//!
//! Handlers never touch the table; they ask the manager to start, route to,
//! or close sessions by id. Every insert and removal happens under the table
//! write lock, so a session is either visible to `route`/`close` or already
//! gone. Waiting on a driver to stop always happens after the lock is released.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cluster::ResourceRef;
use crate::config::SessionConfig;
use crate::error::{ClusterError, SessionError};
use crate::sink::ResponseSink;

use super::driver::SessionDriver;
use super::io::{SessionInput, SessionIo};
use super::state::{ConnectionId, SessionId, SessionInfo, SessionKind, SessionState};

pub(crate) type SharedTable = Arc<RwLock<SessionTable>>;

/// Identity of a watch subscription; one open watch per key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    connection_id: ConnectionId,
    resource: ResourceRef,
    filter: Option<String>,
}

pub(crate) struct SessionEntry {
    pub(super) info: SessionInfo,
    watch_key: Option<WatchKey>,
    cancel: CancellationToken,
    input: Option<mpsc::Sender<SessionInput>>,
    task: Option<JoinHandle<()>>,
    pub(super) state_tx: watch::Sender<SessionState>,
}

#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: HashMap<SessionId, SessionEntry>,
    watches: HashMap<WatchKey, SessionId>,
}

impl SessionTable {
    fn insert(&mut self, entry: SessionEntry) {
        if let Some(key) = &entry.watch_key {
            self.watches.insert(key.clone(), entry.info.id.clone());
        }
        self.sessions.insert(entry.info.id.clone(), entry);
    }

    pub(crate) fn remove(&mut self, session_id: &str) -> Option<SessionEntry> {
        let entry = self.sessions.remove(session_id)?;
        if let Some(key) = &entry.watch_key
            && self.watches.get(key).is_some_and(|id| id == session_id)
        {
            self.watches.remove(key);
        }
        Some(entry)
    }

    /// Sessions are only visible to the connection that owns them
    fn owned(&self, connection_id: &str, session_id: &str) -> Option<&SessionEntry> {
        self.sessions
            .get(session_id)
            .filter(|entry| entry.info.connection_id == connection_id)
    }
}

/// What a streaming handler asks to open
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub connection_id: ConnectionId,
    pub kind: SessionKind,
    pub resource: ResourceRef,
    /// Watch filter; part of the watch identity
    pub filter: Option<String>,
}

impl SessionRequest {
    pub fn new(connection_id: impl Into<ConnectionId>, kind: SessionKind, resource: ResourceRef) -> Self {
        Self {
            connection_id: connection_id.into(),
            kind,
            resource,
            filter: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }
}

/// A session that was opened, or an identical watch that was joined
///
/// A freshly opened session holds back its frames until this value is dropped
/// or [`SessionStart::release`] is called, so the reply carrying the id can be
/// queued first.
#[derive(Debug)]
pub struct SessionStart {
    session_id: SessionId,
    reused: bool,
    release: Option<oneshot::Sender<()>>,
}

impl SessionStart {
    fn opened(session_id: SessionId, release: oneshot::Sender<()>) -> Self {
        Self {
            session_id,
            reused: false,
            release: Some(release),
        }
    }

    fn reused(session_id: SessionId) -> Self {
        Self {
            session_id,
            reused: true,
            release: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// True when an existing identical watch was returned
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Let the session start emitting frames
    pub fn release(mut self) -> SessionId {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
        self.session_id
    }
}

enum Reservation {
    Created {
        session_id: SessionId,
        cancel: CancellationToken,
    },
    Pending {
        session_id: SessionId,
        state: watch::Receiver<SessionState>,
    },
}

/// Tracks watch, exec and log sessions for every connection
pub struct SessionManager {
    table: SharedTable,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            table: Arc::new(RwLock::new(SessionTable::default())),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session
    ///
    /// The session is registered as `Created`, then `open` runs the upstream
    /// subscribe/exec-start. Success moves it to `Open` and spawns its driver;
    /// failure discards it and returns the upstream error. A watch identical to
    /// one this connection already has (same resource and filter) joins that
    /// session instead of subscribing again.
    #[instrument(
        name = "session::start",
        skip_all,
        fields(connection_id = %request.connection_id, kind = %request.kind)
    )]
    pub async fn start<F>(
        &self,
        request: SessionRequest,
        sink: &ResponseSink,
        open: F,
    ) -> Result<SessionStart, SessionError>
    where
        F: Future<Output = Result<SessionIo, ClusterError>> + Send,
    {
        let watch_key = (request.kind == SessionKind::Watch).then(|| WatchKey {
            connection_id: request.connection_id.clone(),
            resource: request.resource.clone(),
            filter: request.filter.clone(),
        });

        let (session_id, cancel) = loop {
            match self.reserve(&request, watch_key.as_ref()).await {
                Reservation::Created { session_id, cancel } => break (session_id, cancel),
                Reservation::Pending {
                    session_id,
                    mut state,
                } => {
                    let settled = state
                        .wait_for(|state| *state != SessionState::Created)
                        .await
                        .map(|state| *state)
                        .unwrap_or(SessionState::Closed);
                    if settled == SessionState::Open {
                        debug!(session_id = %session_id, "Joining existing watch");
                        return Ok(SessionStart::reused(session_id));
                    }
                    // The first subscriber failed; try again as a fresh open
                }
            }
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = open => Some(result),
        };

        match opened {
            None => {
                debug!(session_id = %session_id, "Session torn down while opening");
                Err(SessionError::NotFound(session_id))
            }
            Some(Err(err)) => {
                if let Some(entry) = self.table.write().await.remove(&session_id) {
                    entry.state_tx.send_replace(SessionState::Closed);
                }
                warn!(session_id = %session_id, error = %err, "Session failed to open");
                Err(err.into())
            }
            Some(Ok(io)) => self.activate(session_id, io, sink).await,
        }
    }

    async fn reserve(&self, request: &SessionRequest, watch_key: Option<&WatchKey>) -> Reservation {
        let mut table = self.table.write().await;

        if let Some(key) = watch_key
            && let Some(existing) = table.watches.get(key)
            && let Some(entry) = table.sessions.get(existing)
        {
            return Reservation::Pending {
                session_id: existing.clone(),
                state: entry.state_tx.subscribe(),
            };
        }

        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (state_tx, _) = watch::channel(SessionState::Created);
        table.insert(SessionEntry {
            info: SessionInfo {
                id: session_id.clone(),
                kind: request.kind,
                connection_id: request.connection_id.clone(),
                resource: request.resource.clone(),
                state: SessionState::Created,
                created_at: Utc::now(),
            },
            watch_key: watch_key.cloned(),
            cancel: cancel.clone(),
            input: None,
            task: None,
            state_tx,
        });

        Reservation::Created { session_id, cancel }
    }

    async fn activate(
        &self,
        session_id: SessionId,
        io: SessionIo,
        sink: &ResponseSink,
    ) -> Result<SessionStart, SessionError> {
        let mut table = self.table.write().await;
        let Some(entry) = table.sessions.get_mut(&session_id) else {
            io.release();
            return Err(SessionError::NotFound(session_id));
        };
        match entry.info.state.transition(SessionState::Open) {
            Ok(state) => entry.info.state = state,
            Err(err) => {
                io.release();
                return Err(err);
            }
        }

        let (input_tx, input_rx) = if io.accepts_input() {
            let (tx, rx) = mpsc::channel(self.config.stdin_buffer.max(1));
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let idle_timeout =
            (entry.info.kind == SessionKind::Exec).then(|| self.config.exec_idle_timeout());
        let (release_tx, release_rx) = oneshot::channel();

        let driver = SessionDriver {
            session_id: session_id.clone(),
            io,
            input: input_rx,
            emitter: sink.session_emitter(session_id.clone(), entry.info.kind),
            cancel: entry.cancel.clone(),
            idle_timeout,
            release: release_rx,
            table: Arc::clone(&self.table),
        };
        entry.task = Some(tokio::spawn(driver.run()));
        entry.input = input_tx;
        entry.state_tx.send_replace(SessionState::Open);

        info!(
            session_id = %session_id,
            kind = %entry.info.kind,
            resource = ?entry.info.resource,
            "Session opened"
        );
        Ok(SessionStart::opened(session_id, release_tx))
    }

    /// Deliver a follow-up frame to an open session owned by `connection_id`
    pub async fn route(
        &self,
        connection_id: &str,
        session_id: &str,
        input: SessionInput,
    ) -> Result<(), SessionError> {
        let input_tx = {
            let table = self.table.read().await;
            let entry = table
                .owned(connection_id, session_id)
                .filter(|entry| entry.info.state == SessionState::Open)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            entry
                .input
                .clone()
                .ok_or_else(|| SessionError::InputNotSupported(session_id.to_string()))?
        };

        input_tx
            .send(input)
            .await
            .map_err(|_| SessionError::NotFound(session_id.to_string()))
    }

    /// Close a session owned by `connection_id`
    ///
    /// Returns once the driver has stopped and the upstream resource has been
    /// released; no frame for the session is sent after that. When `kind` is
    /// given, a session of another kind is reported as not found.
    pub async fn close(
        &self,
        connection_id: &str,
        session_id: &str,
        kind: Option<SessionKind>,
    ) -> Result<SessionInfo, SessionError> {
        let entry = {
            let mut table = self.table.write().await;
            let matches = table
                .owned(connection_id, session_id)
                .is_some_and(|entry| kind.is_none_or(|kind| entry.info.kind == kind));
            if !matches {
                return Err(SessionError::NotFound(session_id.to_string()));
            }
            table
                .remove(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?
        };

        let info = self.teardown(entry).await;
        info!(session_id = %session_id, kind = %info.kind, "Session closed");
        Ok(info)
    }

    /// Tear down every session owned by a lost connection
    ///
    /// Returns how many sessions were torn down. Each session gets at most the
    /// configured teardown timeout, and they stop concurrently. Calling this
    /// again for the same connection finds nothing and returns 0.
    #[instrument(name = "session::drop_connection", skip(self))]
    pub async fn drop_connection(&self, connection_id: &str) -> usize {
        let entries: Vec<SessionEntry> = {
            let mut table = self.table.write().await;
            let owned: Vec<SessionId> = table
                .sessions
                .values()
                .filter(|entry| entry.info.connection_id == connection_id)
                .map(|entry| entry.info.id.clone())
                .collect();
            owned.iter().filter_map(|id| table.remove(id)).collect()
        };

        if entries.is_empty() {
            debug!("No sessions to tear down");
            return 0;
        }

        for entry in &entries {
            entry.cancel.cancel();
        }
        let count = entries.len();
        futures::future::join_all(entries.into_iter().map(|entry| self.teardown(entry))).await;

        info!(sessions = count, "Connection sessions torn down");
        count
    }

    async fn teardown(&self, mut entry: SessionEntry) -> SessionInfo {
        entry.cancel.cancel();
        entry.input = None;

        if let Some(mut task) = entry.task.take() {
            match tokio::time::timeout(self.config.teardown_timeout(), &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(session_id = %entry.info.id, error = %err, "Session driver failed");
                }
                Err(_) => {
                    warn!(session_id = %entry.info.id, "Session did not stop in time; aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        entry.state_tx.send_replace(SessionState::Closed);
        entry.info.state = SessionState::Closed;
        entry.info
    }

    /// Metadata of one session
    pub async fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.table
            .read()
            .await
            .sessions
            .get(session_id)
            .map(|entry| entry.info.clone())
    }

    /// Sessions owned by one connection
    pub async fn list(&self, connection_id: &str) -> Vec<SessionInfo> {
        self.table
            .read()
            .await
            .sessions
            .values()
            .filter(|entry| entry.info.connection_id == connection_id)
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Number of sessions across all connections
    pub async fn session_count(&self) -> usize {
        self.table.read().await.sessions.len()
    }
}
