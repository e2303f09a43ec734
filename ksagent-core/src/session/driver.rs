//! Per-session task pumping upstream output to the response sink
//!
//! One driver runs per open session. It owns the upstream stream and the
//! process stdin, forwards routed input, and exits on cancellation, upstream
//! end, or (exec only) idle timeout. Output is awaited one frame at a time,
//! so a session that cannot send stops polling its own upstream and nothing
//! else.

use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{CloseReason, SessionEvent};
use crate::sink::SessionEmitter;

use super::io::{SessionInput, SessionIo};
use super::manager::SharedTable;
use super::state::{SessionId, SessionState};

/// Placeholder deadline for sessions without an idle timeout; the branch is disabled
const NO_IDLE_DEADLINE: Duration = Duration::from_secs(86_400);

pub(crate) struct SessionDriver {
    pub(crate) session_id: SessionId,
    pub(crate) io: SessionIo,
    pub(crate) input: Option<mpsc::Receiver<SessionInput>>,
    pub(crate) emitter: SessionEmitter,
    pub(crate) cancel: CancellationToken,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) release: oneshot::Receiver<()>,
    pub(crate) table: SharedTable,
}

impl SessionDriver {
    pub(crate) async fn run(self) {
        let Self {
            session_id,
            io,
            mut input,
            mut emitter,
            cancel,
            idle_timeout,
            release,
            table,
        } = self;
        let SessionIo {
            mut output,
            mut stdin,
            teardown: _teardown,
        } = io;

        // Frames wait until the reply carrying the session id is queued
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = release => {}
        }

        let idle = tokio::time::sleep(idle_timeout.unwrap_or(NO_IDLE_DEADLINE));
        tokio::pin!(idle);
        // Stdin bytes accepted from the router but not yet taken by the process
        let mut pending: Option<Vec<u8>> = None;

        let ending = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                _ = &mut idle, if idle_timeout.is_some() => {
                    break Some(SessionEvent::Closed {
                        reason: CloseReason::IdleTimeout,
                        error: None,
                    });
                }
                written = write_stdin(stdin.as_ref(), &mut pending), if pending.is_some() => {
                    if !written {
                        debug!(session_id = %session_id, "Process stdin closed");
                        stdin = None;
                    }
                }
                // Held back while a write is pending so input stays ordered
                frame = next_input(&mut input), if pending.is_none() => match frame {
                    Some(SessionInput::Stdin(bytes)) => {
                        touch(&mut idle, idle_timeout);
                        if bytes.is_empty() {
                            continue;
                        }
                        if stdin.is_none() {
                            debug!(session_id = %session_id, "Dropping stdin after EOF");
                            continue;
                        }
                        pending = Some(bytes);
                    }
                    Some(SessionInput::Eof) => {
                        touch(&mut idle, idle_timeout);
                        stdin = None;
                    }
                    None => input = None,
                },
                item = output.next() => match item {
                    Some(Ok(item)) => {
                        touch(&mut idle, idle_timeout);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break None,
                            sent = emitter.emit(item.into()) => {
                                if sent.is_err() {
                                    // Connection writer is gone; connection teardown reaps us
                                    break None;
                                }
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(session_id = %session_id, error = %err, "Session upstream failed");
                        break Some(SessionEvent::Closed {
                            reason: CloseReason::UpstreamError,
                            error: Some(err.to_string()),
                        });
                    }
                    None => {
                        break Some(SessionEvent::Closed {
                            reason: CloseReason::Completed,
                            error: None,
                        });
                    }
                },
            }
        };

        if let Some(event) = ending {
            finish(&table, &session_id, &mut emitter, event).await;
        }
    }
}

/// Remove a session that ended on its own and tell the caller why
///
/// If the entry is already gone, an explicit close or connection teardown owns
/// it and nothing more is sent.
async fn finish(
    table: &SharedTable,
    session_id: &str,
    emitter: &mut SessionEmitter,
    event: SessionEvent,
) {
    let Some(entry) = table.write().await.remove(session_id) else {
        return;
    };
    entry.state_tx.send_replace(SessionState::Closed);

    info!(session_id = %session_id, kind = %entry.info.kind, "Session ended");
    if emitter.emit(event).await.is_err() {
        debug!(session_id = %session_id, "Connection gone before close frame");
    }
}

async fn next_input(input: &mut Option<mpsc::Receiver<SessionInput>>) -> Option<SessionInput> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Hand `pending` to the process once it has room; false if its stdin closed
///
/// Output keeps flowing while this waits, so a process blocked on its own
/// output never stalls the session.
async fn write_stdin(stdin: Option<&mpsc::Sender<Vec<u8>>>, pending: &mut Option<Vec<u8>>) -> bool {
    let Some(tx) = stdin else {
        pending.take();
        return true;
    };
    match tx.reserve().await {
        Ok(permit) => {
            if let Some(bytes) = pending.take() {
                permit.send(bytes);
            }
            true
        }
        Err(_) => {
            pending.take();
            false
        }
    }
}

fn touch(idle: &mut Pin<&mut Sleep>, timeout: Option<Duration>) {
    if let Some(timeout) = timeout {
        idle.as_mut().reset(Instant::now() + timeout);
    }
}
