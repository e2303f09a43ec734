//! ksagent-core: command router for the ksagent cluster agent
//!
//! The agent keeps one long-lived channel to a remote control plane. Commands
//! arrive as (resource kind, action, payload) and are answered either with a
//! single response or, for streaming actions, with a response carrying a
//! session id followed by pushed frames.
//!
//! - **Action table** - [`ActionRegistry`], built once and never mutated
//! - **Dispatch** - [`Dispatcher`] resolves and invokes handlers
//! - **Sessions** - [`SessionManager`] owns every watch, exec and log session
//! - **Output** - [`ResponseSink`] serializes one connection's frames
//! - **Cluster access** - the [`ClusterClient`] trait and the in-memory
//!   [`MemoryCluster`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ksagent_core::{AgentRouter, MemoryCluster, RouterConfig, SessionConfig};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let cluster = Arc::new(MemoryCluster::new());
//!     let router = AgentRouter::new(cluster, RouterConfig::default(), SessionConfig::default())?;
//!
//!     let inbound = futures::stream::iter(vec![
//!         r#"{"requestId":"1","resource":"pod","action":"list"}"#.to_string(),
//!     ]);
//!     let (tx, _rx) = futures::channel::mpsc::unbounded::<String>();
//!     router.connection().serve(inbound, tx).await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//!  inbound text ──> Connection ──> Dispatcher ──> ActionRegistry ──> handler
//!                       │                                              │
//!                       │                          one-shot: Response  │
//!                       │                 streaming: SessionManager.start
//!                       v                                              │
//!  outbound text <── writer <── ResponseSink <── session drivers <─────┘
//! ```

pub mod cluster;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod router;
pub mod session;
pub mod sink;

pub use cluster::{ClusterClient, ListQuery, Manifest, MemoryCluster, ResourceRef};
pub use config::{RouterConfig, SessionConfig};
pub use connection::Connection;
pub use dispatch::Dispatcher;
pub use error::{AgentError, ClusterError, DispatchError, RegistryError, SessionError, SinkClosed};
pub use handler::{ActionHandler, FnHandler, HandlerOutcome, RequestContext};
pub use protocol::{CloseReason, InboundCommand, OutboundFrame, Response, SessionEvent, Verb};
pub use registry::{ActionRegistry, RegistryBuilder};
pub use resources::build_registry;
pub use router::AgentRouter;
pub use session::{
    SessionId, SessionInfo, SessionInput, SessionIo, SessionKind, SessionManager, SessionRequest,
    SessionStart, SessionState, StreamItem,
};
pub use sink::{ResponseSink, SessionEmitter};
