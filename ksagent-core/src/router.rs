//! Wiring of registry, session manager and connections

use std::sync::Arc;

use crate::cluster::ClusterClient;
use crate::config::{RouterConfig, SessionConfig};
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::AgentError;
use crate::registry::ActionRegistry;
use crate::resources::build_registry;
use crate::session::SessionManager;

/// A ready-to-serve agent: the default action table over one cluster
///
/// One router serves any number of connections; they share the registry and
/// the session manager, and each connection only sees its own sessions.
#[derive(Clone)]
pub struct AgentRouter {
    dispatcher: Dispatcher,
    config: RouterConfig,
}

impl AgentRouter {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        router: RouterConfig,
        sessions: SessionConfig,
    ) -> Result<Self, AgentError> {
        let registry = build_registry(cluster)?;
        Ok(Self::with_registry(registry, router, sessions))
    }

    /// Router over a custom action table
    pub fn with_registry(registry: ActionRegistry, router: RouterConfig, sessions: SessionConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(sessions));
        Self {
            dispatcher: Dispatcher::new(Arc::new(registry), sessions),
            config: router,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.dispatcher.registry()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.dispatcher.sessions()
    }

    /// A new connection with a fresh id
    pub fn connection(&self) -> Connection {
        Connection::new(self.dispatcher.clone(), self.config.clone())
    }
}
