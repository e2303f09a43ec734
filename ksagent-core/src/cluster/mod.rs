//! Cluster collaborator contract
//!
//! The router never talks to the Kubernetes API itself. Resource handlers are
//! built around a [`ClusterClient`], which performs one-shot operations and
//! starts the upstream side of streaming sessions.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClusterError;
use crate::session::SessionIo;

pub use memory::MemoryCluster;

/// Reference to a cluster object (or a container inside a pod)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    /// Name for error messages
    pub fn display_name(&self) -> String {
        match (&self.namespace, &self.name) {
            (Some(namespace), Some(name)) => format!("{}/{}", namespace, name),
            (None, Some(name)) => name.clone(),
            (_, None) => "<unnamed>".to_string(),
        }
    }
}

/// Parameters of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub namespace: Option<String>,
    /// `key=value[,key=value]` equality selector
    pub label_selector: Option<String>,
}

/// A manifest sent by the control plane for create/apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Manifest {
    Yaml(String),
    Object(Value),
}

/// Start an interactive process inside a container
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub target: ResourceRef,
    pub command: Vec<String>,
}

/// Follow a container's log
#[derive(Debug, Clone, PartialEq)]
pub struct LogRequest {
    pub target: ResourceRef,
    pub tail_lines: Option<usize>,
}

/// Subscribe to changes of a resource kind
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRequest {
    pub resource: ResourceRef,
    pub filter: Option<String>,
}

/// Access to the managed cluster
///
/// One-shot operations return JSON documents; streaming operations return a
/// [`SessionIo`] whose teardown hook releases the upstream watch, log follow
/// or process.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Cluster summary (version, object counts)
    async fn info(&self) -> Result<Value, ClusterError>;

    async fn list(&self, kind: &str, query: &ListQuery) -> Result<Vec<Value>, ClusterError>;

    async fn get(&self, target: &ResourceRef) -> Result<Value, ClusterError>;

    /// Create an object; `kind` of `None` takes the kind from the manifest
    async fn create(&self, kind: Option<&str>, manifest: Manifest) -> Result<Value, ClusterError>;

    async fn delete(&self, target: &ResourceRef) -> Result<(), ClusterError>;

    async fn update_yaml(&self, target: &ResourceRef, yaml: &str) -> Result<Value, ClusterError>;

    async fn update_obj(&self, target: &ResourceRef, object: Value) -> Result<Value, ClusterError>;

    /// Create-or-replace from a manifest
    async fn apply(&self, manifest: Manifest) -> Result<Value, ClusterError>;

    async fn status(&self, target: &ResourceRef) -> Result<Value, ClusterError>;

    async fn exec(&self, request: ExecRequest) -> Result<SessionIo, ClusterError>;

    async fn logs(&self, request: LogRequest) -> Result<SessionIo, ClusterError>;

    async fn watch(&self, request: WatchRequest) -> Result<SessionIo, ClusterError>;
}
