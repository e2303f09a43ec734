//! One-shot resource handlers

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::payloads::{
    ListPayload, ManifestPayload, NamedPayload, UpdateObjPayload, UpdateYamlPayload,
};
use crate::cluster::{ClusterClient, Manifest};
use crate::error::DispatchError;
use crate::handler::{ActionHandler, HandlerOutcome, RequestContext, parse_payload};
use crate::protocol::Verb;

/// list/get/create/delete/update_yaml/update_obj/status for one kind
pub struct CrudHandler {
    kind: String,
    verb: Verb,
    cluster: Arc<dyn ClusterClient>,
}

impl CrudHandler {
    pub fn new(kind: impl Into<String>, verb: Verb, cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            kind: kind.into(),
            verb,
            cluster,
        }
    }
}

#[async_trait]
impl ActionHandler for CrudHandler {
    async fn handle(
        &self,
        _ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        let kind = self.kind.as_str();
        let data = match self.verb {
            Verb::List => {
                let payload: ListPayload = parse_payload(payload)?;
                let items = self.cluster.list(kind, &payload.into()).await?;
                debug!(kind, count = items.len(), "Listed objects");
                Value::Array(items)
            }
            Verb::Get => {
                let payload: NamedPayload = parse_payload(payload)?;
                self.cluster.get(&payload.target(kind)).await?
            }
            Verb::Create => {
                let manifest: Manifest = parse_payload::<ManifestPayload>(payload)?.try_into()?;
                self.cluster.create(Some(kind), manifest).await?
            }
            Verb::Delete => {
                let payload: NamedPayload = parse_payload(payload)?;
                self.cluster.delete(&payload.target(kind)).await?;
                Value::Null
            }
            Verb::UpdateYaml => {
                let payload: UpdateYamlPayload = parse_payload(payload)?;
                self.cluster
                    .update_yaml(&payload.target.target(kind), &payload.yaml)
                    .await?
            }
            Verb::UpdateObj => {
                let payload: UpdateObjPayload = parse_payload(payload)?;
                self.cluster
                    .update_obj(&payload.target.target(kind), payload.object)
                    .await?
            }
            Verb::Status => {
                let payload: NamedPayload = parse_payload(payload)?;
                self.cluster.status(&payload.target(kind)).await?
            }
            verb => {
                return Err(DispatchError::UnsupportedAction {
                    kind: self.kind.clone(),
                    action: verb.to_string(),
                });
            }
        };
        Ok(HandlerOutcome::Reply(data))
    }
}

/// Cluster-wide actions: summary, apply and create from a manifest
pub struct ClusterHandler {
    verb: Verb,
    cluster: Arc<dyn ClusterClient>,
}

impl ClusterHandler {
    pub fn new(verb: Verb, cluster: Arc<dyn ClusterClient>) -> Self {
        Self { verb, cluster }
    }
}

#[async_trait]
impl ActionHandler for ClusterHandler {
    async fn handle(
        &self,
        _ctx: &RequestContext,
        payload: Value,
    ) -> Result<HandlerOutcome, DispatchError> {
        let data = match self.verb {
            Verb::Get => self.cluster.info().await?,
            Verb::Apply => {
                let manifest: Manifest = parse_payload::<ManifestPayload>(payload)?.try_into()?;
                self.cluster.apply(manifest).await?
            }
            Verb::Create => {
                let manifest: Manifest = parse_payload::<ManifestPayload>(payload)?.try_into()?;
                self.cluster.create(None, manifest).await?
            }
            verb => {
                return Err(DispatchError::UnsupportedAction {
                    kind: super::kinds::CLUSTER.to_string(),
                    action: verb.to_string(),
                });
            }
        };
        Ok(HandlerOutcome::Reply(data))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::config::SessionConfig;
    use crate::session::SessionManager;
    use crate::sink::ResponseSink;

    fn cluster() -> Arc<dyn ClusterClient> {
        Arc::new(
            MemoryCluster::from_fixture(
                r#"{"objects": [
                    {"kind": "Deployment", "metadata": {"name": "web", "namespace": "default"}, "spec": {"replicas": 1}},
                    {"kind": "Helm", "metadata": {"name": "redis", "namespace": "default"}, "status": "deployed"}
                ]}"#,
            )
            .unwrap(),
        )
    }

    fn context() -> RequestContext {
        let (sink, _rx) = ResponseSink::channel("conn-1", 4);
        RequestContext::new(sink, Arc::new(SessionManager::new(SessionConfig::default())))
    }

    async fn reply(handler: &dyn ActionHandler, payload: Value) -> Result<Value, DispatchError> {
        match handler.handle(&context(), payload).await? {
            HandlerOutcome::Reply(data) => Ok(data),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    // ==================== CrudHandler Tests ====================

    #[tokio::test]
    async fn list_returns_array() {
        let handler = CrudHandler::new("deployment", Verb::List, cluster());
        let data = reply(&handler, Value::Null).await.unwrap();
        assert_eq!(data.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn get_requires_name() {
        let handler = CrudHandler::new("deployment", Verb::Get, cluster());
        let err = reply(&handler, json!({"namespace": "default"})).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid payload: missing field `name`");
    }

    #[tokio::test]
    async fn upstream_errors_pass_through() {
        let handler = CrudHandler::new("deployment", Verb::Delete, cluster());
        let err = reply(&handler, json!({"namespace": "default", "name": "api"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "deployment \"default/api\" not found");
    }

    #[tokio::test]
    async fn update_obj_patches_object() {
        let cluster = cluster();
        let handler = CrudHandler::new("deployment", Verb::UpdateObj, Arc::clone(&cluster));
        let data = reply(
            &handler,
            json!({"namespace": "default", "name": "web", "object": {"spec": {"replicas": 3}}}),
        )
        .await
        .unwrap();
        assert_eq!(data["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn helm_status_reports_release_status() {
        let handler = CrudHandler::new("helm", Verb::Status, cluster());
        let data = reply(&handler, json!({"namespace": "default", "name": "redis"}))
            .await
            .unwrap();
        assert_eq!(data["status"], "deployed");
    }

    // ==================== ClusterHandler Tests ====================

    #[tokio::test]
    async fn cluster_apply_creates_then_replaces() {
        let cluster = cluster();
        let apply = ClusterHandler::new(Verb::Apply, Arc::clone(&cluster));
        let manifest = json!({
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "default"},
            "data": {"mode": "a"}
        });

        reply(&apply, json!({"object": manifest})).await.unwrap();
        let yaml = r#"{"kind": "ConfigMap", "metadata": {"name": "settings", "namespace": "default"}, "data": {"mode": "b"}}"#;
        reply(&apply, json!({"yaml": yaml})).await.unwrap();

        let get = CrudHandler::new("configMap", Verb::Get, cluster);
        let data = reply(&get, json!({"namespace": "default", "name": "settings"}))
            .await
            .unwrap();
        assert_eq!(data["data"]["mode"], "b");
    }

    #[tokio::test]
    async fn cluster_get_returns_summary() {
        let handler = ClusterHandler::new(Verb::Get, cluster());
        let data = reply(&handler, Value::Null).await.unwrap();
        assert_eq!(data["objectCount"], 2);
    }
}
