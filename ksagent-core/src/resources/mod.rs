//! Resource handlers and the default action table
//!
//! [`build_registry`] wires every supported (kind, verb) pair to a handler
//! backed by one [`ClusterClient`].

mod crud;
pub mod payloads;
mod streams;

use std::sync::Arc;

use crate::cluster::ClusterClient;
use crate::error::RegistryError;
use crate::protocol::Verb;
use crate::registry::{ActionRegistry, RegistryBuilder};
use crate::session::SessionKind;

pub use crud::{ClusterHandler, CrudHandler};
pub use streams::{CloseSessionHandler, ExecHandler, OpenLogHandler, StdinHandler, WatchHandler};

/// Resource kind wire spellings
pub mod kinds {
    pub const WATCH: &str = "watch";
    pub const CLUSTER: &str = "cluster";
    pub const POD: &str = "pod";
    pub const NAMESPACE: &str = "namespace";
    pub const NODE: &str = "node";
    pub const EVENT: &str = "event";
    pub const DEPLOYMENT: &str = "deployment";
    pub const STATEFULSET: &str = "statefulset";
    pub const DAEMONSET: &str = "daemonset";
    pub const JOB: &str = "job";
    pub const CRONJOB: &str = "cronjob";
    pub const CONFIG_MAP: &str = "configMap";
    pub const PERSISTENT_VOLUME: &str = "persistentVolume";
    pub const PERSISTENT_VOLUME_CLAIM: &str = "persistentVolumeClaim";
    pub const STORAGE_CLASS: &str = "storageClass";
    pub const HORIZONTAL_POD_AUTOSCALER: &str = "horizontalPodAutoscaler";
    pub const SERVICE: &str = "service";
    pub const INGRESS: &str = "ingress";
    pub const ENDPOINTS: &str = "endpoints";
    pub const NETWORK_POLICY: &str = "networkpolicy";
    pub const SERVICE_ACCOUNT: &str = "serviceaccount";
    pub const ROLE_BINDING: &str = "rolebinding";
    pub const ROLE: &str = "role";
    pub const SECRET: &str = "secret";
    pub const CRD: &str = "crd";
    pub const HELM: &str = "helm";
}

use Verb::{Create, Delete, Get, List, Status, UpdateObj, UpdateYaml};

/// One-shot verbs per kind; streaming verbs are wired separately
const CRUD_TABLE: &[(&[&str], &[Verb])] = &[
    (&[kinds::POD], &[List, Get, Delete, UpdateYaml]),
    (&[kinds::NAMESPACE], &[List, Get, Delete, UpdateYaml]),
    (&[kinds::NODE], &[List, Get, UpdateYaml]),
    (&[kinds::EVENT], &[List]),
    (
        &[
            kinds::DEPLOYMENT,
            kinds::STATEFULSET,
            kinds::DAEMONSET,
            kinds::JOB,
            kinds::CRONJOB,
        ],
        &[List, Get, Delete, UpdateYaml, UpdateObj],
    ),
    (&[kinds::CONFIG_MAP], &[List, Get, UpdateYaml]),
    (
        &[
            kinds::PERSISTENT_VOLUME,
            kinds::PERSISTENT_VOLUME_CLAIM,
            kinds::STORAGE_CLASS,
            kinds::HORIZONTAL_POD_AUTOSCALER,
            kinds::SERVICE,
            kinds::INGRESS,
            kinds::ENDPOINTS,
            kinds::NETWORK_POLICY,
            kinds::SERVICE_ACCOUNT,
        ],
        &[List, Get, UpdateYaml, Delete],
    ),
    (&[kinds::ROLE_BINDING], &[List, Get, UpdateYaml]),
    (&[kinds::ROLE, kinds::SECRET, kinds::CRD], &[List, Get]),
    (&[kinds::HELM], &[List, Get, Create, UpdateObj, Delete, Status]),
];

/// Build the full agent action table
pub fn build_registry(cluster: Arc<dyn ClusterClient>) -> Result<ActionRegistry, RegistryError> {
    let mut builder = ActionRegistry::builder();
    register_defaults(&mut builder, cluster)?;
    Ok(builder.build())
}

/// Register the default table into an existing builder
///
/// Fails if any of the default pairs was already registered.
pub fn register_defaults(
    builder: &mut RegistryBuilder,
    cluster: Arc<dyn ClusterClient>,
) -> Result<(), RegistryError> {
    for (kinds, verbs) in CRUD_TABLE {
        for kind in *kinds {
            for verb in *verbs {
                let handler = CrudHandler::new(*kind, *verb, Arc::clone(&cluster));
                builder.register(*kind, *verb, Arc::new(handler))?;
            }
        }
    }

    builder
        .register(kinds::POD, Verb::Exec, Arc::new(ExecHandler::new(Arc::clone(&cluster))))?
        .register(kinds::POD, Verb::Stdin, Arc::new(StdinHandler))?
        .register(kinds::POD, Verb::OpenLog, Arc::new(OpenLogHandler::new(Arc::clone(&cluster))))?
        .register(
            kinds::POD,
            Verb::CloseLog,
            Arc::new(CloseSessionHandler::new(SessionKind::Log)),
        )?;

    builder
        .register(kinds::WATCH, Verb::Get, Arc::new(WatchHandler::new(Arc::clone(&cluster))))?
        .register(
            kinds::WATCH,
            Verb::Delete,
            Arc::new(CloseSessionHandler::new(SessionKind::Watch)),
        )?;

    for verb in [Verb::Get, Verb::Apply, Verb::Create] {
        builder.register(
            kinds::CLUSTER,
            verb,
            Arc::new(ClusterHandler::new(verb, Arc::clone(&cluster))),
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;

    fn registry() -> ActionRegistry {
        build_registry(Arc::new(MemoryCluster::new())).unwrap()
    }

    #[test]
    fn pod_supports_streaming_verbs() {
        let registry = registry();
        assert_eq!(
            registry.verbs(kinds::POD),
            vec![
                Verb::List,
                Verb::Get,
                Verb::Delete,
                Verb::UpdateYaml,
                Verb::Exec,
                Verb::Stdin,
                Verb::OpenLog,
                Verb::CloseLog,
            ]
        );
    }

    #[test]
    fn table_covers_every_kind() {
        let registry = registry();
        assert_eq!(registry.kinds().count(), 26);
        assert_eq!(registry.verbs(kinds::EVENT), vec![Verb::List]);
        assert_eq!(registry.verbs(kinds::WATCH), vec![Verb::Get, Verb::Delete]);
        assert_eq!(
            registry.verbs(kinds::CLUSTER),
            vec![Verb::Get, Verb::Create, Verb::Apply]
        );
        assert!(registry.lookup(kinds::SECRET, Verb::Delete).is_none());
        assert!(registry.lookup(kinds::HELM, Verb::Status).is_some());
    }

    #[test]
    fn defaults_cannot_be_registered_twice() {
        let cluster: Arc<dyn ClusterClient> = Arc::new(MemoryCluster::new());
        let mut builder = ActionRegistry::builder();
        register_defaults(&mut builder, Arc::clone(&cluster)).unwrap();

        let err = register_defaults(&mut builder, cluster).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAction { .. }));
    }
}
