//! In-memory cluster used by tests and the offline `serve` mode
//!
//! Objects live in a `BTreeMap` keyed by (kind, namespace, name). Changes are
//! fanned out over a broadcast channel that backs watches, and log lines are
//! fanned out the same way for log follows. Every streaming session hands back
//! a teardown hook that is counted, so callers can check that nothing leaks.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::ready;
use futures::{StreamExt, stream};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{debug, warn};

use super::{ClusterClient, ExecRequest, ListQuery, LogRequest, Manifest, ResourceRef, WatchRequest};
use crate::error::ClusterError;
use crate::session::{SessionIo, StreamItem};

const CHANGE_CAPACITY: usize = 1024;
const STDIN_CAPACITY: usize = 16;
const DEFAULT_VERSION: &str = "v1.29.0";

/// (normalized kind, namespace, name)
type ObjectKey = (String, Option<String>, String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LogKey {
    namespace: Option<String>,
    pod: String,
    container: String,
}

#[derive(Debug, Clone)]
struct Change {
    kind: String,
    event_type: &'static str,
    object: Value,
}

#[derive(Debug, Default)]
struct StreamCounters {
    watches: AtomicUsize,
    active: AtomicUsize,
    teardowns: AtomicUsize,
}

/// Fixture file layout
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fixture {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    objects: Vec<Value>,
    #[serde(default)]
    logs: Vec<LogFixture>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogFixture {
    #[serde(default)]
    namespace: Option<String>,
    pod: String,
    container: String,
    lines: Vec<String>,
}

/// A pod and container resolved from a request target
struct PodRef {
    namespace: Option<String>,
    name: String,
    container: String,
}

/// In-memory [`ClusterClient`]
#[derive(Debug)]
pub struct MemoryCluster {
    version: String,
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    changes: broadcast::Sender<Change>,
    logs: RwLock<HashMap<LogKey, Vec<String>>>,
    log_tx: broadcast::Sender<(LogKey, String)>,
    counters: Arc<StreamCounters>,
    open_delay: Option<Duration>,
    stream_error: RwLock<Option<ClusterError>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (log_tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            version: DEFAULT_VERSION.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            changes,
            logs: RwLock::new(HashMap::new()),
            log_tx,
            counters: Arc::new(StreamCounters::default()),
            open_delay: None,
            stream_error: RwLock::new(None),
        }
    }

    /// Build a cluster from a JSON fixture
    ///
    /// ```json
    /// {"version": "v1.29.0",
    ///  "objects": [{"kind": "Pod", "metadata": {"name": "web-0", "namespace": "default"}}],
    ///  "logs": [{"namespace": "default", "pod": "web-0", "container": "app", "lines": ["ready"]}]}
    /// ```
    pub fn from_fixture(json: &str) -> Result<Self, ClusterError> {
        let fixture: Fixture = serde_json::from_str(json)
            .map_err(|err| ClusterError::Api(format!("invalid fixture: {}", err)))?;

        let mut cluster = Self::new();
        if let Some(version) = fixture.version {
            cluster.version = version;
        }

        let objects = cluster.objects.get_mut();
        for object in fixture.objects {
            let kind = object
                .get("kind")
                .and_then(Value::as_str)
                .map(normalize_kind)
                .ok_or_else(|| ClusterError::Api("fixture object has no kind".to_string()))?;
            let key = object_key(&kind, &object)?;
            objects.insert(key, object);
        }

        let logs = cluster.logs.get_mut();
        for log in fixture.logs {
            let key = LogKey {
                namespace: log.namespace,
                pod: log.pod,
                container: log.container,
            };
            logs.entry(key).or_default().extend(log.lines);
        }

        Ok(cluster)
    }

    /// Read a JSON fixture from disk
    pub fn from_fixture_file(path: &Path) -> Result<Self, ClusterError> {
        let json = std::fs::read_to_string(path).map_err(|err| {
            ClusterError::Api(format!("failed to read fixture {}: {}", path.display(), err))
        })?;
        Self::from_fixture(&json)
    }

    /// Delay every streaming open by `delay`
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Make every streaming open fail with `error` until cleared with `None`
    pub async fn fail_streams(&self, error: Option<ClusterError>) {
        *self.stream_error.write().await = error;
    }

    /// Store an object without notifying watchers
    pub async fn seed(&self, object: Value) -> Result<(), ClusterError> {
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .map(normalize_kind)
            .ok_or_else(|| ClusterError::Api("object has no kind".to_string()))?;
        let key = object_key(&kind, &object)?;
        self.objects.write().await.insert(key, object);
        Ok(())
    }

    /// Append a line to a container log, delivering it to followers
    pub async fn append_log(
        &self,
        namespace: Option<&str>,
        pod: &str,
        container: &str,
        line: impl Into<String>,
    ) {
        let key = LogKey {
            namespace: namespace.map(str::to_string),
            pod: pod.to_string(),
            container: container.to_string(),
        };
        let line = line.into();
        let mut logs = self.logs.write().await;
        logs.entry(key.clone()).or_default().push(line.clone());
        let _ = self.log_tx.send((key, line));
    }

    /// Watch subscriptions ever opened
    pub fn watch_subscriptions(&self) -> usize {
        self.counters.watches.load(Ordering::SeqCst)
    }

    /// Streams and processes not yet torn down
    pub fn active_streams(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Teardown hooks that have run
    pub fn teardowns(&self) -> usize {
        self.counters.teardowns.load(Ordering::SeqCst)
    }

    async fn before_stream(&self) -> Result<(), ClusterError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        match self.stream_error.read().await.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stream_opened(&self) -> impl FnOnce() + Send + 'static {
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        let counters = Arc::clone(&self.counters);
        move || {
            counters.active.fetch_sub(1, Ordering::SeqCst);
            counters.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn publish(&self, kind: &str, event_type: &'static str, object: &Value) {
        let _ = self.changes.send(Change {
            kind: kind.to_string(),
            event_type,
            object: object.clone(),
        });
    }

    async fn resolve_pod(&self, target: &ResourceRef) -> Result<PodRef, ClusterError> {
        let objects = self.objects.read().await;

        let (key, pod) = match &target.name {
            Some(name) => find(&objects, "pod", target.namespace.as_deref(), name)
                .ok_or_else(|| not_found("pod", target))?,
            None => {
                let container = target.container.as_deref().ok_or_else(|| {
                    ClusterError::Api("a pod name or container name is required".to_string())
                })?;
                objects
                    .iter()
                    .filter(|((kind, namespace, _), _)| {
                        kind == "pod"
                            && target
                                .namespace
                                .as_ref()
                                .is_none_or(|wanted| namespace.as_ref() == Some(wanted))
                    })
                    .find(|(_, pod)| containers(pod).contains(&container))
                    .ok_or_else(|| {
                        ClusterError::Api(format!("no pod runs container \"{}\"", container))
                    })?
            }
        };

        let available = containers(pod);
        let container = match &target.container {
            Some(container) if available.is_empty() || available.contains(&container.as_str()) => {
                container.clone()
            }
            Some(container) => {
                return Err(ClusterError::Api(format!(
                    "container {} is not valid for pod {}",
                    container, key.2
                )));
            }
            None => available.first().map(|name| name.to_string()).ok_or_else(|| {
                ClusterError::Api(format!("a container name must be specified for pod {}", key.2))
            })?,
        };

        Ok(PodRef {
            namespace: key.1.clone(),
            name: key.2.clone(),
            container,
        })
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn info(&self) -> Result<Value, ClusterError> {
        let objects = self.objects.read().await;
        let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
        for (kind, _, _) in objects.keys() {
            *kinds.entry(kind.as_str()).or_default() += 1;
        }
        Ok(json!({
            "version": self.version,
            "objectCount": objects.len(),
            "kinds": kinds,
        }))
    }

    async fn list(&self, kind: &str, query: &ListQuery) -> Result<Vec<Value>, ClusterError> {
        let kind = normalize_kind(kind);
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((k, namespace, _), _)| {
                *k == kind
                    && query
                        .namespace
                        .as_ref()
                        .is_none_or(|wanted| namespace.as_ref() == Some(wanted))
            })
            .filter(|(_, object)| {
                query
                    .label_selector
                    .as_deref()
                    .is_none_or(|selector| matches_selector(object, selector))
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn get(&self, target: &ResourceRef) -> Result<Value, ClusterError> {
        let kind = normalize_kind(&target.kind);
        let name = required_name(target)?;
        let objects = self.objects.read().await;
        find(&objects, &kind, target.namespace.as_deref(), name)
            .map(|(_, object)| object.clone())
            .ok_or_else(|| not_found(&target.kind, target))
    }

    async fn create(&self, kind: Option<&str>, manifest: Manifest) -> Result<Value, ClusterError> {
        let object = parse_manifest(manifest)?;
        let kind = manifest_kind(kind, &object)?;
        let key = object_key(&kind, &object)?;

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: kind.clone(),
                name: key.2,
            });
        }
        objects.insert(key, object.clone());
        self.publish(&kind, "ADDED", &object);
        debug!(kind = %kind, "Object created");
        Ok(object)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), ClusterError> {
        let kind = normalize_kind(&target.kind);
        let name = required_name(target)?;
        let mut objects = self.objects.write().await;
        let key = find(&objects, &kind, target.namespace.as_deref(), name)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| not_found(&target.kind, target))?;
        if let Some(object) = objects.remove(&key) {
            self.publish(&kind, "DELETED", &object);
        }
        Ok(())
    }

    async fn update_yaml(&self, target: &ResourceRef, yaml: &str) -> Result<Value, ClusterError> {
        let object = parse_manifest(Manifest::Yaml(yaml.to_string()))?;
        let kind = normalize_kind(&target.kind);
        let name = required_name(target)?;
        if let Some(declared) = metadata_str(&object, "name")
            && declared != name
        {
            return Err(ClusterError::Api(format!(
                "the name of the object ({}) does not match the name on the URL ({})",
                declared, name
            )));
        }

        let mut objects = self.objects.write().await;
        let key = find(&objects, &kind, target.namespace.as_deref(), name)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| not_found(&target.kind, target))?;
        objects.insert(key, object.clone());
        self.publish(&kind, "MODIFIED", &object);
        Ok(object)
    }

    async fn update_obj(&self, target: &ResourceRef, patch: Value) -> Result<Value, ClusterError> {
        let kind = normalize_kind(&target.kind);
        let name = required_name(target)?;
        let mut objects = self.objects.write().await;
        let (_, object) = find_mut(&mut objects, &kind, target.namespace.as_deref(), name)
            .ok_or_else(|| not_found(&target.kind, target))?;
        merge_patch(object, patch);
        let updated = object.clone();
        self.publish(&kind, "MODIFIED", &updated);
        Ok(updated)
    }

    async fn apply(&self, manifest: Manifest) -> Result<Value, ClusterError> {
        let object = parse_manifest(manifest)?;
        let kind = manifest_kind(None, &object)?;
        let key = object_key(&kind, &object)?;

        let mut objects = self.objects.write().await;
        let event_type = if objects.contains_key(&key) {
            "MODIFIED"
        } else {
            "ADDED"
        };
        objects.insert(key, object.clone());
        self.publish(&kind, event_type, &object);
        Ok(object)
    }

    async fn status(&self, target: &ResourceRef) -> Result<Value, ClusterError> {
        let object = self.get(target).await?;
        Ok(json!({
            "name": metadata_str(&object, "name"),
            "namespace": metadata_str(&object, "namespace"),
            "status": object.get("status").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn exec(&self, request: ExecRequest) -> Result<SessionIo, ClusterError> {
        self.before_stream().await?;
        let pod = self.resolve_pod(&request.target).await?;
        let Some((program, args)) = request.command.split_first() else {
            return Err(ClusterError::Api("command is required".to_string()));
        };
        debug!(pod = %pod.name, container = %pod.container, program = %program, "Starting process");

        // `echo` prints its arguments and exits; anything else behaves like `cat`
        if program == "echo" {
            let line = format!("{}\n", args.join(" "));
            let output = stream::once(ready(Ok(StreamItem::Output(line)))).boxed();
            return Ok(SessionIo::new(output).with_teardown(self.stream_opened()));
        }

        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(STDIN_CAPACITY);
        let output = ReceiverStream::new(stdin_rx)
            .map(|bytes| Ok(StreamItem::Output(String::from_utf8_lossy(&bytes).into_owned())))
            .boxed();
        Ok(SessionIo::new(output)
            .with_stdin(stdin_tx)
            .with_teardown(self.stream_opened()))
    }

    async fn logs(&self, request: LogRequest) -> Result<SessionIo, ClusterError> {
        self.before_stream().await?;
        let pod = self.resolve_pod(&request.target).await?;
        let key = LogKey {
            namespace: pod.namespace,
            pod: pod.name,
            container: pod.container,
        };

        // Subscribe while holding the read lock so no line is missed or repeated
        let (backlog, rx) = {
            let logs = self.logs.read().await;
            let rx = self.log_tx.subscribe();
            let lines = logs.get(&key).map(Vec::as_slice).unwrap_or_default();
            let skip = request
                .tail_lines
                .map_or(0, |tail| lines.len().saturating_sub(tail));
            (lines[skip..].to_vec(), rx)
        };

        let backlog = stream::iter(
            backlog
                .into_iter()
                .map(|line| Ok(StreamItem::Output(format!("{}\n", line)))),
        );
        let live = BroadcastStream::new(rx).filter_map(move |message| {
            ready(match message {
                Ok((line_key, line)) if line_key == key => {
                    Some(Ok(StreamItem::Output(format!("{}\n", line))))
                }
                Ok(_) => None,
                Err(err) => {
                    warn!(error = %err, "Log follower lagged");
                    None
                }
            })
        });

        Ok(SessionIo::new(backlog.chain(live).boxed()).with_teardown(self.stream_opened()))
    }

    async fn watch(&self, request: WatchRequest) -> Result<SessionIo, ClusterError> {
        self.before_stream().await?;
        let kind = normalize_kind(&request.resource.kind);
        let namespace = request.resource.namespace.clone();
        let name = request.resource.name.clone();
        let selector = request.filter.clone();

        let rx = self.changes.subscribe();
        self.counters.watches.fetch_add(1, Ordering::SeqCst);
        debug!(kind = %kind, "Watch subscribed");

        let output = BroadcastStream::new(rx)
            .filter_map(move |message| {
                ready(match message {
                    Ok(change) => {
                        let object = &change.object;
                        let wanted = change.kind == kind
                            && namespace.as_deref().is_none_or(|wanted| {
                                metadata_str(object, "namespace") == Some(wanted)
                            })
                            && name
                                .as_deref()
                                .is_none_or(|wanted| metadata_str(object, "name") == Some(wanted))
                            && selector
                                .as_deref()
                                .is_none_or(|selector| matches_selector(object, selector));
                        wanted.then(|| {
                            Ok(StreamItem::Event(json!({
                                "type": change.event_type,
                                "object": change.object,
                            })))
                        })
                    }
                    Err(err) => {
                        warn!(error = %err, "Watch lagged");
                        None
                    }
                })
            })
            .boxed();

        Ok(SessionIo::new(output).with_teardown(self.stream_opened()))
    }
}

/// Object kinds are matched case-insensitively (`configMap` and `ConfigMap`)
fn normalize_kind(kind: &str) -> String {
    let kind = kind.to_ascii_lowercase();
    match kind.as_str() {
        "customresourcedefinition" => "crd".to_string(),
        "release" => "helm".to_string(),
        _ => kind,
    }
}

fn metadata_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.get("metadata")?.get(field)?.as_str()
}

fn object_key(kind: &str, object: &Value) -> Result<ObjectKey, ClusterError> {
    let name = metadata_str(object, "name")
        .ok_or_else(|| ClusterError::Api("metadata.name is required".to_string()))?;
    Ok((
        kind.to_string(),
        metadata_str(object, "namespace").map(str::to_string),
        name.to_string(),
    ))
}

fn required_name(target: &ResourceRef) -> Result<&str, ClusterError> {
    target
        .name
        .as_deref()
        .ok_or_else(|| ClusterError::Api(format!("{} name is required", target.kind)))
}

fn not_found(kind: &str, target: &ResourceRef) -> ClusterError {
    ClusterError::NotFound {
        kind: kind.to_string(),
        name: target.display_name(),
    }
}

/// Exact match, or any namespace when none was given
fn find<'a>(
    objects: &'a BTreeMap<ObjectKey, Value>,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
) -> Option<(&'a ObjectKey, &'a Value)> {
    objects.iter().find(|((k, ns, n), _)| {
        k == kind && n == name && namespace.is_none_or(|wanted| ns.as_deref() == Some(wanted))
    })
}

fn find_mut<'a>(
    objects: &'a mut BTreeMap<ObjectKey, Value>,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
) -> Option<(&'a ObjectKey, &'a mut Value)> {
    objects.iter_mut().find(|((k, ns, n), _)| {
        k == kind && n == name && namespace.is_none_or(|wanted| ns.as_deref() == Some(wanted))
    })
}

fn containers(pod: &Value) -> Vec<&str> {
    pod.pointer("/spec/containers")
        .and_then(Value::as_array)
        .map(|containers| {
            containers
                .iter()
                .filter_map(|container| container.get("name")?.as_str())
                .collect()
        })
        .unwrap_or_default()
}

/// Only JSON-flavored YAML is understood here
fn parse_manifest(manifest: Manifest) -> Result<Value, ClusterError> {
    let object = match manifest {
        Manifest::Yaml(text) => serde_json::from_str(&text)
            .map_err(|err| ClusterError::Api(format!("error parsing manifest: {}", err)))?,
        Manifest::Object(object) => object,
    };
    if !object.is_object() {
        return Err(ClusterError::Api("manifest must be an object".to_string()));
    }
    Ok(object)
}

fn manifest_kind(kind: Option<&str>, object: &Value) -> Result<String, ClusterError> {
    kind.or_else(|| object.get("kind").and_then(Value::as_str))
        .map(normalize_kind)
        .ok_or_else(|| ClusterError::Api("manifest has no kind".to_string()))
}

/// `key=value`, `key!=value` and bare `key` terms, comma separated, all must hold
fn matches_selector(object: &Value, selector: &str) -> bool {
    let labels = object.pointer("/metadata/labels");
    let label = |key: &str| {
        labels
            .and_then(|labels| labels.get(key.trim()))
            .and_then(Value::as_str)
    };
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                // A missing label also satisfies inequality
                label(key) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once('=') {
                label(key) == Some(value.trim_start_matches('=').trim())
            } else {
                labels.and_then(|labels| labels.get(term)).is_some()
            }
        })
}

/// JSON merge patch: objects merge recursively, `null` removes, anything else replaces
fn merge_patch(target: &mut Value, patch: Value) {
    let Value::Object(patch) = patch else {
        *target = patch;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(fields) = target {
        for (key, value) in patch {
            if value.is_null() {
                fields.remove(&key);
            } else {
                merge_patch(fields.entry(key).or_insert(Value::Null), value);
            }
        }
    }
}
