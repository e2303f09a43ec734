//! Request payloads of the resource actions (camelCase on the wire)

use serde::Deserialize;
use serde_json::Value;

use crate::cluster::{ListQuery, Manifest, ResourceRef};
use crate::error::DispatchError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPayload {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub label_selector: Option<String>,
}

impl From<ListPayload> for ListQuery {
    fn from(payload: ListPayload) -> Self {
        Self {
            namespace: payload.namespace,
            label_selector: payload.label_selector,
        }
    }
}

/// get, delete, status
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedPayload {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl NamedPayload {
    pub fn target(&self, kind: &str) -> ResourceRef {
        ResourceRef::new(kind)
            .namespace(self.namespace.clone())
            .name(self.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateYamlPayload {
    #[serde(flatten)]
    pub target: NamedPayload,
    pub yaml: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateObjPayload {
    #[serde(flatten)]
    pub target: NamedPayload,
    pub object: Value,
}

/// create, apply: exactly one of `yaml` or `object`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPayload {
    #[serde(default)]
    pub yaml: Option<String>,
    #[serde(default)]
    pub object: Option<Value>,
}

impl TryFrom<ManifestPayload> for Manifest {
    type Error = DispatchError;

    fn try_from(payload: ManifestPayload) -> Result<Self, Self::Error> {
        match (payload.yaml, payload.object) {
            (Some(yaml), None) => Ok(Manifest::Yaml(yaml)),
            (None, Some(object)) => Ok(Manifest::Object(object)),
            (Some(_), Some(_)) => Err(DispatchError::InvalidPayload(
                "only one of `yaml` or `object` may be given".to_string(),
            )),
            (None, None) => Err(DispatchError::InvalidPayload(
                "missing field `yaml` or `object`".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecPayload {
    #[serde(default)]
    pub namespace: Option<String>,
    /// Pod name; without it the first pod running `container` is used
    #[serde(default)]
    pub name: Option<String>,
    pub container: String,
    pub cmd: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdinPayload {
    pub session_id: String,
    #[serde(default)]
    pub bytes: String,
    /// Close the process stdin after `bytes`
    #[serde(default)]
    pub eof: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLogPayload {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub tail_lines: Option<usize>,
}

/// closeLog, watch delete
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPayload {
    /// Kind to watch, e.g. `deployment`
    pub resource: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}
