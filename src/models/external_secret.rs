//! External Secrets Operator (ESO) resource types.
//!
//! Typed structs for the ExternalSecret custom resource. They are built by the
//! bridge and only serialized when the declaration is applied.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ESO ExternalSecret resource
///
/// A namespace-scoped resource that syncs a secret from the cloud backend
/// (via a ClusterSecretStore) into a Kubernetes Secret.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecret {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ExternalSecretSpec,
}

impl ExternalSecret {
    pub const KIND: &'static str = "ExternalSecret";
}

/// Namespaced object metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// ExternalSecret spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretSpec {
    /// Refresh interval for syncing (e.g., "1h", "30m")
    pub refresh_interval: String,
    pub secret_store_ref: SecretStoreRef,
    pub target: ExternalSecretTarget,
    pub data: Vec<ExternalSecretData>,
}

/// Reference to a SecretStore or ClusterSecretStore
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecretStoreRef {
    pub name: String,
    pub kind: String,
}

/// Target Kubernetes Secret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretTarget {
    pub name: String,
    pub creation_policy: String,
}

/// One key mapping from the remote secret into the target Secret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretData {
    pub secret_key: String,
    pub remote_ref: RemoteRef,
}

/// Reference into the remote store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteRef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The subset of an ExternalSecret's status used for readiness reporting.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExternalSecretStatus {
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ExternalSecretStatus {
    /// Human-readable summary of the Ready condition, if the controller set one.
    pub fn ready_summary(&self) -> Option<String> {
        let ready = self.conditions.iter().find(|c| c.type_ == "Ready")?;
        let mut out = format!("Ready={}", ready.status);
        if let Some(reason) = &ready.reason {
            out.push_str(&format!(", reason={}", reason));
        }
        if let Some(message) = &ready.message {
            out.push_str(&format!(": {}", message));
        }
        Some(out)
    }
}
