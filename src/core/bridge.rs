//! External-secret bridge.
//!
//! Turns a [`PasswordConfig`] into an ExternalSecret declaration that points the
//! in-cluster controller at the cloud secret, and reads back what the
//! controller materialized. Building a declaration is pure; applying and
//! reading go through [`ClusterClient`].

use crate::constants;
use crate::core::secret_manager::secret_path;
use crate::error::{Error, Result};
use crate::models::external_secret::{
    ExternalSecret, ExternalSecretData, ExternalSecretSpec, ExternalSecretStatus,
    ExternalSecretTarget, ObjectMeta, RemoteRef, SecretStoreRef,
};
use crate::models::password_config::PasswordConfig;
use crate::models::settings::ClusterSection;
use crate::util::command::{CommandRunner, CommandSpec};
use crate::util::retry::{self, RetryPolicy};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Store kinds the controller understands.
const STORE_KINDS: &[&str] = &["ClusterSecretStore", "SecretStore"];

/// Everything needed to declare one materialized secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSecretDeclaration {
    pub service_name: String,
    pub secret_store_ref: String,
    pub secret_store_kind: String,
    /// Full cloud resource name, `projects/<project>/secrets/<id>`.
    pub remote_key: String,
    pub target_name: String,
    pub target_namespace: String,
    pub refresh_interval: String,
    pub api_version: String,
    pub creation_policy: String,
}

/// Build the declaration for `config` in cloud `project`.
///
/// The same inputs always produce the same declaration, so re-applying an
/// unchanged config is a no-op on the cluster side.
pub fn build_declaration(
    config: &PasswordConfig,
    project: &str,
    cluster: &ClusterSection,
) -> Result<ExternalSecretDeclaration> {
    config.validate()?;
    if project.trim().is_empty() {
        return Err(Error::invalid_config("cloud project cannot be empty"));
    }
    if cluster.secret_store.trim().is_empty() {
        return Err(Error::invalid_config("secret store reference cannot be empty"));
    }
    if !STORE_KINDS.contains(&cluster.secret_store_kind.as_str()) {
        return Err(Error::invalid_config(format!(
            "secret store kind '{}' must be one of {}",
            cluster.secret_store_kind,
            STORE_KINDS.join(", ")
        )));
    }
    if !is_valid_interval(&cluster.refresh_interval) {
        return Err(Error::invalid_config(format!(
            "refresh interval '{}' is not a duration like 1h or 30m",
            cluster.refresh_interval
        )));
    }
    if !cluster.api_version.starts_with("external-secrets.io/") {
        return Err(Error::invalid_config(format!(
            "api version '{}' is not an external-secrets.io version",
            cluster.api_version
        )));
    }

    Ok(ExternalSecretDeclaration {
        service_name: config.service_name.clone(),
        secret_store_ref: cluster.secret_store.clone(),
        secret_store_kind: cluster.secret_store_kind.clone(),
        remote_key: secret_path(project, &config.cloud_secret_id),
        target_name: config.target_secret_name.clone(),
        target_namespace: config.target_namespace.clone(),
        refresh_interval: cluster.refresh_interval.clone(),
        api_version: cluster.api_version.clone(),
        creation_policy: cluster.creation_policy.clone(),
    })
}

impl ExternalSecretDeclaration {
    /// The typed resource; named after the target secret.
    pub fn to_resource(&self, stack: &str) -> ExternalSecret {
        let mut labels = BTreeMap::new();
        labels.insert(
            constants::LABEL_MANAGED_BY.to_string(),
            constants::LABEL_MANAGED_BY_VALUE.to_string(),
        );
        labels.insert(constants::LABEL_SERVICE.to_string(), self.service_name.clone());
        labels.insert(constants::LABEL_STACK.to_string(), label_value(stack));

        ExternalSecret {
            api_version: self.api_version.clone(),
            kind: ExternalSecret::KIND.to_string(),
            metadata: ObjectMeta {
                name: self.target_name.clone(),
                namespace: self.target_namespace.clone(),
                labels,
            },
            spec: ExternalSecretSpec {
                refresh_interval: self.refresh_interval.clone(),
                secret_store_ref: SecretStoreRef {
                    name: self.secret_store_ref.clone(),
                    kind: self.secret_store_kind.clone(),
                },
                target: ExternalSecretTarget {
                    name: self.target_name.clone(),
                    creation_policy: self.creation_policy.clone(),
                },
                data: vec![ExternalSecretData {
                    secret_key: constants::CLUSTER_SECRET_KEY.to_string(),
                    remote_ref: RemoteRef {
                        key: self.remote_key.clone(),
                        version: None,
                    },
                }],
            },
        }
    }
}

/// Label values are limited to 63 chars of `[A-Za-z0-9._-]`.
fn label_value(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(63)
        .collect();
    while out.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        out.pop();
    }
    out
}

/// Go-style duration: one or more `<digits><unit>` groups, unit in h/m/s/ms.
fn is_valid_interval(value: &str) -> bool {
    let mut rest = value;
    if rest.is_empty() {
        return false;
    }
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
        let unit = ["ms", "h", "m", "s"]
            .iter()
            .find(|u| rest.starts_with(*u));
        match unit {
            Some(u) => rest = &rest[u.len()..],
            None => return false,
        }
    }
    true
}

/// Cluster control plane access.
pub trait ClusterClient: Send + Sync {
    /// Create or update the resource (server-side idempotent).
    fn apply(&self, resource: &ExternalSecret) -> Result<()>;

    /// Value of `key` in the materialized secret `namespace/name`.
    fn read_secret_value(&self, namespace: &str, name: &str, key: &str)
        -> Result<Zeroizing<String>>;
}

const KUBECTL: &str = "kubectl";

/// [`ClusterClient`] backed by the `kubectl` CLI.
pub struct KubectlClient {
    runner: Arc<dyn CommandRunner>,
    context: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ExternalSecretObject {
    #[serde(default)]
    status: Option<ExternalSecretStatus>,
}

impl KubectlClient {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        context: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            context,
            timeout,
            retry,
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(KUBECTL, self.timeout);
        if let Some(ctx) = &self.context {
            spec = spec.args(["--context", ctx.as_str()]);
        }
        spec.args(args)
    }

    /// Run with retries. `Ok(None)` when the server answered NotFound.
    fn exec(&self, operation: &str, spec: &CommandSpec) -> Result<Option<Zeroizing<Vec<u8>>>> {
        retry::with_backoff(&self.retry, operation, || {
            let out = self.runner.run(spec)?;
            if out.success {
                return Ok(Some(out.stdout));
            }
            let stderr = out.error_text();
            if is_not_found(&stderr) {
                return Ok(None);
            }
            Err(Error::backend(
                KUBECTL,
                is_transient_kubectl_error(&stderr),
                stderr,
            ))
        })
    }

    /// Why a missing secret is missing: declared but not yet reconciled, or
    /// not declared at all.
    fn missing_secret_error(&self, namespace: &str, name: &str) -> Result<Error> {
        let spec = self.command(["get", "externalsecret", name, "-n", namespace, "-o", "json"]);
        match self.exec("kubectl get externalsecret", &spec)? {
            Some(stdout) => {
                let detail = serde_json::from_slice::<ExternalSecretObject>(&stdout)
                    .ok()
                    .and_then(|obj| obj.status)
                    .and_then(|status| status.ready_summary());
                Ok(Error::MaterializationNotReady {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    detail,
                })
            }
            None => Ok(Error::SecretNotFound {
                resource: format!("secret {}/{}", namespace, name),
            }),
        }
    }
}

impl ClusterClient for KubectlClient {
    fn apply(&self, resource: &ExternalSecret) -> Result<()> {
        let manifest = serde_yaml::to_string(resource).map_err(|e| {
            Error::invalid_config(format!("cannot serialize ExternalSecret: {}", e))
        })?;
        let spec = self.command(["apply", "-f", "-"]).stdin(manifest.as_bytes());
        debug!(
            namespace = %resource.metadata.namespace,
            name = %resource.metadata.name,
            "applying ExternalSecret"
        );
        match self.exec("kubectl apply", &spec)? {
            Some(_) => {
                info!(
                    namespace = %resource.metadata.namespace,
                    name = %resource.metadata.name,
                    "ExternalSecret applied"
                );
                Ok(())
            }
            // apply never answers NotFound for the object itself; this is a
            // missing namespace or CRD
            None => Err(Error::backend(
                KUBECTL,
                false,
                format!(
                    "cannot apply ExternalSecret {}/{}: namespace or CRD not found",
                    resource.metadata.namespace, resource.metadata.name
                ),
            )),
        }
    }

    fn read_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Zeroizing<String>> {
        debug!(namespace, name, "reading materialized secret");
        let spec = self.command(["get", "secret", name, "-n", namespace, "-o", "json"]);
        let stdout = match self.exec("kubectl get secret", &spec)? {
            Some(stdout) => stdout,
            None => return Err(self.missing_secret_error(namespace, name)?),
        };

        let object: SecretObject = serde_json::from_slice(&stdout).map_err(|e| {
            Error::backend(KUBECTL, false, format!("unexpected secret JSON: {}", e))
        })?;
        let encoded = object
            .data
            .get(key)
            .ok_or_else(|| Error::MissingSecretKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            })?;
        let decoded = Zeroizing::new(STANDARD.decode(encoded.as_bytes()).map_err(|_| {
            Error::backend(KUBECTL, false, format!("secret {}/{} key '{}' is not base64", namespace, name, key))
        })?);
        String::from_utf8(decoded.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| {
                Error::backend(
                    KUBECTL,
                    false,
                    format!("secret {}/{} key '{}' is not UTF-8", namespace, name, key),
                )
            })
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("(NotFound)") || stderr.contains("doesn't have a resource type")
}

fn is_transient_kubectl_error(stderr: &str) -> bool {
    [
        "Unable to connect to the server",
        "connection refused",
        "connection reset",
        "i/o timeout",
        "TLS handshake timeout",
        "ServiceUnavailable",
        "InternalError",
        "context deadline exceeded",
        "timed out",
        "the object has been modified",
    ]
    .iter()
    .any(|marker| stderr.contains(marker))
}
