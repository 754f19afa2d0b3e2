//! In-memory stand-ins for the three remote ports, for tests.
//!
//! Each fake is cheaply cloneable and clones share state, so a test can keep
//! one handle for assertions while the code under test owns another.

use crate::core::bridge::ClusterClient;
use crate::core::config_store::StackConfigBackend;
use crate::core::secret_manager::{secret_path, SecretManager};
use crate::error::{Error, Result};
use crate::models::external_secret::ExternalSecret;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

type Key = (String, String);

fn key(a: &str, b: &str) -> Key {
    (a.to_string(), b.to_string())
}

#[derive(Clone, Default)]
pub(crate) struct MemoryStackConfig {
    entries: Arc<Mutex<BTreeMap<Key, (String, bool)>>>,
    failing_keys: Arc<Mutex<BTreeSet<String>>>,
    failing_removes: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryStackConfig {
    pub(crate) fn insert(&self, stack: &str, k: &str, value: &str, sensitive: bool) {
        self.entries
            .lock()
            .unwrap()
            .insert(key(stack, k), (value.to_string(), sensitive));
    }

    /// Stored value and its sensitive flag.
    pub(crate) fn entry(&self, stack: &str, k: &str) -> Option<(String, bool)> {
        self.entries.lock().unwrap().get(&key(stack, k)).cloned()
    }

    /// Make every write to `k` fail.
    pub(crate) fn fail_writes_to(&self, k: &str) {
        self.failing_keys.lock().unwrap().insert(k.to_string());
    }

    /// Make the next removal of `k` fail with a transport error.
    pub(crate) fn fail_next_remove_of(&self, k: &str) {
        self.failing_removes.lock().unwrap().insert(k.to_string());
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StackConfigBackend for MemoryStackConfig {
    fn get(&self, stack: &str, k: &str) -> Result<Option<Zeroizing<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entry(stack, k).map(|(v, _)| Zeroizing::new(v)))
    }

    fn set(&self, stack: &str, k: &str, value: &str, sensitive: bool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_keys.lock().unwrap().contains(k) {
            return Err(Error::backend("pulumi", false, format!("cannot write {}", k)));
        }
        self.insert(stack, k, value, sensitive);
        Ok(())
    }

    fn remove(&self, stack: &str, k: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_removes.lock().unwrap().remove(k) {
            return Err(Error::backend("pulumi", true, "connection reset"));
        }
        self.entries.lock().unwrap().remove(&key(stack, k));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct MemorySecretManager {
    versions: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
    failing: Arc<Mutex<BTreeSet<String>>>,
    creates: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl MemorySecretManager {
    /// Make every write to `secret_id` fail with an access error.
    pub(crate) fn fail_on(&self, secret_id: &str) {
        self.failing.lock().unwrap().insert(secret_id.to_string());
    }

    pub(crate) fn versions(&self, project: &str, secret_id: &str) -> Vec<String> {
        self.versions
            .lock()
            .unwrap()
            .get(&secret_path(project, secret_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Latest payload by full resource name, as the in-cluster controller sees it.
    pub(crate) fn latest_by_path(&self, path: &str) -> Option<String> {
        self.versions
            .lock()
            .unwrap()
            .get(path)
            .and_then(|v| v.last().cloned())
    }

    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SecretManager for MemorySecretManager {
    fn create_or_update_secret(&self, project: &str, secret_id: &str, value: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = secret_path(project, secret_id);
        if self.failing.lock().unwrap().contains(secret_id) {
            return Err(Error::SecretAccess {
                resource: path,
                message: "PERMISSION_DENIED".into(),
            });
        }
        let mut versions = self.versions.lock().unwrap();
        let entry = versions.entry(path).or_insert_with(|| {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });
        entry.push(value.to_string());
        Ok(())
    }

    fn access_latest(&self, project: &str, secret_id: &str) -> Result<Zeroizing<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = secret_path(project, secret_id);
        self.latest_by_path(&path)
            .map(Zeroizing::new)
            .ok_or(Error::SecretNotFound { resource: path })
    }
}

#[derive(Clone, Default)]
pub(crate) struct MemoryCluster {
    declarations: Arc<Mutex<BTreeMap<Key, ExternalSecret>>>,
    secrets: Arc<Mutex<BTreeMap<Key, BTreeMap<String, String>>>>,
    applies: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl MemoryCluster {
    pub(crate) fn declaration(&self, namespace: &str, name: &str) -> Option<ExternalSecret> {
        self.declarations
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    pub(crate) fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Write a secret directly, bypassing any declaration.
    pub(crate) fn materialize(&self, namespace: &str, name: &str, k: &str, value: &str) {
        self.secrets
            .lock()
            .unwrap()
            .entry(key(namespace, name))
            .or_default()
            .insert(k.to_string(), value.to_string());
    }

    /// One controller reconciliation pass: copy the latest cloud value of
    /// every declared remote key into its target secret.
    pub(crate) fn reconcile(&self, cloud: &MemorySecretManager) {
        let declarations: Vec<ExternalSecret> =
            self.declarations.lock().unwrap().values().cloned().collect();
        for es in declarations {
            for data in &es.spec.data {
                if let Some(value) = cloud.latest_by_path(&data.remote_ref.key) {
                    self.materialize(
                        &es.metadata.namespace,
                        &es.spec.target.name,
                        &data.secret_key,
                        &value,
                    );
                }
            }
        }
    }
}

impl ClusterClient for MemoryCluster {
    fn apply(&self, resource: &ExternalSecret) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.declarations.lock().unwrap().insert(
            key(&resource.metadata.namespace, &resource.metadata.name),
            resource.clone(),
        );
        Ok(())
    }

    fn read_secret_value(
        &self,
        namespace: &str,
        name: &str,
        k: &str,
    ) -> Result<Zeroizing<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(data) = self.secrets.lock().unwrap().get(&key(namespace, name)) {
            return data
                .get(k)
                .map(|v| Zeroizing::new(v.clone()))
                .ok_or_else(|| Error::MissingSecretKey {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    key: k.to_string(),
                });
        }
        let declared = self
            .declarations
            .lock()
            .unwrap()
            .values()
            .any(|es| es.metadata.namespace == namespace && es.spec.target.name == name);
        if declared {
            Err(Error::MaterializationNotReady {
                namespace: namespace.to_string(),
                name: name.to_string(),
                detail: None,
            })
        } else {
            Err(Error::SecretNotFound {
                resource: format!("secret {}/{}", namespace, name),
            })
        }
    }
}
