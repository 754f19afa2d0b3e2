//! Drift detection between the cloud secret and its materialized copy.

use crate::constants;
use crate::core::bridge::ClusterClient;
use crate::core::config_store::ConfigStore;
use crate::core::orchestrator::resolve_project;
use crate::core::secret_manager::SecretManager;
use crate::error::Result;
use crate::models::comparison::{ComparisonResult, RevealedValues};
use crate::models::settings::SettingsFile;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    /// Also check the stack configuration copy against the cloud value.
    pub include_stack: bool,
    /// Return the raw values. Callers must audit this.
    pub reveal: bool,
}

pub struct Comparator<'a> {
    store: &'a ConfigStore,
    secrets: &'a dyn SecretManager,
    cluster: &'a dyn ClusterClient,
    settings: &'a SettingsFile,
}

impl<'a> Comparator<'a> {
    pub fn new(
        store: &'a ConfigStore,
        secrets: &'a dyn SecretManager,
        cluster: &'a dyn ClusterClient,
        settings: &'a SettingsFile,
    ) -> Self {
        Self {
            store,
            secrets,
            cluster,
            settings,
        }
    }

    pub fn compare(
        &self,
        stack: &str,
        service: &str,
        opts: CompareOptions,
    ) -> Result<ComparisonResult> {
        let config = self.store.get(stack, service)?;
        let project = resolve_project(self.store, self.settings, stack)?;

        let cloud = self.secrets.access_latest(&project, &config.cloud_secret_id)?;
        let cluster = self.cluster.read_secret_value(
            &config.target_namespace,
            &config.target_secret_name,
            constants::CLUSTER_SECRET_KEY,
        )?;
        let matches = cloud.as_str() == cluster.as_str();

        let stack_copy = if opts.include_stack {
            self.store.get_password(stack, service)?
        } else {
            None
        };
        let stack_matches = opts
            .include_stack
            .then(|| stack_copy.as_ref().map_or(false, |v| v.as_str() == cloud.as_str()));

        if !matches {
            warn!(stack, service, "cluster secret differs from cloud value");
        }
        if stack_matches == Some(false) {
            warn!(stack, service, "stack configuration copy differs from cloud value");
        }

        let cloud_length = cloud.chars().count();
        let cluster_length = cluster.chars().count();
        let revealed = opts.reveal.then(|| RevealedValues {
            cloud,
            cluster,
            stack: stack_copy,
        });

        Ok(ComparisonResult {
            service_name: config.service_name,
            matches,
            cloud_length,
            cluster_length,
            stack_matches,
            revealed,
        })
    }
}
