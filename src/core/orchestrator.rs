//! Lifecycle orchestration: register, rotate, read, delete, declare.
//!
//! Collaborators are passed in explicitly so tests can substitute the
//! in-memory fakes.

use crate::core::bridge::{self, ClusterClient};
use crate::core::config_store::ConfigStore;
use crate::core::generator;
use crate::core::secret_manager::{secret_path, SecretManager};
use crate::error::{Error, Result, ServiceFailure};
use crate::models::external_secret::ExternalSecret;
use crate::models::password_config::{PasswordConfig, PasswordConfigMap};
use crate::models::settings::SettingsFile;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub struct Orchestrator<'a> {
    store: &'a ConfigStore,
    secrets: &'a dyn SecretManager,
    cluster: &'a dyn ClusterClient,
    settings: &'a SettingsFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOptions {
    /// Apply the ExternalSecret declaration after storing the descriptor.
    pub apply: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self { apply: true }
    }
}

#[derive(Debug)]
pub struct AddOutcome {
    /// The applied resource, when applying was requested.
    pub applied: Option<ExternalSecret>,
    /// Other services that already write to the same cloud secret.
    pub shared_secret_with: Vec<String>,
}

/// Services rotated by a fully successful run, in rotation order.
#[derive(Debug, Default)]
pub struct RotationReport {
    pub rotated: Vec<String>,
}

/// What `delete` left behind for separate cleanup.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub config: PasswordConfig,
    /// Cloud secret path, when the stack's project could be resolved.
    pub orphaned_cloud_secret: Option<String>,
    /// `namespace/name` of the ExternalSecret and its materialized secret.
    pub orphaned_cluster_secret: String,
}

impl<'a> Orchestrator<'a> {
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

    /// Validate, store, then declare `config` in the cluster.
    pub fn add(&self, stack: &str, config: PasswordConfig, opts: AddOptions) -> Result<AddOutcome> {
        config.validate()?;
        let policy = &self.settings.policy;
        if !policy.meets_min_length(config.length) {
            return Err(Error::invalid_config(format!(
                "length {} is below the configured minimum of {}",
                config.length,
                policy.min_length.unwrap_or_default()
            )));
        }
        if !policy.is_namespace_allowed(&config.target_namespace) {
            return Err(Error::invalid_config(format!(
                "namespace '{}' is not in the allowed list",
                config.target_namespace
            )));
        }

        let existing = self.store.list(stack)?;
        let shared_secret_with: Vec<String> = existing
            .values()
            .filter(|c| {
                c.service_name != config.service_name && c.cloud_secret_id == config.cloud_secret_id
            })
            .map(|c| c.service_name.clone())
            .collect();
        if !shared_secret_with.is_empty() {
            warn!(
                stack,
                service = %config.service_name,
                secret = %config.cloud_secret_id,
                others = ?shared_secret_with,
                "cloud secret id already used by another service"
            );
        }

        // build before storing so a bad declaration leaves the store untouched
        let resource = if opts.apply {
            let project = resolve_project(self.store, self.settings, stack)?;
            Some(bridge::build_declaration(&config, &project, &self.settings.cluster)?.to_resource(stack))
        } else {
            None
        };

        let service = config.service_name.clone();
        self.store.upsert(stack, config)?;
        info!(stack, service = %service, "password configuration stored");

        if let Some(resource) = &resource {
            self.cluster.apply(resource)?;
        }

        Ok(AddOutcome {
            applied: resource,
            shared_secret_with,
        })
    }

    /// Rotate every config in `stack`, or only `filter`.
    ///
    /// Services are processed one at a time in name order. A failure after the
    /// stack copy was written is not rolled back; re-running converges both
    /// sides.
    pub fn rotate(&self, stack: &str, filter: Option<&str>) -> Result<RotationReport> {
        let selected = self.select(stack, filter)?;
        if selected.is_empty() {
            debug!(stack, "no password configurations to rotate");
            return Ok(RotationReport::default());
        }
        let project = resolve_project(self.store, self.settings, stack)?;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        let mut remaining = selected.into_values();

        while let Some(config) = remaining.next() {
            match self.rotate_one(stack, &project, &config) {
                Ok(()) => succeeded.push(config.service_name),
                Err(error) => {
                    warn!(stack, service = %config.service_name, error = %error, "rotation failed");
                    failed.push(ServiceFailure {
                        service: config.service_name,
                        error: Box::new(error),
                    });
                    if self.settings.rotation.fail_fast {
                        skipped.extend(remaining.by_ref().map(|c| c.service_name));
                        break;
                    }
                }
            }
        }

        if failed.is_empty() {
            return Ok(RotationReport { rotated: succeeded });
        }
        Err(Error::PartialRotationFailure {
            stack: stack.to_string(),
            succeeded,
            failed,
            skipped,
        })
    }

    fn rotate_one(&self, stack: &str, project: &str, config: &PasswordConfig) -> Result<()> {
        let password = generator::generate(config.length, config.use_special)?;
        self.store
            .set_password(stack, &config.service_name, &password)?;
        self.secrets
            .create_or_update_secret(project, &config.cloud_secret_id, &password)?;
        info!(
            stack,
            service = %config.service_name,
            secret = %config.cloud_secret_id,
            length = password.len(),
            "password rotated"
        );
        Ok(())
    }

    /// Current cloud value for a service.
    pub fn get_password(&self, stack: &str, service: &str) -> Result<Zeroizing<String>> {
        let config = self.store.get(stack, service)?;
        let project = resolve_project(self.store, self.settings, stack)?;
        self.secrets.access_latest(&project, &config.cloud_secret_id)
    }

    pub fn list(&self, stack: &str) -> Result<PasswordConfigMap> {
        self.store.list(stack)
    }

    pub fn config(&self, stack: &str, service: &str) -> Result<PasswordConfig> {
        self.store.get(stack, service)
    }

    /// Remove the descriptor and the stack copy of the value.
    ///
    /// The cloud secret and the cluster declaration stay behind; the outcome
    /// names them.
    pub fn delete(&self, stack: &str, service: &str) -> Result<DeleteOutcome> {
        let config = self.store.get(stack, service)?;
        // value first: while the descriptor exists a re-run can still reach it
        self.store.remove_password(stack, service)?;
        self.store.delete(stack, service)?;

        let orphaned_cloud_secret = match resolve_project(self.store, self.settings, stack) {
            Ok(project) => Some(secret_path(&project, &config.cloud_secret_id)),
            Err(e) => {
                warn!(stack, service, error = %e, "cannot resolve project for orphan report");
                None
            }
        };
        let orphaned_cluster_secret =
            format!("{}/{}", config.target_namespace, config.target_secret_name);
        warn!(
            stack,
            service,
            cloud_secret = orphaned_cloud_secret.as_deref().unwrap_or(&config.cloud_secret_id),
            cluster_secret = %orphaned_cluster_secret,
            "configuration deleted; cloud and cluster secrets left in place"
        );

        Ok(DeleteOutcome {
            config,
            orphaned_cloud_secret,
            orphaned_cluster_secret,
        })
    }

    /// Build (and unless `dry_run`, apply) declarations for all or one config.
    pub fn apply_declarations(
        &self,
        stack: &str,
        filter: Option<&str>,
        dry_run: bool,
    ) -> Result<Vec<ExternalSecret>> {
        let selected = self.select(stack, filter)?;
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let project = resolve_project(self.store, self.settings, stack)?;
        let resources = selected
            .values()
            .map(|config| {
                bridge::build_declaration(config, &project, &self.settings.cluster)
                    .map(|decl| decl.to_resource(stack))
            })
            .collect::<Result<Vec<_>>>()?;
        if !dry_run {
            for resource in &resources {
                self.cluster.apply(resource)?;
            }
        }
        Ok(resources)
    }

    fn select(&self, stack: &str, filter: Option<&str>) -> Result<PasswordConfigMap> {
        let mut configs = self.store.list(stack)?;
        match filter {
            None => Ok(configs),
            Some(service) => {
                let config = configs.remove(service).ok_or_else(|| Error::ConfigNotFound {
                    stack: stack.to_string(),
                    service: service.to_string(),
                })?;
                Ok(PasswordConfigMap::from([(service.to_string(), config)]))
            }
        }
    }
}

/// Cloud project for `stack`: the settings override, else the stack's own
/// configuration.
pub fn resolve_project(store: &ConfigStore, settings: &SettingsFile, stack: &str) -> Result<String> {
    if let Some(project) = settings
        .secret_manager
        .project
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        return Ok(project.to_string());
    }
    let key = &settings.secret_manager.project_config_key;
    store
        .get_value(stack, key)?
        .ok_or_else(|| Error::ProjectNotConfigured {
            stack: stack.to_string(),
            key: key.clone(),
        })
}
