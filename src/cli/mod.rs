//! CLI routing and command dispatch.

use crate::core::audit_log::{self, AuditContext};
use crate::core::bridge::KubectlClient;
use crate::core::comparator::Comparator;
use crate::core::config_store::{ConfigStore, PulumiBackend};
use crate::core::orchestrator::Orchestrator;
use crate::core::paths::WorkspacePaths;
use crate::core::secret_manager::GcloudSecretManager;
use crate::core::settings;
use crate::models::settings::SettingsFile;
use crate::util::command::{CommandRunner, SystemRunner};
use crate::util::retry::RetryPolicy;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

pub mod audit;
pub mod doctor;
pub mod init;
pub mod password;

/// Shared context passed to all command handlers.
pub struct CliContext {
    pub paths: WorkspacePaths,
    pub non_interactive: bool,
    pub settings: SettingsFile,
    pub settings_load_error: Option<String>,
}

impl CliContext {
    /// Settings, or the reason they could not be loaded.
    pub fn require_settings(&self) -> Result<&SettingsFile> {
        match &self.settings_load_error {
            Some(e) => bail!("{}", e),
            None => Ok(&self.settings),
        }
    }

    /// Remote backends wired to the real `pulumi`, `gcloud` and `kubectl`.
    pub fn backends(&self) -> Result<Backends> {
        let settings = self.require_settings()?;
        Ok(Backends::new(&self.paths, settings, Arc::new(SystemRunner)))
    }

    /// Record an operation outcome; a failing audit write is reported, not fatal.
    pub fn audit<T, E: Display>(&self, entry: AuditContext, result: &std::result::Result<T, E>) {
        let (success, error) = match result {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        if let Err(e) = audit_log::log_with_result(&self.paths, entry, success, error) {
            eprintln!("warning: audit log failed: {:#}", e);
        }
    }
}

/// The three remote collaborators for one invocation.
pub struct Backends {
    pub store: ConfigStore,
    pub secrets: GcloudSecretManager,
    pub cluster: KubectlClient,
}

impl Backends {
    pub fn new(
        paths: &WorkspacePaths,
        settings: &SettingsFile,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let timeout = settings.remote.timeout();
        let retry = RetryPolicy::from_settings(&settings.remote);
        Self {
            store: ConfigStore::new(Box::new(PulumiBackend::new(
                runner.clone(),
                paths.root.clone(),
                timeout,
                retry.clone(),
            ))),
            secrets: GcloudSecretManager::new(runner.clone(), timeout, retry.clone()),
            cluster: KubectlClient::new(runner, settings.cluster.context.clone(), timeout, retry),
        }
    }

    pub fn orchestrator<'a>(&'a self, settings: &'a SettingsFile) -> Orchestrator<'a> {
        Orchestrator::new(&self.store, &self.secrets, &self.cluster, settings)
    }

    pub fn comparator<'a>(&'a self, settings: &'a SettingsFile) -> Comparator<'a> {
        Comparator::new(&self.store, &self.secrets, &self.cluster, settings)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "password-manager",
    version,
    about = "Generate, rotate and distribute service passwords across Pulumi stacks, Secret Manager and Kubernetes"
)]
pub struct Cli {
    /// Workspace root (directory holding Pulumi.yaml; also STACK_SECRETS_ROOT)
    #[arg(long, global = true, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Run in non-interactive mode (no prompts, suitable for automation)
    #[arg(long, global = true, env = "STACK_SECRETS_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let paths = WorkspacePaths::resolve(self.root)?;

        // Broken settings only block commands that need them; init and doctor
        // still run.
        let mut settings_load_error = None;
        let settings = match settings::load(&paths.settings_toml) {
            Ok(settings) => settings,
            Err(e) => {
                settings_load_error = Some(e.to_string());
                SettingsFile::default()
            }
        };

        let ctx = CliContext {
            paths,
            non_interactive: self.non_interactive,
            settings,
            settings_load_error,
        };

        match self.command {
            Commands::Init(args) => init::run(&ctx, args),
            Commands::Add(args) => password::run_add(&ctx, args),
            Commands::Update(args) => password::run_update(&ctx, args),
            Commands::Get(args) => password::run_get(&ctx, args),
            Commands::List(args) => password::run_list(&ctx, args),
            Commands::Delete(args) => password::run_delete(&ctx, args),
            Commands::Compare(args) => password::run_compare(&ctx, args),
            Commands::Apply(args) => password::run_apply(&ctx, args),
            Commands::Audit { command } => audit::run(&ctx, command),
            Commands::Doctor(args) => doctor::run(&ctx, args),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write default settings and create the local state directory
    Init(init::InitArgs),
    /// Add or update a password configuration
    Add(password::AddArgs),
    /// Rotate passwords in the stack config and Secret Manager
    Update(password::UpdateArgs),
    /// Print the current password for a service
    Get(password::GetArgs),
    /// List password configurations
    List(password::ListArgs),
    /// Delete a password configuration
    Delete(password::DeleteArgs),
    /// Compare Secret Manager with the materialized Kubernetes secret
    Compare(password::CompareArgs),
    /// Apply (or print) ExternalSecret declarations
    Apply(password::ApplyArgs),
    /// View or verify the audit trail
    Audit {
        #[command(subcommand)]
        command: audit::AuditCommand,
    },
    /// Diagnose tools, settings and project resolution (read-only)
    Doctor(doctor::DoctorArgs),
}
