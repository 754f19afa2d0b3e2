use crate::cli::CliContext;
use crate::constants;
use crate::core::audit_log::AuditContext;
use crate::core::comparator::CompareOptions;
use crate::core::file_lock;
use crate::core::orchestrator::AddOptions;
use crate::error::Error;
use crate::models::password_config::PasswordConfig;
use crate::util::fs::write_atomic;
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Table};
use dialoguer::Confirm;
use std::io::Write;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Stack name
    #[arg(long)]
    pub stack: String,

    /// Service name (key of the configuration)
    #[arg(long)]
    pub service: String,

    /// Password length
    #[arg(long, default_value_t = constants::DEFAULT_PASSWORD_LENGTH)]
    pub length: usize,

    /// Use special characters
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    pub special: bool,

    /// Secret Manager secret ID
    #[arg(long = "gcp-secret", value_name = "ID")]
    pub gcp_secret: String,

    /// Kubernetes secret name
    #[arg(long = "k8s-secret", value_name = "NAME")]
    pub k8s_secret: String,

    /// Kubernetes namespace
    #[arg(long = "k8s-namespace", value_name = "NS")]
    pub k8s_namespace: String,

    /// Store the configuration without applying the ExternalSecret
    #[arg(long)]
    pub no_apply: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[arg(long)]
    pub stack: String,

    /// Only this service (all services when omitted)
    #[arg(long)]
    pub service: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    #[arg(long)]
    pub stack: String,

    #[arg(long)]
    pub service: String,

    /// Write the password to this file (mode 0600) instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Table,
    Json,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub stack: String,

    #[arg(long, value_enum, default_value_t = ListFormat::Table)]
    pub format: ListFormat,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[arg(long)]
    pub stack: String,

    #[arg(long)]
    pub service: String,

    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[arg(long)]
    pub stack: String,

    #[arg(long)]
    pub service: String,

    /// Also compare the copy kept in the stack configuration
    #[arg(long)]
    pub include_stack: bool,

    /// Print the raw values (audited; requires --reason)
    #[arg(long, requires = "reason")]
    pub reveal: bool,

    /// Why the values are being revealed
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[arg(long)]
    pub stack: String,

    /// Only this service (all services when omitted)
    #[arg(long)]
    pub service: Option<String>,

    /// Print the manifests instead of applying them
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run_add(ctx: &CliContext, args: AddArgs) -> Result<()> {
    let backends = ctx.backends()?;
    let _lock = file_lock::lock_stack(&ctx.paths, &args.stack)?;

    let config = PasswordConfig {
        service_name: args.service.clone(),
        length: args.length,
        use_special: args.special,
        cloud_secret_id: args.gcp_secret,
        target_secret_name: args.k8s_secret,
        target_namespace: args.k8s_namespace,
    };
    let result = backends.orchestrator(&ctx.settings).add(
        &args.stack,
        config,
        AddOptions {
            apply: !args.no_apply,
        },
    );
    ctx.audit(AuditContext::new("add", &args.stack, Some(&args.service)), &result);
    let outcome = result
        .with_context(|| format!("add '{}' to stack '{}'", args.service, args.stack))?;

    if !outcome.shared_secret_with.is_empty() {
        eprintln!(
            "warning: the same Secret Manager secret is also written by: {}",
            outcome.shared_secret_with.join(", ")
        );
    }
    println!("Added/updated password configuration for {}", args.service);
    match outcome.applied {
        Some(resource) => println!(
            "Applied ExternalSecret {}/{}",
            resource.metadata.namespace, resource.metadata.name
        ),
        None => println!(
            "ExternalSecret not applied; run `password-manager apply --stack {} --service {}`",
            args.stack, args.service
        ),
    }
    Ok(())
}

pub fn run_update(ctx: &CliContext, args: UpdateArgs) -> Result<()> {
    let backends = ctx.backends()?;
    let _lock = file_lock::lock_stack(&ctx.paths, &args.stack)?;

    let result = backends
        .orchestrator(&ctx.settings)
        .rotate(&args.stack, args.service.as_deref());
    ctx.audit(
        AuditContext::new("update", &args.stack, args.service.as_deref()),
        &result,
    );

    match result {
        Ok(report) if report.rotated.is_empty() => {
            println!("No password configurations in stack '{}'", args.stack);
            Ok(())
        }
        Ok(report) => {
            for service in &report.rotated {
                println!("  [OK]      {}", service);
            }
            println!("Passwords updated successfully");
            Ok(())
        }
        Err(Error::PartialRotationFailure {
            stack,
            succeeded,
            failed,
            skipped,
        }) => {
            for service in &succeeded {
                println!("  [OK]      {}", service);
            }
            for failure in &failed {
                println!("  [FAIL]    {}", failure);
            }
            for service in &skipped {
                println!("  [SKIPPED] {}", service);
            }
            bail!(
                "{} of {} services failed to rotate in stack '{}'; re-run update to converge",
                failed.len(),
                succeeded.len() + failed.len() + skipped.len(),
                stack
            )
        }
        Err(e) => Err(e.into()),
    }
}

pub fn run_get(ctx: &CliContext, args: GetArgs) -> Result<()> {
    let backends = ctx.backends()?;
    let result = backends
        .orchestrator(&ctx.settings)
        .get_password(&args.stack, &args.service);
    ctx.audit(AuditContext::new("get", &args.stack, Some(&args.service)), &result);
    let password = result?;

    if let Some(output) = args.output {
        write_atomic(&output, password.as_bytes(), constants::SECRET_FILE_MODE)?;
        println!("Wrote {}", output.display());
        return Ok(());
    }

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", password.as_str()).context("write to stdout")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}

pub fn run_list(ctx: &CliContext, args: ListArgs) -> Result<()> {
    let backends = ctx.backends()?;
    let configs = backends.orchestrator(&ctx.settings).list(&args.stack)?;

    if args.format == ListFormat::Json {
        let json = serde_json::to_string_pretty(&configs).context("serialize list")?;
        println!("{}", json);
        return Ok(());
    }

    if configs.is_empty() {
        println!("No password configurations in stack '{}'", args.stack);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Service").add_attribute(Attribute::Bold),
        Cell::new("Length").add_attribute(Attribute::Bold),
        Cell::new("Special").add_attribute(Attribute::Bold),
        Cell::new("Secret Manager ID").add_attribute(Attribute::Bold),
        Cell::new("Kubernetes Secret").add_attribute(Attribute::Bold),
    ]);
    for config in configs.values() {
        table.add_row(vec![
            config.service_name.clone(),
            config.length.to_string(),
            (if config.use_special { "yes" } else { "no" }).to_string(),
            config.cloud_secret_id.clone(),
            format!("{}/{}", config.target_namespace, config.target_secret_name),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn run_delete(ctx: &CliContext, args: DeleteArgs) -> Result<()> {
    if ctx.non_interactive && !args.yes {
        bail!("--non-interactive requires --yes for delete");
    }
    let backends = ctx.backends()?;
    let _lock = file_lock::lock_stack(&ctx.paths, &args.stack)?;
    let orchestrator = backends.orchestrator(&ctx.settings);

    let config = orchestrator.config(&args.stack, &args.service)?;
    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete password configuration '{}' from stack '{}'? Secret {} and {}/{} will be left in place",
                args.service,
                args.stack,
                config.cloud_secret_id,
                config.target_namespace,
                config.target_secret_name
            ))
            .default(false)
            .interact()
            .context("read confirmation")?;
        if !confirmed {
            println!("Aborted");
            return Ok(());
        }
    }

    let result = orchestrator.delete(&args.stack, &args.service);
    ctx.audit(AuditContext::new("delete", &args.stack, Some(&args.service)), &result);
    let outcome = result?;

    println!("Deleted password configuration for {}", args.service);
    println!("Left in place, clean up separately if no longer needed:");
    match &outcome.orphaned_cloud_secret {
        Some(path) => println!("  Secret Manager: {}", path),
        None => println!(
            "  Secret Manager: {} (project not resolved)",
            outcome.config.cloud_secret_id
        ),
    }
    println!(
        "  Kubernetes:     ExternalSecret and Secret {}",
        outcome.orphaned_cluster_secret
    );
    Ok(())
}

pub fn run_compare(ctx: &CliContext, args: CompareArgs) -> Result<()> {
    let reason = args.reason.as_deref().map(str::trim).unwrap_or("");
    if args.reveal && reason.is_empty() {
        bail!("--reason is required with --reveal");
    }
    let backends = ctx.backends()?;
    let result = backends.comparator(&ctx.settings).compare(
        &args.stack,
        &args.service,
        CompareOptions {
            include_stack: args.include_stack,
            reveal: args.reveal,
        },
    );
    if args.reveal {
        ctx.audit(
            AuditContext::new("compare-reveal", &args.stack, Some(&args.service))
                .with_reason(reason),
            &result,
        );
    }
    let comparison = result?;

    println!("\nPassword Comparison for {}:", comparison.service_name);
    println!("Match: {}", comparison.matches);
    println!("Secret Manager Length: {}", comparison.cloud_length);
    println!("Kubernetes Secret Length: {}", comparison.cluster_length);
    if let Some(stack_matches) = comparison.stack_matches {
        println!("Stack Config Match: {}", stack_matches);
    }
    if let Some(values) = &comparison.revealed {
        println!("Secret Manager Value: {}", values.cloud.as_str());
        println!("Kubernetes Secret Value: {}", values.cluster.as_str());
        if let Some(stack) = &values.stack {
            println!("Stack Config Value: {}", stack.as_str());
        }
    }

    if !comparison.matches {
        println!(
            "\nWARNING: passwords do not match. The external-secrets controller refreshes every {}; compare again after the next refresh.",
            ctx.settings.cluster.refresh_interval
        );
    }
    if comparison.stack_matches == Some(false) {
        println!("WARNING: the stack configuration copy differs from Secret Manager. Run update to converge.");
    }
    Ok(())
}

pub fn run_apply(ctx: &CliContext, args: ApplyArgs) -> Result<()> {
    let backends = ctx.backends()?;
    let orchestrator = backends.orchestrator(&ctx.settings);

    if args.dry_run {
        let resources =
            orchestrator.apply_declarations(&args.stack, args.service.as_deref(), true)?;
        for resource in &resources {
            let manifest = serde_yaml::to_string(resource).context("serialize ExternalSecret")?;
            println!("---\n{}", manifest.trim_end());
        }
        return Ok(());
    }

    let _lock = file_lock::lock_stack(&ctx.paths, &args.stack)?;
    let result = orchestrator.apply_declarations(&args.stack, args.service.as_deref(), false);
    ctx.audit(
        AuditContext::new("apply", &args.stack, args.service.as_deref()),
        &result,
    );
    let resources = result?;
    if resources.is_empty() {
        println!("No password configurations in stack '{}'", args.stack);
    }
    for resource in &resources {
        println!(
            "Applied ExternalSecret {}/{}",
            resource.metadata.namespace, resource.metadata.name
        );
    }
    Ok(())
}
