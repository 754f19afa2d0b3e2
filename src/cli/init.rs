use crate::cli::CliContext;
use crate::constants;
use crate::core::settings;
use crate::models::settings::SettingsFile;
use crate::util::fs as local_fs;
use anyhow::{bail, Result};
use clap::Args;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing stack-secrets.toml with defaults
    #[arg(long)]
    pub force: bool,
}

pub fn run(ctx: &CliContext, args: InitArgs) -> Result<()> {
    let paths = &ctx.paths;
    if !paths.has_marker() {
        eprintln!(
            "warning: {} has no {}; pulumi commands will fail there",
            paths.root.display(),
            constants::WORKSPACE_MARKERS.join(" or ")
        );
    }

    local_fs::ensure_dir(&paths.state_dir, constants::STATE_DIR_MODE)?;

    if paths.settings_toml.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            paths.settings_toml.display()
        );
    }
    settings::save(&paths.settings_toml, &SettingsFile::default())?;

    println!("initialized {}", paths);
    println!("  settings: {}", paths.settings_toml.display());
    println!("  state:    {}", paths.state_dir.display());
    Ok(())
}
