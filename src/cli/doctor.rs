//! Read-only diagnostics for tools, settings and per-stack project resolution.

use crate::cli::CliContext;
use crate::constants;
use crate::core::orchestrator::resolve_project;
use crate::util::command::{is_available, SystemRunner};
use anyhow::{bail, Result};
use clap::Args;
use std::fs;
use std::time::Duration;

const TOOL_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// External tools and the arguments that make them print a version.
const TOOLS: &[(&str, &[&str])] = &[
    ("pulumi", &["version"]),
    ("gcloud", &["--version"]),
    ("kubectl", &["version", "--client"]),
];

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Check that the cloud project resolves for these stacks
    #[arg(long = "stack", value_name = "STACK")]
    pub stacks: Vec<String>,
}

pub fn run(ctx: &CliContext, args: DoctorArgs) -> Result<()> {
    let paths = &ctx.paths;
    let mut ok = 0u32;
    let mut warn = 0u32;
    let mut fail = 0u32;

    println!("Doctor: {}", paths);

    if paths.has_marker() {
        println!("  [PASS] workspace marker found in {}", paths.root.display());
        ok += 1;
    } else {
        println!(
            "  [FAIL] no {} in {}",
            constants::WORKSPACE_MARKERS.join(" or "),
            paths.root.display()
        );
        fail += 1;
    }

    match &ctx.settings_load_error {
        Some(e) => {
            println!("  [FAIL] {}", e);
            fail += 1;
        }
        None if paths.settings_toml.exists() => {
            println!("  [PASS] settings parsed: {}", paths.settings_toml.display());
            ok += 1;
        }
        None => {
            println!("  [INFO] no {}; using defaults", constants::SETTINGS_FILE);
        }
    }

    for (tool, version_args) in TOOLS {
        if is_available(&SystemRunner, tool, version_args, TOOL_PROBE_TIMEOUT) {
            println!("  [PASS] {} available", tool);
            ok += 1;
        } else {
            println!("  [FAIL] {} not found on PATH (or not runnable)", tool);
            fail += 1;
        }
    }

    // best-effort; state dir is created on first mutating command
    if let Ok(meta) = fs::metadata(&paths.state_dir) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode() & 0o777;
            if mode == constants::STATE_DIR_MODE {
                println!("  [PASS] state dir mode ok: {:04o}", mode);
                ok += 1;
            } else {
                println!(
                    "  [WARN] state dir mode: {:04o} (expected {:04o})",
                    mode,
                    constants::STATE_DIR_MODE
                );
                warn += 1;
            }
        }
        #[cfg(not(unix))]
        let _ = meta;
    }

    if !args.stacks.is_empty() {
        match ctx.backends() {
            Ok(backends) => {
                for stack in &args.stacks {
                    match resolve_project(&backends.store, &ctx.settings, stack) {
                        Ok(project) => {
                            println!("  [PASS] stack '{}' -> project '{}'", stack, project);
                            ok += 1;
                        }
                        Err(e) => {
                            println!("  [FAIL] stack '{}': {}", stack, e);
                            fail += 1;
                        }
                    }
                }
            }
            Err(e) => {
                println!("  [FAIL] cannot check stacks: {:#}", e);
                fail += 1;
            }
        }
    }

    println!();
    println!("Doctor summary: {} pass, {} warn, {} fail", ok, warn, fail);
    if fail > 0 {
        bail!("doctor found {} failing check(s)", fail);
    }
    Ok(())
}
