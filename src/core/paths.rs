//! Workspace path resolution and local state layout.

use crate::constants;
use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub settings_toml: PathBuf,
    pub state_dir: PathBuf,
    pub audit_log: PathBuf,
    pub audit_lock: PathBuf,
}

impl WorkspacePaths {
    /// Resolve the workspace from CLI arg, env var, or by walking up from the
    /// current directory to the nearest project marker.
    pub fn resolve(root_arg: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = root_arg {
            return Ok(Self::from_root(root));
        }
        if let Ok(root) = env::var(constants::ROOT_ENV_VAR) {
            if !root.is_empty() {
                return Ok(Self::from_root(PathBuf::from(root)));
            }
        }
        let cwd = env::current_dir()?;
        Ok(Self::from_root(find_workspace_root(&cwd)?))
    }

    pub fn from_root(root: PathBuf) -> Self {
        let settings_toml = root.join(constants::SETTINGS_FILE);
        let state_dir = root.join(constants::STATE_DIR);
        let audit_log = state_dir.join("audit.log");
        let audit_lock = state_dir.join("audit.lock");
        Self {
            root,
            settings_toml,
            state_dir,
            audit_log,
            audit_lock,
        }
    }

    /// Advisory lock file serializing mutating commands on one stack.
    pub fn stack_lock(&self, stack: &str) -> PathBuf {
        let safe: String = stack
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.state_dir.join(format!("{}.lock", safe))
    }

    pub fn has_marker(&self) -> bool {
        looks_like_root(&self.root)
    }
}

/// Walk `start` and its ancestors looking for a project marker file.
pub fn find_workspace_root(start: &Path) -> Result<PathBuf> {
    start
        .ancestors()
        .find(|dir| looks_like_root(dir))
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::WorkspaceNotFound {
            start: start.to_path_buf(),
            marker: constants::WORKSPACE_MARKERS[0].to_string(),
        })
}

fn looks_like_root(path: &Path) -> bool {
    constants::WORKSPACE_MARKERS
        .iter()
        .any(|marker| path.join(marker).is_file())
}

impl std::fmt::Display for WorkspacePaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "workspace@{}", self.root.display())
    }
}
