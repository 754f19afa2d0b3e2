//! Advisory file locks (flock(2) via `fs2`).

use crate::constants;
use crate::core::paths::WorkspacePaths;
use crate::util::fs as local_fs;
use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// An exclusive file lock. Released on drop.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Acquire an exclusive lock, blocking until available.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .with_context(|| format!("acquire lock {}", path.display()))?;
        Ok(Self { _file: file })
    }

    /// `Ok(None)` if another holder has it.
    pub fn try_exclusive(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            // fs2 on Linux may return EAGAIN as Other
            Err(ref e) if e.raw_os_error() == Some(11) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("try lock {}", path.display())),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

/// Hold the per-stack lock for the duration of a mutating command.
///
/// Fails immediately instead of queueing behind another operator.
pub fn lock_stack(paths: &WorkspacePaths, stack: &str) -> Result<FileLock> {
    local_fs::ensure_dir(&paths.state_dir, constants::STATE_DIR_MODE)?;
    let path = paths.stack_lock(stack);
    match FileLock::try_exclusive(&path)? {
        Some(lock) => Ok(lock),
        None => bail!(
            "another operation on stack '{}' is in progress (lock {})",
            stack,
            path.display()
        ),
    }
}
