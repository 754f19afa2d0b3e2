use crate::constants;
use crate::error::{Error, Result};
use crate::models::settings::SettingsFile;
use crate::util::fs::write_atomic;
use std::fs;
use std::path::Path;

/// Load `stack-secrets.toml`; an absent file yields the defaults.
pub fn load(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = fs::read_to_string(path).map_err(|e| Error::Settings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| Error::Settings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn save(path: &Path, settings: &SettingsFile) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(settings)?;
    write_atomic(path, content.as_bytes(), constants::SETTINGS_FILE_MODE)
}
