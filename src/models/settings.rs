//! Settings file model (`stack-secrets.toml`).

use crate::constants;
use crate::models::policy::PolicySection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    #[serde(default)]
    pub secret_manager: SecretManagerSection,
    #[serde(default)]
    pub cluster: ClusterSection,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub rotation: RotationSection,
    #[serde(default)]
    pub policy: PolicySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretManagerSection {
    /// Fixed cloud project; wins over the stack configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_project_config_key")]
    pub project_config_key: String,
}

impl Default for SecretManagerSection {
    fn default() -> Self {
        Self {
            project: None,
            project_config_key: default_project_config_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSection {
    #[serde(default = "default_secret_store")]
    pub secret_store: String,
    #[serde(default = "default_secret_store_kind")]
    pub secret_store_kind: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_creation_policy")]
    pub creation_policy: String,
    /// kubeconfig context; current context when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            secret_store: default_secret_store(),
            secret_store_kind: default_secret_store_kind(),
            refresh_interval: default_refresh_interval(),
            api_version: default_api_version(),
            creation_policy: default_creation_policy(),
            context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RemoteSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationSection {
    /// Stop at the first failing service instead of rotating the rest.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_project_config_key() -> String {
    constants::DEFAULT_PROJECT_CONFIG_KEY.to_string()
}

fn default_secret_store() -> String {
    constants::DEFAULT_SECRET_STORE.to_string()
}

fn default_secret_store_kind() -> String {
    constants::DEFAULT_SECRET_STORE_KIND.to_string()
}

fn default_refresh_interval() -> String {
    constants::DEFAULT_REFRESH_INTERVAL.to_string()
}

fn default_api_version() -> String {
    constants::DEFAULT_ESO_API_VERSION.to_string()
}

fn default_creation_policy() -> String {
    constants::DEFAULT_CREATION_POLICY.to_string()
}

fn default_timeout_secs() -> u64 {
    constants::DEFAULT_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    constants::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    constants::DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    constants::DEFAULT_MAX_BACKOFF_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings: SettingsFile = toml::from_str("").unwrap();
        assert_eq!(settings, SettingsFile::default());
        assert_eq!(settings.cluster.secret_store, "cluster-secret-store");
        assert_eq!(settings.cluster.refresh_interval, "1h");
        assert_eq!(settings.secret_manager.project_config_key, "gcp-project");
        assert_eq!(settings.remote.max_attempts, 3);
        assert!(!settings.rotation.fail_fast);
    }

    #[test]
    fn test_partial_sections() {
        let raw = r#"
[secret_manager]
project = "dimo-prod"

[cluster]
refresh_interval = "15m"

[policy]
min_length = 20
"#;
        let settings: SettingsFile = toml::from_str(raw).unwrap();
        assert_eq!(settings.secret_manager.project.as_deref(), Some("dimo-prod"));
        assert_eq!(settings.cluster.refresh_interval, "15m");
        assert_eq!(settings.cluster.secret_store_kind, "ClusterSecretStore");
        assert_eq!(settings.policy.min_length, Some(20));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<SettingsFile>("[cluster]\nstore = \"x\"\n").is_err());
    }
}
