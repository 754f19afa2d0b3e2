//! Centralized constants for keys, markers, defaults, and permissions.

/// Files that mark the root of a Pulumi workspace.
pub const WORKSPACE_MARKERS: &[&str] = &["Pulumi.yaml", "Pulumi.yml"];

/// Environment variable overriding workspace root detection.
pub const ROOT_ENV_VAR: &str = "STACK_SECRETS_ROOT";

/// Settings file name at the workspace root.
pub const SETTINGS_FILE: &str = "stack-secrets.toml";

/// Local state directory (audit log, locks) at the workspace root.
pub const STATE_DIR: &str = ".stack-secrets";

/// Stack configuration key holding the descriptor collection.
pub const PASSWORD_CONFIGS_KEY: &str = "password-configs";

/// Prefix of the per-service stack configuration key holding the value.
pub const PASSWORD_VALUE_PREFIX: &str = "passwords";

/// Stack configuration key holding the cloud project id.
pub const DEFAULT_PROJECT_CONFIG_KEY: &str = "gcp-project";

/// Key inside the materialized cluster secret.
pub const CLUSTER_SECRET_KEY: &str = "password";

/// Default ESO store reference.
pub const DEFAULT_SECRET_STORE: &str = "cluster-secret-store";

/// Default ESO store kind.
pub const DEFAULT_SECRET_STORE_KIND: &str = "ClusterSecretStore";

/// Default ESO API version.
pub const DEFAULT_ESO_API_VERSION: &str = "external-secrets.io/v1";

/// Default controller refresh interval.
pub const DEFAULT_REFRESH_INTERVAL: &str = "1h";

/// Default creation policy on the ExternalSecret target.
pub const DEFAULT_CREATION_POLICY: &str = "Owner";

/// Label identifying resources managed by this tool.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`].
pub const LABEL_MANAGED_BY_VALUE: &str = "stack-secrets";

/// Label carrying the owning service name.
pub const LABEL_SERVICE: &str = "stack-secrets/service";

/// Label carrying the owning stack name.
pub const LABEL_STACK: &str = "stack-secrets/stack";

/// Default password length for `add`.
pub const DEFAULT_PASSWORD_LENGTH: usize = 32;

/// Upper bound on generated password length.
pub const MAX_PASSWORD_LENGTH: usize = 4096;

/// Default timeout for a single remote call, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default attempts for transient remote failures.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff, in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Default backoff cap, in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;

/// Permission mode for the state directory.
pub const STATE_DIR_MODE: u32 = 0o700;

/// Permission mode for the audit log.
pub const AUDIT_LOG_MODE: u32 = 0o600;

/// Permission mode for the settings file.
pub const SETTINGS_FILE_MODE: u32 = 0o640;

/// Permission mode for password files written by `get --output`.
pub const SECRET_FILE_MODE: u32 = 0o600;
