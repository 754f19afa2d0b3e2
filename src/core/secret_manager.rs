//! Cloud secret manager client.
//!
//! Secrets are addressed as `projects/<project>/secrets/<id>`; every write
//! appends a new version and reads always take `latest`. Versions are never
//! deleted here. The concrete client drives Google Secret Manager through the
//! `gcloud` CLI.

use crate::error::{Error, Result};
use crate::util::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::util::retry::{self, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub trait SecretManager: Send + Sync {
    /// Ensure the secret exists, then append `value` as a new version.
    fn create_or_update_secret(&self, project: &str, secret_id: &str, value: &str) -> Result<()>;

    /// Payload of the most recent version.
    fn access_latest(&self, project: &str, secret_id: &str) -> Result<Zeroizing<String>>;
}

/// Full resource name of a secret.
pub fn secret_path(project: &str, secret_id: &str) -> String {
    format!("projects/{}/secrets/{}", project, secret_id)
}

const GCLOUD: &str = "gcloud";

pub struct GcloudSecretManager {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    retry: RetryPolicy,
}

/// How a failed gcloud call should be treated.
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    NotFound,
    AlreadyExists,
    Denied(String),
    Other { transient: bool, message: String },
}

impl GcloudSecretManager {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            runner,
            timeout,
            retry,
        }
    }

    fn command<I, S>(&self, args: I, project: &str) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(GCLOUD, self.timeout)
            .args(args)
            .args(["--project", project, "--quiet"])
    }

    /// Run with retries on transient failures. Definitive failures come back
    /// as `Ok(Err(Failure))` so callers decide what they mean.
    fn exec(
        &self,
        operation: &str,
        spec: &CommandSpec,
    ) -> Result<std::result::Result<CommandOutput, Failure>> {
        retry::with_backoff(&self.retry, operation, || {
            let out = self.runner.run(spec)?;
            if out.success {
                return Ok(Ok(out));
            }
            match classify(&out.error_text()) {
                Failure::Other {
                    transient: true,
                    message,
                } => Err(Error::backend(GCLOUD, true, message)),
                failure => Ok(Err(failure)),
            }
        })
    }

    fn secret_exists(&self, project: &str, secret_id: &str) -> Result<bool> {
        let spec = self.command(
            ["secrets", "describe", secret_id, "--format=value(name)"],
            project,
        );
        match self.exec("gcloud secrets describe", &spec) {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(Failure::NotFound)) => Ok(false),
            Ok(Err(failure)) => Err(failure_error(project, secret_id, failure)),
            Err(e) => Err(access_error(project, secret_id, e)),
        }
    }

    fn create_secret(&self, project: &str, secret_id: &str) -> Result<()> {
        let spec = self.command(
            [
                "secrets",
                "create",
                secret_id,
                "--replication-policy=automatic",
            ],
            project,
        );
        match self.exec("gcloud secrets create", &spec) {
            Ok(Ok(_)) => {
                info!(secret = secret_id, project, "created cloud secret");
                Ok(())
            }
            // lost a race with another writer; the secret is there
            Ok(Err(Failure::AlreadyExists)) => Ok(()),
            Ok(Err(failure)) => Err(failure_error(project, secret_id, failure)),
            Err(e) => Err(access_error(project, secret_id, e)),
        }
    }

    fn add_version(&self, project: &str, secret_id: &str, value: &str) -> Result<()> {
        let spec = self
            .command(
                ["secrets", "versions", "add", secret_id, "--data-file=-"],
                project,
            )
            .stdin(value.as_bytes());
        match self.exec("gcloud secrets versions add", &spec) {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(failure)) => Err(failure_error(project, secret_id, failure)),
            Err(e) => Err(access_error(project, secret_id, e)),
        }
    }
}

impl SecretManager for GcloudSecretManager {
    fn create_or_update_secret(&self, project: &str, secret_id: &str, value: &str) -> Result<()> {
        debug!(secret = secret_id, project, "writing new secret version");
        if !self.secret_exists(project, secret_id)? {
            self.create_secret(project, secret_id)?;
        }
        self.add_version(project, secret_id, value)
    }

    fn access_latest(&self, project: &str, secret_id: &str) -> Result<Zeroizing<String>> {
        debug!(secret = secret_id, project, "reading latest secret version");
        let spec = self.command(
            [
                "secrets",
                "versions",
                "access",
                "latest",
                "--secret",
                secret_id,
            ],
            project,
        );
        match self.exec("gcloud secrets versions access", &spec) {
            Ok(Ok(out)) => out.stdout_text(GCLOUD),
            Ok(Err(failure)) => Err(failure_error(project, secret_id, failure)),
            Err(e) => Err(access_error(project, secret_id, e)),
        }
    }
}

fn failure_error(project: &str, secret_id: &str, failure: Failure) -> Error {
    let resource = secret_path(project, secret_id);
    match failure {
        Failure::NotFound => Error::SecretNotFound { resource },
        Failure::AlreadyExists => Error::SecretAccess {
            resource,
            message: "unexpected ALREADY_EXISTS".to_string(),
        },
        Failure::Denied(message) | Failure::Other { message, .. } => {
            Error::SecretAccess { resource, message }
        }
    }
}

// Transport failures that outlived the retry budget surface as access errors.
fn access_error(project: &str, secret_id: &str, e: Error) -> Error {
    match e {
        Error::Backend { message, .. } => Error::SecretAccess {
            resource: secret_path(project, secret_id),
            message,
        },
        other => other,
    }
}

fn classify(stderr: &str) -> Failure {
    if stderr.contains("NOT_FOUND") {
        return Failure::NotFound;
    }
    if stderr.contains("ALREADY_EXISTS") {
        return Failure::AlreadyExists;
    }
    if stderr.contains("PERMISSION_DENIED")
        || stderr.contains("UNAUTHENTICATED")
        || stderr.contains("Reauthentication")
    {
        return Failure::Denied(stderr.to_string());
    }
    let lower = stderr.to_ascii_lowercase();
    let transient = ["UNAVAILABLE", "DEADLINE_EXCEEDED", "RESOURCE_EXHAUSTED", "INTERNAL"]
        .iter()
        .any(|code| stderr.contains(code))
        || ["connection reset", "connection refused", "timed out", "temporarily"]
            .iter()
            .any(|marker| lower.contains(marker));
    Failure::Other {
        transient,
        message: stderr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::command::ScriptedRunner;

    const NOT_FOUND: &str = "ERROR: (gcloud.secrets.describe) NOT_FOUND: Secret [projects/123/secrets/pg-root-pw] not found or has no versions.";
    const DENIED: &str = "ERROR: (gcloud.secrets.describe) PERMISSION_DENIED: Permission 'secretmanager.secrets.get' denied for resource 'projects/dimo/secrets/pg-root-pw'";

    fn client(runner: Arc<ScriptedRunner>) -> GcloudSecretManager {
        GcloudSecretManager::new(
            runner,
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                backoff_multiplier: 2.0,
            },
        )
    }

    fn verbs(runner: &ScriptedRunner) -> Vec<String> {
        runner
            .calls()
            .iter()
            .map(|c| c.args[..3].join(" "))
            .collect()
    }

    #[test]
    fn test_secret_path() {
        assert_eq!(secret_path("dimo", "pg-root-pw"), "projects/dimo/secrets/pg-root-pw");
    }

    #[test]
    fn test_creates_when_missing_then_adds_version() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(NOT_FOUND).ok("").ok("");
        client(runner.clone())
            .create_or_update_secret("dimo", "pg-root-pw", "v1")
            .unwrap();
        assert_eq!(
            verbs(&runner),
            vec![
                "secrets describe pg-root-pw",
                "secrets create pg-root-pw",
                "secrets versions add"
            ]
        );
        let add = &runner.calls()[2];
        assert_eq!(add.stdin.as_deref().map(|v| v.as_slice()), Some(&b"v1"[..]));
        assert!(!add.args.iter().any(|a| a == "v1"));
    }

    #[test]
    fn test_existing_secret_skips_create() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("projects/123/secrets/pg-root-pw").ok("");
        client(runner.clone())
            .create_or_update_secret("dimo", "pg-root-pw", "v2")
            .unwrap();
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_create_race_already_exists_is_ok() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .fail(NOT_FOUND)
            .fail("ERROR: (gcloud.secrets.create) ALREADY_EXISTS: Secret [x] already exists.")
            .ok("");
        assert!(client(runner)
            .create_or_update_secret("dimo", "pg-root-pw", "v1")
            .is_ok());
    }

    #[test]
    fn test_permission_denied_does_not_create() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(DENIED);
        let err = client(runner.clone())
            .create_or_update_secret("dimo", "pg-root-pw", "v1")
            .unwrap_err();
        assert!(matches!(err, Error::SecretAccess { .. }));
        assert_eq!(runner.calls().len(), 1, "must not attempt creation");
    }

    #[test]
    fn test_transient_probe_retried_then_surfaces_as_access_error() {
        let runner = Arc::new(ScriptedRunner::new());
        for _ in 0..3 {
            runner.fail("ERROR: (gcloud.secrets.describe) UNAVAILABLE: connection reset");
        }
        let err = client(runner.clone())
            .create_or_update_secret("dimo", "pg-root-pw", "v1")
            .unwrap_err();
        assert!(matches!(err, Error::SecretAccess { .. }));
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_access_latest_returns_payload_verbatim() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("p@ss word");
        let value = client(runner.clone()).access_latest("dimo", "pg-root-pw").unwrap();
        assert_eq!(value.as_str(), "p@ss word");
        let args = &runner.calls()[0].args;
        assert!(args.windows(2).any(|w| w == ["--secret", "pg-root-pw"]));
        assert!(args.iter().any(|a| a == "latest"));
    }

    #[test]
    fn test_access_latest_not_found() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(NOT_FOUND);
        let err = client(runner).access_latest("dimo", "pg-root-pw").unwrap_err();
        match err {
            Error::SecretNotFound { resource } => {
                assert_eq!(resource, "projects/dimo/secrets/pg-root-pw")
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_access_latest_denied_is_access_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(DENIED);
        let err = client(runner).access_latest("dimo", "pg-root-pw").unwrap_err();
        assert!(matches!(err, Error::SecretAccess { .. }));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(NOT_FOUND), Failure::NotFound);
        assert!(matches!(classify(DENIED), Failure::Denied(_)));
        assert!(matches!(
            classify("ERROR: DEADLINE_EXCEEDED"),
            Failure::Other {
                transient: true,
                ..
            }
        ));
        assert!(matches!(
            classify("ERROR: INVALID_ARGUMENT: bad id"),
            Failure::Other {
                transient: false,
                ..
            }
        ));
    }
}
