//! Stack-scoped store of password descriptors and their current values.
//!
//! All descriptors for a stack live in one JSON collection under
//! `password-configs`; each generated value lives under its own sensitive
//! `passwords.<service>` key. The concrete backend is the Pulumi stack
//! configuration, reached through the `pulumi` CLI.

use crate::constants;
use crate::error::{Error, Result};
use crate::models::password_config::{self, PasswordConfig, PasswordConfigMap};
use crate::util::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::util::retry::{self, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// Raw key/value access to one stack's configuration.
pub trait StackConfigBackend: Send + Sync {
    /// `Ok(None)` when the key is not set.
    fn get(&self, stack: &str, key: &str) -> Result<Option<Zeroizing<String>>>;
    fn set(&self, stack: &str, key: &str, value: &str, sensitive: bool) -> Result<()>;
    /// Succeeds when the key is already absent.
    fn remove(&self, stack: &str, key: &str) -> Result<()>;
}

pub struct ConfigStore {
    backend: Box<dyn StackConfigBackend>,
}

impl ConfigStore {
    pub fn new(backend: Box<dyn StackConfigBackend>) -> Self {
        Self { backend }
    }

    /// All descriptors for `stack`; empty when none were ever stored.
    pub fn list(&self, stack: &str) -> Result<PasswordConfigMap> {
        let raw = match self.backend.get(stack, constants::PASSWORD_CONFIGS_KEY)? {
            Some(raw) => raw,
            None => return Ok(PasswordConfigMap::new()),
        };
        if raw.trim().is_empty() {
            return Ok(PasswordConfigMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| Error::Parse {
            stack: stack.to_string(),
            key: constants::PASSWORD_CONFIGS_KEY.to_string(),
            source,
        })
    }

    pub fn get(&self, stack: &str, service: &str) -> Result<PasswordConfig> {
        self.list(stack)?
            .remove(service)
            .ok_or_else(|| Error::ConfigNotFound {
                stack: stack.to_string(),
                service: service.to_string(),
            })
    }

    /// Insert or replace by service name.
    pub fn upsert(&self, stack: &str, config: PasswordConfig) -> Result<()> {
        let mut configs = self.list(stack)?;
        configs.insert(config.service_name.clone(), config);
        self.save(stack, &configs)
    }

    /// Remove a descriptor. Returns whether it was present.
    pub fn delete(&self, stack: &str, service: &str) -> Result<bool> {
        let mut configs = self.list(stack)?;
        if configs.remove(service).is_none() {
            return Ok(false);
        }
        self.save(stack, &configs)?;
        Ok(true)
    }

    /// Record the current value for a service under its sensitive key.
    pub fn set_password(&self, stack: &str, service: &str, value: &str) -> Result<()> {
        self.backend
            .set(stack, &password_config::value_key(service), value, true)
    }

    pub fn get_password(&self, stack: &str, service: &str) -> Result<Option<Zeroizing<String>>> {
        self.backend.get(stack, &password_config::value_key(service))
    }

    pub fn remove_password(&self, stack: &str, service: &str) -> Result<()> {
        self.backend
            .remove(stack, &password_config::value_key(service))
    }

    /// Plain (non-secret) configuration value, such as the cloud project id.
    pub fn get_value(&self, stack: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .backend
            .get(stack, key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    fn save(&self, stack: &str, configs: &PasswordConfigMap) -> Result<()> {
        let json = serde_json::to_string(configs).map_err(|source| Error::Parse {
            stack: stack.to_string(),
            key: constants::PASSWORD_CONFIGS_KEY.to_string(),
            source,
        })?;
        self.backend
            .set(stack, constants::PASSWORD_CONFIGS_KEY, &json, false)
    }
}

/// Pulumi stack configuration via the `pulumi` CLI.
pub struct PulumiBackend {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    timeout: Duration,
    retry: RetryPolicy,
}

const PULUMI: &str = "pulumi";

impl PulumiBackend {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        workdir: PathBuf,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            workdir,
            timeout,
            retry,
        }
    }

    fn command(&self, verb: &str, key: &str, stack: &str) -> CommandSpec {
        CommandSpec::new(PULUMI, self.timeout).args([
            "config".to_string(),
            verb.to_string(),
            key.to_string(),
            "--stack".to_string(),
            stack.to_string(),
            "--cwd".to_string(),
            self.workdir.display().to_string(),
            "--non-interactive".to_string(),
        ])
    }

    /// Run with retries. `Ok(None)` when the key is missing and `missing_ok`.
    fn exec(
        &self,
        operation: &str,
        stack: &str,
        spec: &CommandSpec,
        missing_ok: bool,
    ) -> Result<Option<CommandOutput>> {
        retry::with_backoff(&self.retry, operation, || {
            let out = self.runner.run(spec)?;
            if out.success {
                return Ok(Some(out));
            }
            let stderr = out.error_text();
            if missing_ok && is_missing_key(&stderr) {
                return Ok(None);
            }
            Err(classify(stack, stderr))
        })
    }
}

impl StackConfigBackend for PulumiBackend {
    fn get(&self, stack: &str, key: &str) -> Result<Option<Zeroizing<String>>> {
        debug!(stack, key, "reading stack config");
        let spec = self.command("get", key, stack);
        match self.exec("pulumi config get", stack, &spec, true)? {
            Some(out) => {
                let text = out.stdout_text(PULUMI)?;
                let trimmed = text.trim_end_matches(['\r', '\n']);
                Ok(Some(Zeroizing::new(trimmed.to_string())))
            }
            None => Ok(None),
        }
    }

    fn set(&self, stack: &str, key: &str, value: &str, sensitive: bool) -> Result<()> {
        debug!(stack, key, sensitive, "writing stack config");
        let mut spec = self.command("set", key, stack);
        if sensitive {
            spec = spec.arg("--secret").stdin(value.as_bytes());
        } else {
            spec = spec.arg("--").arg(value);
        }
        self.exec("pulumi config set", stack, &spec, false)?;
        Ok(())
    }

    fn remove(&self, stack: &str, key: &str) -> Result<()> {
        debug!(stack, key, "removing stack config");
        let spec = self.command("rm", key, stack);
        self.exec("pulumi config rm", stack, &spec, true)?;
        Ok(())
    }
}

fn is_missing_key(stderr: &str) -> bool {
    stderr.contains("configuration key") && stderr.contains("not found")
}

fn classify(stack: &str, stderr: String) -> Error {
    let transient = is_transient_pulumi_error(&stderr);
    Error::backend(PULUMI, transient, format!("stack '{}': {}", stack, stderr))
}

fn is_transient_pulumi_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    [
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "service unavailable",
        "503",
        "502",
        "429",
        "too many requests",
        "eof",
        "conflict: another update is currently in progress",
    ]
    .iter()
    .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fakes::MemoryStackConfig;
    use crate::util::command::ScriptedRunner;

    fn sample(name: &str) -> PasswordConfig {
        PasswordConfig {
            service_name: name.into(),
            length: 24,
            use_special: false,
            cloud_secret_id: format!("{}-pw", name),
            target_secret_name: format!("{}-secret", name),
            target_namespace: "default".into(),
        }
    }

    fn memory_store() -> (MemoryStackConfig, ConfigStore) {
        let backend = MemoryStackConfig::default();
        (backend.clone(), ConfigStore::new(Box::new(backend)))
    }

    #[test]
    fn test_list_empty_when_key_absent() {
        let (_, store) = memory_store();
        let configs = store.list("dimo-eu").unwrap();
        assert!(configs.is_empty());
    }

    #[test]
    fn test_upsert_then_list_round_trip() {
        let (_, store) = memory_store();
        store.upsert("dimo-eu", sample("pg-root")).unwrap();
        let configs = store.list("dimo-eu").unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs["pg-root"], sample("pg-root"));
    }

    #[test]
    fn test_upsert_replaces_by_key() {
        let (_, store) = memory_store();
        store.upsert("dimo-eu", sample("pg-root")).unwrap();
        let updated = PasswordConfig {
            length: 48,
            ..sample("pg-root")
        };
        store.upsert("dimo-eu", updated.clone()).unwrap();
        let configs = store.list("dimo-eu").unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs["pg-root"], updated);
    }

    #[test]
    fn test_delete_removes_and_is_idempotent() {
        let (_, store) = memory_store();
        store.upsert("dimo-eu", sample("pg-root")).unwrap();
        assert!(store.delete("dimo-eu", "pg-root").unwrap());
        assert!(!store.list("dimo-eu").unwrap().contains_key("pg-root"));
        assert!(!store.delete("dimo-eu", "pg-root").unwrap());
    }

    #[test]
    fn test_get_missing_is_config_not_found() {
        let (_, store) = memory_store();
        let err = store.get("dimo-eu", "nope").unwrap_err();
        assert!(err.is_config_not_found());
    }

    #[test]
    fn test_stacks_are_partitioned() {
        let (_, store) = memory_store();
        store.upsert("dimo-eu", sample("pg-root")).unwrap();
        assert!(store.list("dimo-us").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_collection_is_parse_error() {
        let (backend, store) = memory_store();
        backend.insert("dimo-eu", constants::PASSWORD_CONFIGS_KEY, "{not json", false);
        assert!(matches!(store.list("dimo-eu"), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_password_written_as_sensitive() {
        let (backend, store) = memory_store();
        store.set_password("dimo-eu", "pg-root", "s3cret").unwrap();
        let entry = backend.entry("dimo-eu", "passwords.pg-root").unwrap();
        assert_eq!(entry.0, "s3cret");
        assert!(entry.1, "value must be stored as sensitive");
        let read = store.get_password("dimo-eu", "pg-root").unwrap().unwrap();
        assert_eq!(read.as_str(), "s3cret");
    }

    fn pulumi(runner: Arc<ScriptedRunner>) -> PulumiBackend {
        PulumiBackend::new(
            runner,
            PathBuf::from("/infra"),
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                backoff_multiplier: 2.0,
            },
        )
    }

    #[test]
    fn test_pulumi_get_builds_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("{}\n");
        let backend = pulumi(runner.clone());
        let value = backend.get("dimo-eu", "password-configs").unwrap().unwrap();
        assert_eq!(value.as_str(), "{}");
        let calls = runner.calls();
        assert_eq!(
            calls[0].args,
            vec![
                "config",
                "get",
                "password-configs",
                "--stack",
                "dimo-eu",
                "--cwd",
                "/infra",
                "--non-interactive"
            ]
        );
    }

    #[test]
    fn test_pulumi_missing_key_is_none() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("error: configuration key 'password-configs' not found for stack 'dimo-eu'");
        let backend = pulumi(runner);
        assert!(backend.get("dimo-eu", "password-configs").unwrap().is_none());
    }

    #[test]
    fn test_pulumi_missing_stack_is_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("error: no stack named 'dimo-xx' found");
        let backend = pulumi(runner.clone());
        let err = backend.get("dimo-xx", "password-configs").unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_pulumi_secret_set_uses_stdin() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("");
        let backend = pulumi(runner.clone());
        backend
            .set("dimo-eu", "passwords.pg-root", "s3cret", true)
            .unwrap();
        let call = &runner.calls()[0];
        assert!(call.args.iter().any(|a| a == "--secret"));
        assert!(!call.args.iter().any(|a| a.contains("s3cret")));
        assert_eq!(call.stdin.as_deref().map(|v| v.as_slice()), Some(&b"s3cret"[..]));
    }

    #[test]
    fn test_pulumi_plain_set_passes_value_after_separator() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok("");
        let backend = pulumi(runner.clone());
        backend.set("dimo-eu", "password-configs", "{}", false).unwrap();
        let args = &runner.calls()[0].args;
        assert_eq!(&args[args.len() - 2..], &["--".to_string(), "{}".to_string()]);
    }

    #[test]
    fn test_pulumi_retries_transient_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("error: read tcp: connection reset by peer").ok("value");
        let backend = pulumi(runner.clone());
        let value = backend.get("dimo-eu", "gcp-project").unwrap().unwrap();
        assert_eq!(value.as_str(), "value");
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_pulumi_remove_missing_is_ok() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("error: configuration key 'passwords.x' not found for stack 'dimo-eu'");
        let backend = pulumi(runner);
        assert!(backend.remove("dimo-eu", "passwords.x").is_ok());
    }
}
