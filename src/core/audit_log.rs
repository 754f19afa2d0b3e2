//! Append-only audit trail of lifecycle operations.
//!
//! One JSON object per line, each carrying the SHA-256 of the previous entry
//! so edits and deletions are detectable. Entries hold metadata only.

use crate::constants;
use crate::core::file_lock::FileLock;
use crate::core::paths::WorkspacePaths;
use crate::util::fs as local_fs;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

const HASH_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub actor: String,
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default = "default_metadata_only")]
    pub metadata_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AuditResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<u8>,
}

fn default_metadata_only() -> bool {
    true
}

fn detect_actor() -> String {
    if let Ok(user) = std::env::var("SUDO_USER") {
        if !user.is_empty() {
            return format!("{}(sudo)", user);
        }
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// What happened, to which stack/service, and why.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub action: String,
    pub stack: String,
    pub service: Option<String>,
    pub reason: Option<String>,
}

impl AuditContext {
    pub fn new(action: &str, stack: &str, service: Option<&str>) -> Self {
        Self {
            action: action.to_string(),
            stack: stack.to_string(),
            service: service.map(String::from),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Append an entry with the detected actor.
pub fn log_with_result(
    paths: &WorkspacePaths,
    ctx: AuditContext,
    success: bool,
    error: Option<String>,
) -> Result<()> {
    append_entry(paths, ctx, &detect_actor(), success, error)
}

fn append_entry(
    paths: &WorkspacePaths,
    ctx: AuditContext,
    actor: &str,
    success: bool,
    error: Option<String>,
) -> Result<()> {
    local_fs::ensure_dir(&paths.state_dir, constants::STATE_DIR_MODE)?;
    let _lock = FileLock::exclusive(&paths.audit_lock)?;
    let prev_hash = last_entry_hash(&paths.audit_log)?;

    let mut entry = AuditEntry {
        timestamp: Utc::now(),
        action: ctx.action,
        actor: actor.to_string(),
        stack: ctx.stack,
        service: ctx.service,
        metadata_only: true,
        reason: ctx.reason,
        result: Some(AuditResult { success, error }),
        prev_hash,
        entry_hash: None,
        hash_version: Some(HASH_VERSION),
    };
    entry.entry_hash = Some(compute_entry_hash(&entry)?);

    let line = serde_json::to_string(&entry).context("serialize audit entry")?;
    append_line(&paths.audit_log, &line)
}

/// Hash of the canonical JSON form, excluding `entry_hash` itself.
fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let mut value = serde_json::to_value(entry).context("serialize for hash")?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("entry_hash");
    }
    let canonical = canonicalize_value(&value);
    let canonical_str = serde_json::to_string(&canonical).context("serialize canonical json")?;
    Ok(format!("{:064x}", Sha256::digest(canonical_str.as_bytes())))
}

/// Recursively sort object keys.
fn canonicalize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize_value(&map[k]));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(canonicalize_value).collect())
        }
        other => other.clone(),
    }
}

fn append_line(audit_path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(audit_path)
        .with_context(|| format!("open audit log {}", audit_path.display()))?;
    writeln!(file, "{}", line).context("write audit entry")?;
    local_fs::set_permissions(audit_path, constants::AUDIT_LOG_MODE)
}

/// `entry_hash` of the last line, reading backwards in chunks.
fn last_entry_hash(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();

    const CHUNK: u64 = 8192;
    let mut offset = len;
    let mut buf = Vec::new();

    while offset > 0 {
        let read_size = std::cmp::min(CHUNK, offset);
        offset -= read_size;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seek {}", path.display()))?;
        let mut tmp = vec![0u8; read_size as usize];
        file.read_exact(&mut tmp)
            .with_context(|| format!("read {}", path.display()))?;
        buf.splice(0..0, tmp);

        // need one complete non-blank line, i.e. a newline before it or BOF
        let complete = offset == 0
            || buf
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map_or(false, |last| buf[..last].contains(&b'\n'));
        if !complete {
            continue;
        }
        let line = buf
            .split(|b| *b == b'\n')
            .rev()
            .find(|line| !line.iter().all(|b| b.is_ascii_whitespace()));
        return Ok(line.map(|line| match serde_json::from_slice::<AuditEntry>(line) {
            Ok(AuditEntry {
                entry_hash: Some(hash),
                ..
            }) => hash,
            _ => format!("{:064x}", Sha256::digest(line)),
        }));
    }

    Ok(None)
}

/// Entries in file order.
pub fn read_log(paths: &WorkspacePaths) -> Result<Vec<AuditEntry>> {
    if !paths.audit_log.exists() {
        return Ok(Vec::new());
    }

    let file = fs::File::open(&paths.audit_log)
        .with_context(|| format!("open audit log {}", paths.audit_log.display()))?;
    let mut entries = Vec::new();
    let mut malformed = 0usize;

    for line in BufReader::new(file).lines() {
        let line = line.context("read audit log line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(_) => malformed += 1,
        }
    }

    if malformed > 0 {
        tracing::warn!(malformed, "malformed audit entries skipped");
    }

    Ok(entries)
}

/// Check every link of the chain. Returns (total, errors).
pub fn verify_chain(paths: &WorkspacePaths) -> Result<(usize, Vec<String>)> {
    let entries = read_log(paths)?;
    let mut errors = Vec::new();
    let mut prev_entry_hash: Option<String> = None;

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 && entry.prev_hash != prev_entry_hash {
            errors.push(format!(
                "entry {}: prev_hash mismatch (expected {:?}, got {:?})",
                i + 1,
                prev_entry_hash,
                entry.prev_hash
            ));
        }

        match &entry.entry_hash {
            Some(stored) => match compute_entry_hash(entry) {
                Ok(computed) if &computed == stored => {}
                Ok(_) => errors.push(format!("entry {}: entry_hash mismatch (tampered?)", i + 1)),
                Err(e) => errors.push(format!("entry {}: cannot compute hash: {}", i + 1, e)),
            },
            None => errors.push(format!("entry {}: missing entry_hash", i + 1)),
        }

        prev_entry_hash = entry.entry_hash.clone();
    }

    Ok((entries.len(), errors))
}
