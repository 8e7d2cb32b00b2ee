//! Wake dedupe ledger.
//!
//! The host's wake timer may deliver the same fire more than once (retries,
//! re-registration after reboot). Each delivered fire is keyed by
//! `"<identity>:<planned_epoch_millis>"` and appended to a JSONL file; a key
//! already present is a duplicate and must not produce a second prompt.
//!
//! Check-and-append runs under a `create_new` lock file next to the ledger,
//! so separate processes sharing the file cannot both record one key.
//! Records older than the retention window are dropped on reload.

use crate::error::{Result, WakeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Default retention for delivered fire keys.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(8 * 24 * 60 * 60);

/// How long `record_once` waits for another writer's lock.
const LOCK_TIMEOUT: Duration = Duration::from_millis(1500);

/// Lock files older than this are assumed abandoned by a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FireRecord {
    key: String,
    recorded_at_ms: u64,
}

/// Build the ledger key for one planned fire.
pub fn fire_key(identity: &str, planned_epoch_millis: i64) -> String {
    format!("{identity}:{planned_epoch_millis}")
}

/// File-backed set of already-delivered fire keys.
#[derive(Debug)]
pub struct FireLedger {
    path: PathBuf,
    retention: Duration,
    seen: HashSet<String>,
}

impl FireLedger {
    /// Create a ledger bound to a JSONL file. The file is created lazily.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            retention: DEFAULT_RETENTION,
            seen: HashSet::new(),
        }
    }

    /// Keep delivered keys for `retention` instead of [`DEFAULT_RETENTION`].
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `key` once. Returns `true` when the key was new.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] for a blank key, when the lock cannot
    /// be taken in time, or when the file cannot be read or appended.
    pub fn record_once(&mut self, key: &str) -> Result<bool> {
        self.record_once_at(key, crate::now_epoch_millis())
    }

    /// [`record_once`](Self::record_once) with `now_ms` as the current time.
    ///
    /// # Errors
    ///
    /// See [`record_once`](Self::record_once).
    pub fn record_once_at(&mut self, key: &str, now_ms: u64) -> Result<bool> {
        let key = key.trim();
        if key.is_empty() {
            return Err(WakeError::Schedule("fire key must not be empty".to_owned()));
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WakeError::Schedule(format!("failed to create fire ledger directory: {e}"))
            })?;
        }

        let _guard = self.acquire_write_guard(LOCK_TIMEOUT)?;
        self.reload(now_ms)?;
        if self.seen.contains(key) {
            debug!(key, "fire already recorded");
            return Ok(false);
        }

        let record = FireRecord {
            key: key.to_owned(),
            recorded_at_ms: now_ms,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| WakeError::Schedule(format!("failed to encode fire record: {e}")))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WakeError::Schedule(format!("failed to open fire ledger: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| WakeError::Schedule(format!("failed to append fire record: {e}")))?;

        self.seen.insert(record.key);
        Ok(true)
    }

    /// Re-read the file, dropping expired and malformed records.
    ///
    /// Must be called with the write guard held: a pruned file is rewritten.
    fn reload(&mut self, now_ms: u64) -> Result<()> {
        self.seen.clear();
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(WakeError::Schedule(format!(
                    "failed to read fire ledger: {e}"
                )));
            }
        };

        let horizon_ms = now_ms.saturating_sub(u64::try_from(self.retention.as_millis()).unwrap_or(u64::MAX));
        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<FireRecord>(line) {
                Ok(record) if record.recorded_at_ms < horizon_ms => dropped += 1,
                Ok(record) => {
                    self.seen.insert(record.key);
                    kept.push(line);
                }
                Err(e) => {
                    warn!(
                        "skipping malformed fire ledger line in {}: {e}",
                        self.path.display()
                    );
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            let mut compacted = kept.join("\n");
            if !compacted.is_empty() {
                compacted.push('\n');
            }
            std::fs::write(&self.path, compacted)
                .map_err(|e| WakeError::Schedule(format!("failed to compact fire ledger: {e}")))?;
            debug!(dropped, kept = kept.len(), "fire ledger compacted");
        }
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn acquire_write_guard(&self, timeout: Duration) -> Result<LedgerLockGuard> {
        let lock_path = self.lock_path();
        let started = std::time::Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = file.write_all(crate::now_epoch_millis().to_string().as_bytes());
                    return Ok(LedgerLockGuard { path: lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    evict_stale_lock(&lock_path);
                    if started.elapsed() > timeout {
                        return Err(WakeError::Schedule(format!(
                            "timed out waiting for fire ledger lock {}",
                            lock_path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => {
                    return Err(WakeError::Schedule(format!(
                        "failed to create fire ledger lock {}: {e}",
                        lock_path.display()
                    )));
                }
            }
        }
    }
}

fn evict_stale_lock(lock_path: &Path) {
    let age = std::fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok());
    if age.is_some_and(|age| age > STALE_LOCK_AGE) {
        warn!(path = %lock_path.display(), "removing stale fire ledger lock");
        let _ = std::fs::remove_file(lock_path);
    }
}

struct LedgerLockGuard {
    path: PathBuf,
}

impl Drop for LedgerLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
