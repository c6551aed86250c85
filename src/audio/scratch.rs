//! # Scratch Storage
//!
//! Per-request registry of temporary audio files (the materialized source plus
//! any chunk segments). Every file registered here is deleted when the request
//! finishes, whether it succeeded or failed.
//!
//! ## Cleanup Policy:
//! Deletion failures are retried a bounded number of times with a short backoff
//! and then abandoned with a warning. A cleanup failure never escalates to the
//! caller; the response computed before cleanup is what the client receives.

use crate::config::CleanupConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded-retry policy owned by the release routine.
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl From<&CleanupConfig> for CleanupPolicy {
    fn from(config: &CleanupConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Scoped store of temporary files for one transcription request.
///
/// Files are tracked in creation order and released together. Dropping the
/// store without calling [`ScratchStore::release_all`] still removes whatever
/// is left, best effort, so cancellation cannot leak files.
pub struct ScratchStore {
    root: PathBuf,
    tag: String,
    files: Vec<PathBuf>,
    policy: CleanupPolicy,
}

impl ScratchStore {
    pub fn new(root: PathBuf, policy: CleanupPolicy) -> Self {
        Self {
            root,
            tag: Uuid::new_v4().to_string(),
            files: Vec::new(),
            policy,
        }
    }

    /// Path this store would use for a new file with the given stem/extension.
    /// The request tag keeps concurrent requests from colliding.
    pub fn path_for(&self, stem: &str, extension: &str) -> PathBuf {
        self.root
            .join(format!("stt-{}-{}.{}", self.tag, stem, extension))
    }

    /// Write `bytes` to a fresh tracked file and return its path.
    pub fn materialize(
        &mut self,
        stem: &str,
        extension: &str,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        let path = self.path_for(stem, extension);
        fs::write(&path, bytes)?;
        debug!("Materialized {} ({} bytes)", path.display(), bytes.len());
        self.files.push(path.clone());
        Ok(path)
    }

    /// Track a file created elsewhere (e.g. a chunk written by the encoder) so
    /// it is released with the rest of the request's files.
    pub fn adopt(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    /// Number of files currently tracked.
    pub fn tracked(&self) -> usize {
        self.files.len()
    }

    /// Delete every tracked file, retrying per the cleanup policy.
    ///
    /// Runs on every exit path of the batch pipeline, including failures.
    pub async fn release_all(&mut self) {
        let files = std::mem::take(&mut self.files);
        if files.is_empty() {
            return;
        }

        debug!("Cleaning up {} temporary files", files.len());
        for path in files {
            release_with_retry(&path, &self.policy).await;
        }
    }
}

impl Drop for ScratchStore {
    fn drop(&mut self) {
        // Backstop for cancelled or panicking requests; release_all() drains
        // the list on the normal path so this is usually a no-op.
        for path in self.files.drain(..) {
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Leaked temp file {}: {}", path.display(), err);
                }
            }
        }
    }
}

async fn release_with_retry(path: &Path, policy: &CleanupPolicy) {
    for attempt in 1..=policy.max_attempts {
        match fs::remove_file(path) {
            Ok(()) => return,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) if attempt == policy.max_attempts => {
                warn!(
                    "Abandoning temp file {} after {} attempts: {}",
                    path.display(),
                    attempt,
                    err
                );
            }
            Err(err) => {
                debug!(
                    "Retrying deletion of {} (attempt {}): {}",
                    path.display(),
                    attempt,
                    err
                );
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}
