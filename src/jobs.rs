//! Batch files and their scheduling for `feedstore apply`.
//!
//! Files for distinct `(feed_id, account_id)` scopes are applied concurrently;
//! files sharing a scope run one after another, in the order given.
use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::reconcile::BatchOutcome;
use crate::storage::{Database, Message};

/// Upper bound for a batch file read into memory (64 MiB).
const MAX_BATCH_FILE_SIZE: u64 = 64 * 1_048_576;

/// One fetched batch as written by a fetcher: scope, feed URL and messages.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    pub feed_id: i64,
    pub account_id: i64,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl BatchFile {
    pub fn load(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Failed to read batch file '{}'", path.display()))?;
        if meta.len() > MAX_BATCH_FILE_SIZE {
            anyhow::bail!(
                "Batch file '{}' is {} bytes (max {} bytes)",
                path.display(),
                meta.len(),
                MAX_BATCH_FILE_SIZE
            );
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid batch file '{}'", path.display()))
    }

    pub fn scope(&self) -> (i64, i64) {
        (self.feed_id, self.account_id)
    }
}

/// Result of applying every chunk of one batch file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub feed_id: i64,
    pub account_id: i64,
    pub outcomes: Vec<BatchOutcome>,
}

impl FileReport {
    /// Every chunk committed.
    pub fn ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.ok)
    }

    pub fn updated_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.updated_count).sum()
    }

    pub fn failed_rows(&self) -> usize {
        self.outcomes.iter().map(|o| o.failures().count()).sum()
    }
}

/// Group loaded files by scope, keeping the given order inside each scope.
pub fn group_by_scope(files: Vec<(PathBuf, BatchFile)>) -> BTreeMap<(i64, i64), Vec<(PathBuf, BatchFile)>> {
    let mut groups: BTreeMap<(i64, i64), Vec<(PathBuf, BatchFile)>> = BTreeMap::new();
    for (path, file) in files {
        groups.entry(file.scope()).or_default().push((path, file));
    }
    groups
}

async fn apply_scope(db: Database, files: Vec<(PathBuf, BatchFile)>, chunk_size: usize) -> Vec<FileReport> {
    let mut reports = Vec::with_capacity(files.len());
    for (path, file) in files {
        let mut outcomes = Vec::new();
        let mut messages = file.messages.into_iter().peekable();
        while messages.peek().is_some() {
            let chunk: Vec<Message> = messages.by_ref().take(chunk_size).collect();
            outcomes.push(
                db.apply_batch(chunk, file.feed_id, file.account_id, &file.base_url)
                    .await,
            );
        }
        reports.push(FileReport {
            path,
            feed_id: file.feed_id,
            account_id: file.account_id,
            outcomes,
        });
    }
    reports
}

/// Apply loaded batch files, splitting each into transactions of at most `chunk_size` messages.
pub async fn apply_files(
    db: &Database,
    files: Vec<(PathBuf, BatchFile)>,
    chunk_size: usize,
) -> Vec<FileReport> {
    let chunk_size = chunk_size.max(1);
    let scopes = group_by_scope(files);
    tracing::debug!(scopes = scopes.len(), chunk_size, "Applying batch files");

    let tasks = scopes
        .into_values()
        .map(|files| apply_scope(db.clone(), files, chunk_size));

    join_all(tasks).await.into_iter().flatten().collect()
}
