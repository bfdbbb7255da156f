//! Message reconciliation: merging fetched batches into the store.
//!
//! For every candidate of a batch, in order:
//!
//! 1. **Links**: relative message URLs are resolved against the feed's origin
//! 2. **Identity**: the stored counterpart is looked up by custom id or by
//!    feed/title/url/author
//! 3. **Merge**: insert, update or skip is decided without regressing local
//!    read/important state
//!
//! The whole batch runs in one transaction that ends with a custom-id
//! backfill, see [`Database::apply_batch`](crate::storage::Database::apply_batch).

mod batch;
mod identity;
mod links;
mod merge;

pub(crate) use identity::resolve;
pub use identity::{ExistingRecord, MatchStrategy, Resolution};
pub use links::{feed_origin, normalize_url, resolve_relative_url};
pub use merge::{decide, Decision, UpdatePlan};

/// Why a single message of a batch was skipped or flagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIssueKind {
    /// Identity lookup failed; the message was not applied
    LookupFailed(String),
    /// Insert statement failed; the message was not applied
    InsertFailed(String),
    /// Update statement failed; the stored row is unchanged
    UpdateFailed(String),
    /// Several stored rows matched; the lowest id was used and the message applied
    AmbiguousMatch { matches: usize, used_id: i64 },
}

/// Per-message report entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    /// Position of the message in the submitted batch
    pub index: usize,
    pub title: String,
    pub custom_id: Option<String>,
    pub kind: RowIssueKind,
}

impl RowIssue {
    /// True when the message was not applied at all.
    pub fn is_failure(&self) -> bool {
        !matches!(self.kind, RowIssueKind::AmbiguousMatch { .. })
    }
}

/// Result of [`Database::apply_batch`](crate::storage::Database::apply_batch).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Successful inserts plus successful updates that left the message unread.
    /// Zero when the batch was rolled back.
    pub updated_count: usize,
    /// At least one update was decided
    pub any_changed: bool,
    /// The transaction committed
    pub ok: bool,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Rows whose custom id was backfilled by the post-batch fixup
    pub custom_ids_backfilled: u64,
    pub row_issues: Vec<RowIssue>,
}

impl BatchOutcome {
    pub(crate) fn empty() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// Outcome of a rolled-back batch: nothing persisted, issues kept for diagnosis.
    pub(crate) fn rolled_back(row_issues: Vec<RowIssue>) -> Self {
        Self {
            ok: false,
            row_issues,
            ..Self::default()
        }
    }

    /// Messages that were not applied because of a per-row failure.
    pub fn failures(&self) -> impl Iterator<Item = &RowIssue> {
        self.row_issues.iter().filter(|issue| issue.is_failure())
    }
}
