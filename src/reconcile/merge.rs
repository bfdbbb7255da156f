use super::identity::{ExistingRecord, MatchStrategy};
use crate::storage::Message;

/// What to do with one candidate message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No stored counterpart; insert the candidate as a new row
    Insert,
    /// Rewrite the stored row with the candidate's content
    Update(UpdatePlan),
    /// Stored row is current; leave it alone
    Skip,
}

/// Target row and the user-state flags an update will persist.
///
/// Content fields (title, url, author, timestamp, contents, enclosures) always
/// come from the candidate; the flags depend on the match strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePlan {
    pub id: i64,
    pub is_read: bool,
    pub is_important: bool,
}

/// Decide how `candidate` is merged into the store.
///
/// - custom-id match: update when the timestamp, read flag or important flag
///   differs, taking the flags from the candidate (the sync service is
///   authoritative about them)
/// - content match: update only when the timestamp comes from the feed and
///   differs; the stored flags are kept since local user state wins
pub fn decide(candidate: &Message, existing: Option<&ExistingRecord>) -> Decision {
    let Some(existing) = existing else {
        return Decision::Insert;
    };

    let timestamp_changed = candidate.created_at_ms() != existing.created_at_ms;

    match MatchStrategy::for_message(candidate) {
        MatchStrategy::CustomId => {
            if timestamp_changed
                || candidate.is_read != existing.is_read
                || candidate.is_important != existing.is_important
            {
                Decision::Update(UpdatePlan {
                    id: existing.id,
                    is_read: candidate.is_read,
                    is_important: candidate.is_important,
                })
            } else {
                Decision::Skip
            }
        }
        MatchStrategy::Content => {
            if candidate.created_from_feed && timestamp_changed {
                Decision::Update(UpdatePlan {
                    id: existing.id,
                    is_read: existing.is_read,
                    is_important: existing.is_important,
                })
            } else {
                Decision::Skip
            }
        }
    }
}
