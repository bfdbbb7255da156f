use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The feed database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface
/// through these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("sqlite_busy")
        || lower.contains("sqlite_locked")
        || lower.contains("unable to open database file")
}

/// A stored message row that could not be turned into a [`StoredMessage`].
///
/// Listing queries collect these next to the rows that did decode instead of
/// dropping the broken row silently.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message {id}: timestamp {value} is out of range")]
    Timestamp { id: i64, value: i64 },

    #[error("message {id}: malformed enclosures: {source}")]
    Enclosures {
        id: i64,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Primary key of the row that failed to decode.
    pub fn message_id(&self) -> i64 {
        match self {
            DecodeError::Timestamp { id, .. } | DecodeError::Enclosures { id, .. } => *id,
        }
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Attachment descriptor of a message (podcast audio, images, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
}

/// Serialize enclosures into the single text column they are stored in.
///
/// An empty list is stored as an empty string.
pub fn encode_enclosures(enclosures: &[Enclosure]) -> Result<String, serde_json::Error> {
    if enclosures.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(enclosures)
}

/// Inverse of [`encode_enclosures`]; NULL and empty columns decode to no enclosures.
pub fn decode_enclosures(raw: Option<&str>) -> Result<Vec<Enclosure>, serde_json::Error> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(text) => serde_json::from_str(text),
    }
}

/// A candidate message handed over by the fetch layer.
///
/// Scope (feed and account) travels with the batch, not with each message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub title: String,
    pub url: String,
    pub author: String,
    pub contents: String,
    pub enclosures: Vec<Enclosure>,
    pub created_at: DateTime<Utc>,
    /// True when `created_at` comes from the source rather than ingestion time
    pub created_from_feed: bool,
    pub is_read: bool,
    pub is_important: bool,
    /// Stable identifier assigned by a sync service
    pub custom_id: Option<String>,
    pub custom_hash: Option<String>,
}

impl Message {
    /// The source-assigned identifier, if present and non-empty.
    pub fn source_id(&self) -> Option<&str> {
        self.custom_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Creation time in the stored representation (milliseconds since epoch).
    pub fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// A message as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub feed_id: i64,
    pub account_id: i64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub contents: String,
    pub enclosures: Vec<Enclosure>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_important: bool,
    pub is_deleted: bool,
    pub is_pdeleted: bool,
    pub custom_id: Option<String>,
    pub custom_hash: Option<String>,
}

/// Internal row type for message queries (used by sqlx FromRow)
/// Converts to StoredMessage via TryFrom, which validates the timestamp and
/// the enclosure blob.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub account_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub contents: Option<String>,
    pub enclosures: Option<String>,
    pub date_created: i64,
    pub is_read: bool,
    pub is_important: bool,
    pub is_deleted: bool,
    pub is_pdeleted: bool,
    pub custom_id: Option<String>,
    pub custom_hash: Option<String>,
}

/// Column list matching [`MessageDbRow`]
pub(crate) const MESSAGE_COLUMNS: &str = "id, feed_id, account_id, title, url, author, contents, \
     enclosures, date_created, is_read, is_important, is_deleted, is_pdeleted, custom_id, custom_hash";

impl TryFrom<MessageDbRow> for StoredMessage {
    type Error = DecodeError;

    fn try_from(row: MessageDbRow) -> Result<Self, Self::Error> {
        let created_at =
            DateTime::from_timestamp_millis(row.date_created).ok_or(DecodeError::Timestamp {
                id: row.id,
                value: row.date_created,
            })?;
        let enclosures = decode_enclosures(row.enclosures.as_deref())
            .map_err(|source| DecodeError::Enclosures { id: row.id, source })?;

        Ok(StoredMessage {
            id: row.id,
            feed_id: row.feed_id,
            account_id: row.account_id,
            title: row.title,
            url: row.url.unwrap_or_default(),
            author: row.author.unwrap_or_default(),
            contents: row.contents.unwrap_or_default(),
            enclosures,
            created_at,
            is_read: row.is_read,
            is_important: row.is_important,
            is_deleted: row.is_deleted,
            is_pdeleted: row.is_pdeleted,
            custom_id: row.custom_id,
            custom_hash: row.custom_hash,
        })
    }
}

/// Result of a message listing: decoded rows plus the rows that failed to decode.
#[derive(Debug, Default)]
pub struct MessageList {
    pub messages: Vec<StoredMessage>,
    pub decode_errors: Vec<DecodeError>,
}

impl MessageList {
    pub(crate) fn from_rows(rows: Vec<MessageDbRow>) -> Self {
        let mut list = MessageList::default();
        for row in rows {
            match StoredMessage::try_from(row) {
                Ok(message) => list.messages.push(message),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable message row");
                    list.decode_errors.push(e);
                }
            }
        }
        list
    }
}

/// Unread and total message counts for one feed (or one aggregate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub unread: i64,
    pub total: i64,
}

// ============================================================================
// Account Tree Types
// ============================================================================

/// How a feed is scheduled for automatic updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUpdate {
    Disabled,
    #[default]
    Default,
    /// Uses the feed's own `update_interval`
    Specific,
}

impl AutoUpdate {
    pub(crate) fn as_db(self) -> i64 {
        match self {
            AutoUpdate::Disabled => 0,
            AutoUpdate::Default => 1,
            AutoUpdate::Specific => 2,
        }
    }

    pub(crate) fn from_db(value: i64) -> Self {
        match value {
            0 => AutoUpdate::Disabled,
            2 => AutoUpdate::Specific,
            _ => AutoUpdate::Default,
        }
    }
}

/// Syndication format of a standard feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    Atom10,
    Rdf,
    Rss0X,
    #[default]
    Rss2X,
}

impl FeedFormat {
    pub(crate) fn as_db(self) -> i64 {
        match self {
            FeedFormat::Atom10 => 0,
            FeedFormat::Rdf => 1,
            FeedFormat::Rss0X => 2,
            FeedFormat::Rss2X => 3,
        }
    }

    pub(crate) fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(FeedFormat::Atom10),
            1 => Some(FeedFormat::Rdf),
            2 => Some(FeedFormat::Rss0X),
            3 => Some(FeedFormat::Rss2X),
            _ => None,
        }
    }
}

/// Account registered in the store; `kind` is the service code (e.g. "std-rss").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub kind: String,
}

/// Category data from database
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    /// Custom id of the parent category, `None` at the account root
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub account_id: i64,
    pub custom_id: i64,
}

/// Feed data from database
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    /// Custom id of the owning category, `None` at the account root
    pub category: Option<i64>,
    pub encoding: Option<String>,
    pub auto_update: AutoUpdate,
    /// Minutes between updates when `auto_update` is `Specific`
    pub update_interval: i64,
    pub format: FeedFormat,
    pub account_id: i64,
    pub custom_id: i64,
}

/// Input for [`Database::add_feed`](super::Database::add_feed) and
/// [`Database::edit_feed`](super::Database::edit_feed).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewFeed {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub category: Option<i64>,
    pub encoding: Option<String>,
    pub auto_update: AutoUpdate,
    pub update_interval: i64,
    pub format: FeedFormat,
    pub icon: Option<super::Icon>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date_created: i64, enclosures: Option<&str>) -> MessageDbRow {
        MessageDbRow {
            id: 7,
            feed_id: 1,
            account_id: 1,
            title: "Title".to_string(),
            url: None,
            author: Some("Ann".to_string()),
            contents: None,
            enclosures: enclosures.map(str::to_string),
            date_created,
            is_read: true,
            is_important: false,
            is_deleted: false,
            is_pdeleted: false,
            custom_id: Some("7".to_string()),
            custom_hash: None,
        }
    }

    #[test]
    fn test_enclosures_empty_list_is_empty_string() {
        assert_eq!(encode_enclosures(&[]).unwrap(), "");
        assert!(decode_enclosures(Some("")).unwrap().is_empty());
        assert!(decode_enclosures(None).unwrap().is_empty());
    }

    #[test]
    fn test_enclosures_keep_order() {
        let list = vec![
            Enclosure {
                url: "https://cdn.test/a.mp3".to_string(),
                mime_type: "audio/mpeg".to_string(),
            },
            Enclosure {
                url: "https://cdn.test/b.png".to_string(),
                mime_type: "image/png".to_string(),
            },
        ];
        let encoded = encode_enclosures(&list).unwrap();
        assert_eq!(decode_enclosures(Some(&encoded)).unwrap(), list);
    }

    #[test]
    fn test_row_decodes_nullable_text_as_empty() {
        let message = StoredMessage::try_from(row(1_700_000_000_000, None)).unwrap();
        assert_eq!(message.url, "");
        assert_eq!(message.contents, "");
        assert_eq!(message.author, "Ann");
        assert_eq!(message.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_row_with_bad_enclosures_is_decode_error() {
        let err = StoredMessage::try_from(row(0, Some("{not json"))).unwrap_err();
        assert!(matches!(err, DecodeError::Enclosures { id: 7, .. }));
        assert_eq!(err.message_id(), 7);
    }

    #[test]
    fn test_row_with_out_of_range_timestamp_is_decode_error() {
        let err = StoredMessage::try_from(row(i64::MAX, None)).unwrap_err();
        assert!(matches!(err, DecodeError::Timestamp { id: 7, .. }));
    }

    #[test]
    fn test_message_list_collects_failures() {
        let list = MessageList::from_rows(vec![row(0, None), row(0, Some("[oops"))]);
        assert_eq!(list.messages.len(), 1);
        assert_eq!(list.decode_errors.len(), 1);
    }

    #[test]
    fn test_source_id_treats_empty_as_absent() {
        let mut message = Message::default();
        assert_eq!(message.source_id(), None);
        message.custom_id = Some(String::new());
        assert_eq!(message.source_id(), None);
        message.custom_id = Some("abc".to_string());
        assert_eq!(message.source_id(), Some("abc"));
    }

    #[test]
    fn test_lock_messages_detected() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(!is_lock_message("no such table: messages"));
    }
}
