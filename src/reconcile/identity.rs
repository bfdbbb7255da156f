use sqlx::SqliteConnection;

use crate::storage::Message;

/// How a candidate message is matched against stored ones.
///
/// The strategy is chosen by the candidate alone: a message carrying a
/// custom id is only ever looked up by that id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// `(account_id, custom_id)`
    CustomId,
    /// `(account_id, feed_id, title, url, author)` among non-purged rows
    Content,
}

impl MatchStrategy {
    pub fn for_message(message: &Message) -> Self {
        if message.source_id().is_some() {
            MatchStrategy::CustomId
        } else {
            MatchStrategy::Content
        }
    }
}

/// The parts of a stored message the merge decision needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct ExistingRecord {
    pub id: i64,
    #[sqlx(rename = "date_created")]
    pub created_at_ms: i64,
    pub is_read: bool,
    pub is_important: bool,
}

/// Outcome of an identity lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub strategy: MatchStrategy,
    /// Lowest-id matching row, if any
    pub existing: Option<ExistingRecord>,
    /// Number of matching rows seen, capped at 2
    pub matches: usize,
}

impl Resolution {
    /// More than one stored row satisfied the lookup.
    pub fn is_ambiguous(&self) -> bool {
        self.matches > 1
    }
}

/// Look up the stored counterpart of `candidate` within the given scope.
///
/// Read-only. Fetches at most two rows so that ambiguity can be reported
/// without scanning every duplicate.
pub(crate) async fn resolve(
    conn: &mut SqliteConnection,
    candidate: &Message,
    feed_id: i64,
    account_id: i64,
) -> Result<Resolution, sqlx::Error> {
    let strategy = MatchStrategy::for_message(candidate);

    let rows: Vec<ExistingRecord> = match (strategy, candidate.source_id()) {
        (MatchStrategy::CustomId, Some(custom_id)) => {
            sqlx::query_as(
                r#"
                SELECT id, date_created, is_read, is_important
                FROM messages
                WHERE account_id = ? AND custom_id = ?
                ORDER BY id
                LIMIT 2
            "#,
            )
            .bind(account_id)
            .bind(custom_id)
            .fetch_all(&mut *conn)
            .await?
        }
        _ => {
            sqlx::query_as(
                r#"
                SELECT id, date_created, is_read, is_important
                FROM messages
                WHERE account_id = ? AND feed_id = ? AND title = ? AND url = ? AND author = ?
                  AND is_pdeleted = 0
                ORDER BY id
                LIMIT 2
            "#,
            )
            .bind(account_id)
            .bind(feed_id)
            .bind(&candidate.title)
            .bind(&candidate.url)
            .bind(&candidate.author)
            .fetch_all(&mut *conn)
            .await?
        }
    };

    Ok(Resolution {
        strategy,
        matches: rows.len(),
        existing: rows.into_iter().next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::{TimeZone, Utc};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn seed(db: &Database, feed_id: i64, title: &str, custom_id: Option<&str>, pdeleted: bool) -> i64 {
        let row: (i64,) = sqlx::query_as(
            r#"INSERT INTO messages (feed_id, account_id, title, url, author, date_created, custom_id, is_pdeleted)
               VALUES (?, 1, ?, 'https://s/x', 'Ann', 100, ?, ?) RETURNING id"#,
        )
        .bind(feed_id)
        .bind(title)
        .bind(custom_id)
        .bind(pdeleted)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        row.0
    }

    fn candidate(title: &str, custom_id: Option<&str>) -> Message {
        Message {
            title: title.to_string(),
            url: "https://s/x".to_string(),
            author: "Ann".to_string(),
            created_at: Utc.timestamp_millis_opt(100).unwrap(),
            custom_id: custom_id.map(str::to_string),
            ..Message::default()
        }
    }

    #[tokio::test]
    async fn test_content_match_found() {
        let db = test_db().await;
        let id = seed(&db, 5, "A", Some("5"), false).await;

        let resolution = db.resolve_identity(&candidate("A", None), 5, 1).await.unwrap();
        assert_eq!(resolution.strategy, MatchStrategy::Content);
        assert_eq!(resolution.existing.map(|e| e.id), Some(id));
        assert_eq!(resolution.existing.map(|e| e.created_at_ms), Some(100));
    }

    #[tokio::test]
    async fn test_content_match_is_feed_scoped() {
        let db = test_db().await;
        seed(&db, 5, "A", None, false).await;

        let resolution = db.resolve_identity(&candidate("A", None), 6, 1).await.unwrap();
        assert!(resolution.existing.is_none());
        let other_account = db.resolve_identity(&candidate("A", None), 5, 2).await.unwrap();
        assert!(other_account.existing.is_none());
    }

    #[tokio::test]
    async fn test_content_match_ignores_purged_rows() {
        let db = test_db().await;
        seed(&db, 5, "A", None, true).await;

        let resolution = db.resolve_identity(&candidate("A", None), 5, 1).await.unwrap();
        assert!(resolution.existing.is_none());
    }

    #[tokio::test]
    async fn test_content_match_includes_bin() {
        let db = test_db().await;
        let id = seed(&db, 5, "A", None, false).await;
        db.move_messages_to_bin(&[id]).await.unwrap();

        let resolution = db.resolve_identity(&candidate("A", None), 5, 1).await.unwrap();
        assert_eq!(resolution.existing.map(|e| e.id), Some(id));
    }

    #[tokio::test]
    async fn test_custom_id_match_ignores_feed_and_title() {
        let db = test_db().await;
        let id = seed(&db, 5, "Old title", Some("42"), false).await;

        let resolution = db
            .resolve_identity(&candidate("New title", Some("42")), 99, 1)
            .await
            .unwrap();
        assert_eq!(resolution.strategy, MatchStrategy::CustomId);
        assert_eq!(resolution.existing.map(|e| e.id), Some(id));
    }

    #[tokio::test]
    async fn test_custom_id_candidate_never_matches_by_content() {
        let db = test_db().await;
        // Same feed/title/url/author but a different custom id
        seed(&db, 5, "A", Some("1"), false).await;

        let resolution = db.resolve_identity(&candidate("A", Some("2")), 5, 1).await.unwrap();
        assert!(resolution.existing.is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_match_uses_lowest_id() {
        let db = test_db().await;
        let first = seed(&db, 5, "A", None, false).await;
        seed(&db, 5, "A", None, false).await;
        seed(&db, 5, "A", None, false).await;

        let resolution = db.resolve_identity(&candidate("A", None), 5, 1).await.unwrap();
        assert!(resolution.is_ambiguous());
        assert_eq!(resolution.matches, 2);
        assert_eq!(resolution.existing.map(|e| e.id), Some(first));
    }
}
