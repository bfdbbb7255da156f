use std::collections::HashMap;

use super::schema::Database;
use super::types::{DatabaseError, MessageCounts};

/// `(feed_id, unread, total)` as returned by the grouped counters.
type CountRow = (i64, i64, i64);

fn into_map(rows: Vec<CountRow>) -> HashMap<i64, MessageCounts> {
    rows.into_iter()
        .map(|(feed_id, unread, total)| (feed_id, MessageCounts { unread, total }))
        .collect()
}

impl Database {
    // ========================================================================
    // Aggregate Counters
    // ========================================================================
    //
    // Purged rows never count. Binned rows only count in the bin counters.

    /// Unread and total counts of one feed's active messages
    pub async fn message_counts_for_feed(
        &self,
        feed_id: i64,
        account_id: i64,
    ) -> Result<MessageCounts, DatabaseError> {
        let (unread, total): (i64, i64) = sqlx::query_as(
            r#"
                SELECT COALESCE(SUM((is_read + 1) % 2), 0), COUNT(*)
                FROM messages
                WHERE feed_id = ? AND account_id = ? AND is_deleted = 0 AND is_pdeleted = 0
            "#,
        )
        .bind(feed_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageCounts { unread, total })
    }

    /// Counts for every feed directly inside the category with the given custom id
    pub async fn message_counts_for_category(
        &self,
        category_custom_id: i64,
        account_id: i64,
    ) -> Result<HashMap<i64, MessageCounts>, DatabaseError> {
        let rows: Vec<CountRow> = sqlx::query_as(
            r#"
                SELECT feed_id, SUM((is_read + 1) % 2), COUNT(*)
                FROM messages
                WHERE feed_id IN (SELECT custom_id FROM feeds WHERE category = ? AND account_id = ?)
                  AND is_deleted = 0 AND is_pdeleted = 0 AND account_id = ?
                GROUP BY feed_id
            "#,
        )
        .bind(category_custom_id)
        .bind(account_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(into_map(rows))
    }

    /// Active-message counts of the account, grouped by feed
    pub async fn message_counts_for_account(
        &self,
        account_id: i64,
    ) -> Result<HashMap<i64, MessageCounts>, DatabaseError> {
        let rows: Vec<CountRow> = sqlx::query_as(
            r#"
                SELECT feed_id, SUM((is_read + 1) % 2), COUNT(*)
                FROM messages
                WHERE is_deleted = 0 AND is_pdeleted = 0 AND account_id = ?
                GROUP BY feed_id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(into_map(rows))
    }

    /// Counts of the account's bin
    pub async fn message_counts_for_bin(&self, account_id: i64) -> Result<MessageCounts, DatabaseError> {
        let (unread, total): (i64, i64) = sqlx::query_as(
            r#"
                SELECT COALESCE(SUM((is_read + 1) % 2), 0), COUNT(*)
                FROM messages
                WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ?
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageCounts { unread, total })
    }

    /// Counts of the account's bin, grouped by the feed the messages came from
    pub async fn bin_counts_by_feed(
        &self,
        account_id: i64,
    ) -> Result<HashMap<i64, MessageCounts>, DatabaseError> {
        let rows: Vec<CountRow> = sqlx::query_as(
            r#"
                SELECT feed_id, SUM((is_read + 1) % 2), COUNT(*)
                FROM messages
                WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ?
                GROUP BY feed_id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(into_map(rows))
    }
}
