use chrono::{TimeDelta, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Message, MessageDbRow, MessageList, MESSAGE_COLUMNS};
use crate::reconcile::{resolve, Resolution};

impl Database {
    // ========================================================================
    // Message Queries
    // ========================================================================

    /// Active (not binned, not purged) messages of one feed.
    pub async fn undeleted_messages_for_feed(
        &self,
        feed_id: i64,
        account_id: i64,
    ) -> Result<MessageList, DatabaseError> {
        let rows = sqlx::query_as::<_, MessageDbRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE is_deleted = 0 AND is_pdeleted = 0 AND feed_id = ? AND account_id = ? \
             ORDER BY id"
        ))
        .bind(feed_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(MessageList::from_rows(rows))
    }

    /// Messages sitting in the account's bin.
    pub async fn undeleted_messages_for_bin(&self, account_id: i64) -> Result<MessageList, DatabaseError> {
        let rows = sqlx::query_as::<_, MessageDbRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ? \
             ORDER BY id"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(MessageList::from_rows(rows))
    }

    /// Active messages of every feed of the account.
    pub async fn undeleted_messages_for_account(
        &self,
        account_id: i64,
    ) -> Result<MessageList, DatabaseError> {
        let rows = sqlx::query_as::<_, MessageDbRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE is_deleted = 0 AND is_pdeleted = 0 AND account_id = ? \
             ORDER BY id"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(MessageList::from_rows(rows))
    }

    /// Custom ids of the active messages of one feed (used by sync services to diff state).
    pub async fn custom_ids_for_feed(
        &self,
        feed_id: i64,
        account_id: i64,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            "SELECT custom_id FROM messages \
             WHERE is_deleted = 0 AND is_pdeleted = 0 AND feed_id = ? AND account_id = ? ORDER BY id",
        )
        .bind(feed_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(|(id,)| id).collect())
    }

    /// Custom ids of the messages in the account's bin.
    pub async fn custom_ids_for_bin(&self, account_id: i64) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            "SELECT custom_id FROM messages \
             WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(|(id,)| id).collect())
    }

    /// Custom ids of all active messages of the account.
    pub async fn custom_ids_for_account(&self, account_id: i64) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            "SELECT custom_id FROM messages \
             WHERE is_deleted = 0 AND is_pdeleted = 0 AND account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(|(id,)| id).collect())
    }

    /// Identity lookup outside a batch, for callers that want to preview a merge.
    ///
    /// The candidate's URL is used as given; relative links are not resolved here.
    pub async fn resolve_identity(
        &self,
        candidate: &Message,
        feed_id: i64,
        account_id: i64,
    ) -> Result<Resolution, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let resolution = resolve(&mut *conn, candidate, feed_id, account_id).await?;
        Ok(resolution)
    }

    // ========================================================================
    // Read / Importance Mutations
    // ========================================================================

    /// Set the read flag of the given messages, returns the number of rows changed
    pub async fn mark_messages_read(&self, ids: &[i64], read: bool) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE messages SET is_read = ");
        builder.push_bind(read);
        push_id_filter(&mut builder, " WHERE id IN (", ids);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Set the important flag of one message
    pub async fn mark_message_important(&self, id: i64, important: bool) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE messages SET is_important = ? WHERE id = ?")
            .bind(important)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Flip the important flag of every given message
    pub async fn switch_messages_importance(&self, ids: &[i64]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE messages SET is_important = NOT is_important");
        push_id_filter(&mut builder, " WHERE id IN (", ids);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Mark the active messages of the given feeds as read or unread
    pub async fn mark_feeds_read(
        &self,
        feed_ids: &[i64],
        account_id: i64,
        read: bool,
    ) -> Result<u64, DatabaseError> {
        if feed_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE messages SET is_read = ");
        builder.push_bind(read);
        builder.push(" WHERE is_deleted = 0 AND is_pdeleted = 0 AND account_id = ");
        builder.push_bind(account_id);
        push_id_filter(&mut builder, " AND feed_id IN (", feed_ids);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Mark every message in the account's bin as read or unread
    pub async fn mark_bin_read(&self, account_id: i64, read: bool) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = ? WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ?",
        )
        .bind(read)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark every non-purged message of the account (bin included) as read or unread
    pub async fn mark_account_read(&self, account_id: i64, read: bool) -> Result<u64, DatabaseError> {
        let result =
            sqlx::query("UPDATE messages SET is_read = ? WHERE is_pdeleted = 0 AND account_id = ?")
                .bind(read)
                .bind(account_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Lifecycle Mutations (active -> bin -> purged)
    // ========================================================================

    /// Move messages to the bin
    pub async fn move_messages_to_bin(&self, ids: &[i64]) -> Result<u64, DatabaseError> {
        self.set_deleted(ids, true).await
    }

    /// Restore messages from the bin
    pub async fn restore_messages_from_bin(&self, ids: &[i64]) -> Result<u64, DatabaseError> {
        self.set_deleted(ids, false).await
    }

    /// Purged messages stay purged: restoring only touches the bin flag, and
    /// purged rows are invisible to every query regardless of it.
    async fn set_deleted(&self, ids: &[i64], deleted: bool) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE messages SET is_deleted = ");
        builder.push_bind(deleted);
        push_id_filter(&mut builder, " WHERE id IN (", ids);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Restore every binned message of the account
    pub async fn restore_bin(&self, account_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = 0 WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ?",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Purge messages. The rows stay so that sync services keep seeing their custom ids.
    pub async fn permanently_delete_messages(&self, ids: &[i64]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE messages SET is_pdeleted = 1");
        push_id_filter(&mut builder, " WHERE id IN (", ids);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Purge the account's bin, or only its read messages when `only_read` is set
    pub async fn purge_messages_from_bin(&self, account_id: i64, only_read: bool) -> Result<u64, DatabaseError> {
        let sql = if only_read {
            "UPDATE messages SET is_pdeleted = 1 WHERE is_read = 1 AND is_deleted = 1 AND account_id = ?"
        } else {
            "UPDATE messages SET is_pdeleted = 1 WHERE is_deleted = 1 AND account_id = ?"
        };
        let result = sqlx::query(sql).bind(account_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Move the active messages of the given feeds to the bin
    pub async fn clean_feeds(
        &self,
        feed_ids: &[i64],
        account_id: i64,
        only_read: bool,
    ) -> Result<u64, DatabaseError> {
        if feed_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "UPDATE messages SET is_deleted = 1 WHERE is_deleted = 0 AND is_pdeleted = 0",
        );
        if only_read {
            builder.push(" AND is_read = 1");
        }
        builder.push(" AND account_id = ");
        builder.push_bind(account_id);
        push_id_filter(&mut builder, " AND feed_id IN (", feed_ids);

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            tracing::debug!(account_id, error = %e, "Cleaning of feeds failed");
            e
        })?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Physical Deletes
    // ========================================================================

    /// Delete messages whose feed is no longer part of the account
    pub async fn purge_leftover_messages(&self, account_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE account_id = ? \
             AND feed_id NOT IN (SELECT custom_id FROM feeds WHERE account_id = ? AND custom_id IS NOT NULL)",
        )
        .bind(account_id)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::warn!(account_id, error = %e, "Removing of left over messages failed");
            e
        })?;
        Ok(result.rows_affected())
    }

    /// Delete read, non-important messages that are not in the bin
    pub async fn purge_read_messages(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE is_important = 0 AND is_deleted = 0 AND is_read = 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete non-important messages created more than `older_than_days` days ago.
    ///
    /// An age reaching back past the earliest representable date deletes nothing.
    pub async fn purge_old_messages(&self, older_than_days: u32) -> Result<u64, DatabaseError> {
        let Some(cutoff) = TimeDelta::try_days(i64::from(older_than_days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            tracing::warn!(older_than_days, "Purge age out of range, nothing purged");
            return Ok(0);
        };
        let cutoff = cutoff.timestamp_millis();
        let result =
            sqlx::query("DELETE FROM messages WHERE is_important = 0 AND date_created < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Delete non-important messages in any bin
    pub async fn purge_recycle_bin(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM messages WHERE is_important = 0 AND is_deleted = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every important message
    pub async fn purge_important_messages(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM messages WHERE is_important = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Append `<prefix>?, ?, ...)` binding every id.
fn push_id_filter(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, prefix: &str, ids: &[i64]) {
    builder.push(prefix);
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}
