use anyhow::{bail, Context, Result};
use chrono::Utc;

use super::categories::sanitize_title;
use super::icon::Icon;
use super::schema::Database;
use super::types::{AutoUpdate, Feed, FeedFormat, NewFeed};

/// Update interval in minutes used when the caller gives none.
pub const DEFAULT_UPDATE_INTERVAL: i64 = 15;

#[derive(sqlx::FromRow)]
struct FeedDbRow {
    id: i64,
    title: String,
    description: Option<String>,
    url: Option<String>,
    category: Option<i64>,
    encoding: Option<String>,
    update_type: i64,
    update_interval: i64,
    #[sqlx(rename = "type")]
    format: i64,
    account_id: i64,
    custom_id: Option<i64>,
}

impl From<FeedDbRow> for Feed {
    fn from(row: FeedDbRow) -> Self {
        let format = FeedFormat::from_db(row.format).unwrap_or_else(|| {
            tracing::warn!(feed_id = row.id, value = row.format, "Unknown feed format, assuming RSS 2.x");
            FeedFormat::default()
        });
        Feed {
            id: row.id,
            title: row.title,
            description: row.description,
            url: row.url,
            category: row.category,
            encoding: row.encoding,
            auto_update: AutoUpdate::from_db(row.update_type),
            update_interval: row.update_interval,
            format,
            account_id: row.account_id,
            custom_id: row.custom_id.unwrap_or(row.id),
        }
    }
}

fn effective_interval(interval: i64) -> i64 {
    if interval > 0 {
        interval
    } else {
        DEFAULT_UPDATE_INTERVAL
    }
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed to an account. The feed's custom id is its row id.
    pub async fn add_feed(&self, account_id: i64, feed: &NewFeed) -> Result<Feed> {
        let title = sanitize_title(&feed.title)?;
        let icon_bytes = feed.icon.as_ref().map(|icon| self.icons.encode(icon));
        let interval = effective_interval(feed.update_interval);

        let mut tx = self.begin_write().await?;
        let (id,): (i64,) = sqlx::query_as(
            r#"
                INSERT INTO feeds (title, description, date_created, icon, category, encoding, url,
                                   update_type, update_interval, type, account_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
            "#,
        )
        .bind(&title)
        .bind(&feed.description)
        .bind(Utc::now().timestamp_millis())
        .bind(icon_bytes)
        .bind(feed.category)
        .bind(&feed.encoding)
        .bind(&feed.url)
        .bind(feed.auto_update.as_db())
        .bind(interval)
        .bind(feed.format.as_db())
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert feed '{title}'"))?;

        sqlx::query("UPDATE feeds SET custom_id = ? WHERE id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(account_id, feed_id = id, "Feed added");
        Ok(Feed {
            id,
            title,
            description: feed.description.clone(),
            url: feed.url.clone(),
            category: feed.category,
            encoding: feed.encoding.clone(),
            auto_update: feed.auto_update,
            update_interval: interval,
            format: feed.format,
            account_id,
            custom_id: id,
        })
    }

    /// Rewrite every user-editable column of a feed
    pub async fn edit_feed(&self, id: i64, feed: &NewFeed) -> Result<()> {
        let title = sanitize_title(&feed.title)?;
        let icon_bytes = feed.icon.as_ref().map(|icon| self.icons.encode(icon));

        let result = sqlx::query(
            r#"
                UPDATE feeds
                SET title = ?, description = ?, icon = ?, category = ?, encoding = ?, url = ?,
                    update_type = ?, update_interval = ?, type = ?
                WHERE id = ?
            "#,
        )
        .bind(&title)
        .bind(&feed.description)
        .bind(icon_bytes)
        .bind(feed.category)
        .bind(&feed.encoding)
        .bind(&feed.url)
        .bind(feed.auto_update.as_db())
        .bind(effective_interval(feed.update_interval))
        .bind(feed.format.as_db())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Feed {id} does not exist");
        }
        Ok(())
    }

    /// Change only the auto-update mode and interval of a feed
    pub async fn edit_feed_update_settings(
        &self,
        id: i64,
        auto_update: AutoUpdate,
        update_interval: i64,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE feeds SET update_type = ?, update_interval = ? WHERE id = ?")
            .bind(auto_update.as_db())
            .bind(effective_interval(update_interval))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            bail!("Feed {id} does not exist");
        }
        Ok(())
    }

    /// Delete a feed and all of its messages (bin and purged rows included)
    pub async fn delete_feed(&self, feed_custom_id: i64, account_id: i64) -> Result<()> {
        let mut tx = self.begin_write().await?;

        let messages = sqlx::query("DELETE FROM messages WHERE feed_id = ? AND account_id = ?")
            .bind(feed_custom_id)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        let feeds = sqlx::query("DELETE FROM feeds WHERE custom_id = ? AND account_id = ?")
            .bind(feed_custom_id)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            feed_id = feed_custom_id,
            account_id,
            messages = messages.rows_affected(),
            feeds = feeds.rows_affected(),
            "Feed deleted"
        );
        Ok(())
    }

    /// All feeds of an account, ordered by row id
    pub async fn feeds_for_account(&self, account_id: i64) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            r#"
                SELECT id, title, description, url, category, encoding, update_type,
                       update_interval, type, account_id, custom_id
                FROM feeds
                WHERE account_id = ?
                ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Decoded icon of a feed, `None` when it has none or it cannot be decoded
    pub async fn feed_icon(&self, id: i64) -> Result<Option<Icon>> {
        let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as("SELECT icon FROM feeds WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .and_then(|(bytes,)| bytes)
            .and_then(|bytes| self.icons.decode(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Message;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn new_feed(title: &str) -> NewFeed {
        NewFeed {
            title: title.to_string(),
            url: Some(format!("https://{title}.example/feed.xml")),
            ..NewFeed::default()
        }
    }

    #[tokio::test]
    async fn test_add_feed_defaults() {
        let db = test_db().await;
        let feed = db.add_feed(1, &new_feed("alpha")).await.unwrap();

        assert_eq!(feed.custom_id, feed.id);
        assert_eq!(feed.update_interval, DEFAULT_UPDATE_INTERVAL);
        assert_eq!(feed.auto_update, AutoUpdate::Default);
        assert_eq!(feed.format, FeedFormat::Rss2X);

        let listed = db.feeds_for_account(1).await.unwrap();
        assert_eq!(listed, vec![feed]);
    }

    #[tokio::test]
    async fn test_add_feed_rejects_blank_title() {
        let db = test_db().await;
        assert!(db.add_feed(1, &new_feed("  ")).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_feed_and_update_settings() {
        let db = test_db().await;
        let feed = db.add_feed(1, &new_feed("alpha")).await.unwrap();

        let mut edited = new_feed("beta");
        edited.format = FeedFormat::Atom10;
        edited.encoding = Some("UTF-8".to_string());
        db.edit_feed(feed.id, &edited).await.unwrap();
        db.edit_feed_update_settings(feed.id, AutoUpdate::Specific, 60)
            .await
            .unwrap();

        let stored = &db.feeds_for_account(1).await.unwrap()[0];
        assert_eq!(stored.title, "beta");
        assert_eq!(stored.format, FeedFormat::Atom10);
        assert_eq!(stored.encoding.as_deref(), Some("UTF-8"));
        assert_eq!(stored.auto_update, AutoUpdate::Specific);
        assert_eq!(stored.update_interval, 60);

        assert!(db
            .edit_feed_update_settings(999, AutoUpdate::Disabled, 5)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_feed_removes_its_messages_only() {
        let db = test_db().await;
        let doomed = db.add_feed(1, &new_feed("doomed")).await.unwrap();
        let kept = db.add_feed(1, &new_feed("kept")).await.unwrap();
        let message = Message {
            title: "m".to_string(),
            created_at: Utc::now(),
            ..Message::default()
        };
        db.apply_batch(vec![message.clone()], doomed.custom_id, 1, "").await;
        db.apply_batch(vec![message], kept.custom_id, 1, "").await;

        db.delete_feed(doomed.custom_id, 1).await.unwrap();

        let feeds = db.feeds_for_account(1).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, kept.id);
        assert_eq!(db.custom_ids_for_account(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_feed_icon() {
        let db = test_db().await;
        let mut feed = new_feed("alpha");
        feed.icon = Some(Icon {
            content_type: "image/x-icon".to_string(),
            data: vec![0, 1],
        });
        let stored = db.add_feed(1, &feed).await.unwrap();
        assert_eq!(db.feed_icon(stored.id).await.unwrap(), feed.icon);
    }
}
