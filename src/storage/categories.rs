use anyhow::{bail, Context, Result};
use chrono::Utc;

use super::icon::Icon;
use super::schema::Database;
use super::types::Category;

/// Strip control characters and surrounding whitespace from a category or feed title.
///
/// Empty titles are rejected; the schema enforces the same with a CHECK.
pub(crate) fn sanitize_title(title: &str) -> Result<String> {
    let stripped: String = title.chars().filter(|c| !c.is_control()).collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        bail!("Title cannot be empty or whitespace-only");
    }
    Ok(trimmed.to_owned())
}

type CategoryRow = (i64, Option<i64>, String, Option<String>, i64, Option<i64>);

fn category_from_row((id, parent_id, title, description, account_id, custom_id): CategoryRow) -> Category {
    Category {
        id,
        parent_id,
        title,
        description,
        account_id,
        // Rows written by this crate always carry one; fall back to the row id otherwise
        custom_id: custom_id.unwrap_or(id),
    }
}

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Create a category under `parent_custom_id` (or at the account root).
    ///
    /// The new row's custom id is set to its row id in the same transaction,
    /// so the category is immediately addressable by children and feeds.
    pub async fn add_category(
        &self,
        account_id: i64,
        parent_custom_id: Option<i64>,
        title: &str,
        description: Option<&str>,
        icon: Option<&Icon>,
    ) -> Result<Category> {
        let title = sanitize_title(title)?;
        let icon_bytes = icon.map(|icon| self.icons.encode(icon));

        let mut tx = self.begin_write().await?;
        let (id,): (i64,) = sqlx::query_as(
            r#"
                INSERT INTO categories (parent_id, title, description, date_created, icon, account_id)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id
            "#,
        )
        .bind(parent_custom_id)
        .bind(&title)
        .bind(description)
        .bind(Utc::now().timestamp_millis())
        .bind(icon_bytes)
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert category '{title}'"))?;

        sqlx::query("UPDATE categories SET custom_id = ? WHERE id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(account_id, category_id = id, "Category added");
        Ok(Category {
            id,
            parent_id: parent_custom_id,
            title,
            description: description.map(str::to_owned),
            account_id,
            custom_id: id,
        })
    }

    /// Rewrite a category's parent, title, description and icon.
    pub async fn edit_category(
        &self,
        id: i64,
        parent_custom_id: Option<i64>,
        title: &str,
        description: Option<&str>,
        icon: Option<&Icon>,
    ) -> Result<()> {
        let title = sanitize_title(title)?;
        let icon_bytes = icon.map(|icon| self.icons.encode(icon));

        let result = sqlx::query(
            "UPDATE categories SET parent_id = ?, title = ?, description = ?, icon = ? WHERE id = ?",
        )
        .bind(parent_custom_id)
        .bind(&title)
        .bind(description)
        .bind(icon_bytes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Category {id} does not exist");
        }
        Ok(())
    }

    /// Delete a category. Its feeds and child categories move up to its parent.
    pub async fn delete_category(&self, id: i64) -> Result<()> {
        let mut tx = self.begin_write().await?;

        let row: Option<(Option<i64>, Option<i64>, i64)> =
            sqlx::query_as("SELECT custom_id, parent_id, account_id FROM categories WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((custom_id, parent_id, account_id)) = row else {
            bail!("Category {id} does not exist");
        };
        let custom_id = custom_id.unwrap_or(id);

        sqlx::query("UPDATE feeds SET category = ? WHERE category = ? AND account_id = ?")
            .bind(parent_id)
            .bind(custom_id)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE categories SET parent_id = ? WHERE parent_id = ? AND account_id = ?")
            .bind(parent_id)
            .bind(custom_id)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// All categories of an account as a flat list; callers rebuild the tree from `parent_id`.
    pub async fn categories_for_account(&self, account_id: i64) -> Result<Vec<Category>> {
        let rows: Vec<CategoryRow> = sqlx::query_as(
            "SELECT id, parent_id, title, description, account_id, custom_id \
             FROM categories WHERE account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(category_from_row).collect())
    }

    /// Decoded icon of a category, `None` when it has none or it cannot be decoded
    pub async fn category_icon(&self, id: i64) -> Result<Option<Icon>> {
        let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as("SELECT icon FROM categories WHERE id = ?")
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
    use crate::storage::NewFeed;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("  Tech\u{1b}  ").unwrap(), "Tech");
        assert!(sanitize_title(" \t\n ").is_err());
        assert!(sanitize_title("").is_err());
    }

    #[tokio::test]
    async fn test_add_category_backfills_custom_id() {
        let db = test_db().await;
        let root = db.add_category(1, None, "News", Some("daily"), None).await.unwrap();
        let child = db
            .add_category(1, Some(root.custom_id), "World", None, None)
            .await
            .unwrap();

        assert_eq!(root.custom_id, root.id);
        assert_eq!(child.parent_id, Some(root.custom_id));

        let listed = db.categories_for_account(1).await.unwrap();
        assert_eq!(listed, vec![root, child]);
        assert!(db.categories_for_account(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_category_rejects_empty_title() {
        let db = test_db().await;
        assert!(db.add_category(1, None, "   ", None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_category() {
        let db = test_db().await;
        let category = db.add_category(1, None, "Old", None, None).await.unwrap();
        db.edit_category(category.id, None, "New", Some("desc"), None)
            .await
            .unwrap();

        let listed = db.categories_for_account(1).await.unwrap();
        assert_eq!(listed[0].title, "New");
        assert_eq!(listed[0].description.as_deref(), Some("desc"));
        assert!(db.edit_category(999, None, "X", None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_category_icon_round_trips_through_codec() {
        let db = test_db().await;
        let icon = Icon {
            content_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        };
        let category = db.add_category(1, None, "Pics", None, Some(&icon)).await.unwrap();
        assert_eq!(db.category_icon(category.id).await.unwrap(), Some(icon));

        let plain = db.add_category(1, None, "Plain", None, None).await.unwrap();
        assert_eq!(db.category_icon(plain.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_category_moves_children_up() {
        let db = test_db().await;
        let root = db.add_category(1, None, "Root", None, None).await.unwrap();
        let middle = db
            .add_category(1, Some(root.custom_id), "Middle", None, None)
            .await
            .unwrap();
        let leaf = db
            .add_category(1, Some(middle.custom_id), "Leaf", None, None)
            .await
            .unwrap();
        let feed = db
            .add_feed(
                1,
                &NewFeed {
                    title: "Feed".to_string(),
                    category: Some(middle.custom_id),
                    ..NewFeed::default()
                },
            )
            .await
            .unwrap();

        db.delete_category(middle.id).await.unwrap();

        let categories = db.categories_for_account(1).await.unwrap();
        assert_eq!(categories.len(), 2);
        let leaf_after = categories.iter().find(|c| c.id == leaf.id).unwrap();
        assert_eq!(leaf_after.parent_id, Some(root.custom_id));

        let feeds = db.feeds_for_account(1).await.unwrap();
        assert_eq!(feeds[0].id, feed.id);
        assert_eq!(feeds[0].category, Some(root.custom_id));

        assert!(db.delete_category(middle.id).await.is_err());
    }
}
