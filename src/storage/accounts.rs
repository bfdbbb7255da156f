use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::categories::sanitize_title;
use super::icon::{Icon, IconCodec};
use super::schema::Database;
use super::types::{Account, AutoUpdate, DatabaseError};

// ============================================================================
// Account Tree
// ============================================================================

/// Kind of a node in a service's account tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Category,
    Feed,
}

/// A node of an account tree as delivered by a sync service.
///
/// Parent links are expressed through custom ids, so a node only needs to
/// know its own id and its children.
pub trait TreeNode: Sized {
    fn kind(&self) -> NodeKind;
    fn custom_id(&self) -> i64;
    fn title(&self) -> &str;
    fn icon(&self) -> Option<&Icon> {
        None
    }
    fn url(&self) -> Option<&str> {
        None
    }
    fn auto_update(&self) -> AutoUpdate {
        AutoUpdate::Default
    }
    fn update_interval(&self) -> i64 {
        super::feeds::DEFAULT_UPDATE_INTERVAL
    }
    fn children(&self) -> &[Self];
}

/// Serializable account tree node, as read by `feedstore import-tree`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineNode {
    pub kind: NodeKind,
    pub custom_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub icon: Option<Icon>,
    pub auto_update: AutoUpdate,
    pub update_interval: i64,
    pub children: Vec<OutlineNode>,
}

impl TreeNode for OutlineNode {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn custom_id(&self) -> i64 {
        self.custom_id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn icon(&self) -> Option<&Icon> {
        self.icon.as_ref()
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn auto_update(&self) -> AutoUpdate {
        self.auto_update
    }

    fn update_interval(&self) -> i64 {
        if self.update_interval > 0 {
            self.update_interval
        } else {
            super::feeds::DEFAULT_UPDATE_INTERVAL
        }
    }

    fn children(&self) -> &[Self] {
        &self.children
    }
}

/// Row written for one tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredNode {
    pub kind: NodeKind,
    /// Assigned row id
    pub id: i64,
    pub custom_id: i64,
    /// Custom id of the parent category, `None` for top-level nodes
    pub parent_custom_id: Option<i64>,
}

async fn insert_node<T: TreeNode>(
    conn: &mut SqliteConnection,
    icons: &dyn IconCodec,
    node: &T,
    parent_custom_id: Option<i64>,
    account_id: i64,
) -> Result<StoredNode> {
    let title = sanitize_title(node.title())
        .with_context(|| format!("Invalid title for node {}", node.custom_id()))?;
    let now = Utc::now().timestamp_millis();

    let (id,): (i64,) = match node.kind() {
        NodeKind::Category => {
            sqlx::query_as(
                "INSERT INTO categories (parent_id, title, date_created, icon, account_id, custom_id) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(parent_custom_id)
            .bind(&title)
            .bind(now)
            .bind(node.icon().map(|icon| icons.encode(icon)))
            .bind(account_id)
            .bind(node.custom_id())
            .fetch_one(&mut *conn)
            .await?
        }
        NodeKind::Feed => {
            sqlx::query_as(
                "INSERT INTO feeds (title, date_created, icon, category, url, update_type, update_interval, account_id, custom_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(&title)
            .bind(now)
            .bind(node.icon().map(|icon| icons.encode(icon)))
            .bind(parent_custom_id)
            .bind(node.url())
            .bind(node.auto_update().as_db())
            .bind(node.update_interval())
            .bind(account_id)
            .bind(node.custom_id())
            .fetch_one(&mut *conn)
            .await?
        }
    };

    Ok(StoredNode {
        kind: node.kind(),
        id,
        custom_id: node.custom_id(),
        parent_custom_id,
    })
}

impl Database {
    // ========================================================================
    // Account Operations
    // ========================================================================

    /// Register an account of the given service type, returning its id (highest id + 1)
    pub async fn create_account(&self, code: &str) -> Result<i64, DatabaseError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO accounts (id, type) SELECT COALESCE(MAX(id), 0) + 1, ? FROM accounts RETURNING id",
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(account_id = id, code, "Account created");
        Ok(id)
    }

    /// Accounts of one service type, ordered by id
    pub async fn accounts_of_type(&self, code: &str) -> Result<Vec<Account>, DatabaseError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, type FROM accounts WHERE type = ? ORDER BY id")
                .bind(code)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id, kind)| Account { id, kind }).collect())
    }

    /// Remove an account with all of its messages, feeds and categories
    pub async fn delete_account(&self, account_id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.begin_write().await?;
        for sql in [
            "DELETE FROM messages WHERE account_id = ?",
            "DELETE FROM feeds WHERE account_id = ?",
            "DELETE FROM categories WHERE account_id = ?",
            "DELETE FROM accounts WHERE id = ?",
        ] {
            sqlx::query(sql)
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    tracing::error!(account_id, error = %e, "Removing of account failed");
                    e
                })?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Remove an account's feeds and categories (and messages if asked), keeping the account row
    pub async fn delete_account_data(&self, account_id: i64, delete_messages: bool) -> Result<(), DatabaseError> {
        let mut tx = self.begin_write().await?;
        if delete_messages {
            sqlx::query("DELETE FROM messages WHERE account_id = ?")
                .bind(account_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM feeds WHERE account_id = ?")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM categories WHERE account_id = ?")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Store a service's account tree below the account root.
    ///
    /// `top_level` holds the direct children of the root. Nodes are written
    /// in post-order (children before their parent) within one transaction;
    /// any failure leaves the store untouched.
    pub async fn store_account_tree<T: TreeNode>(
        &self,
        top_level: &[T],
        account_id: i64,
    ) -> Result<Vec<StoredNode>> {
        let mut tx = self.begin_write().await?;
        let mut stored = Vec::new();

        // (node, parent custom id, children already pushed)
        let mut stack: Vec<(&T, Option<i64>, bool)> =
            top_level.iter().rev().map(|node| (node, None, false)).collect();

        while let Some((node, parent, expanded)) = stack.pop() {
            if expanded || node.children().is_empty() {
                let row = insert_node(&mut *tx, self.icons.as_ref(), node, parent, account_id).await?;
                stored.push(row);
                continue;
            }

            stack.push((node, parent, true));
            let own_id = Some(node.custom_id());
            stack.extend(node.children().iter().rev().map(|child| (child, own_id, false)));
        }

        tx.commit().await?;
        tracing::info!(account_id, nodes = stored.len(), "Account tree stored");
        Ok(stored)
    }
}
