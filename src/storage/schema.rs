use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::icon::{IconCodec, RawIconCodec};
use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Handle to the feed store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) icons: Arc<dyn IconCodec>,
}

impl Database {
    /// Open a database connection with the default [`RawIconCodec`] and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process
    /// has the database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        Self::open_with(path, Arc::new(RawIconCodec)).await
    }

    /// Open a database connection using the given icon codec and run migrations
    pub async fn open_with(path: &str, icons: Arc<dyn IconCodec>) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let in_memory = path == ":memory:";

        // Pre-create the file with user-only permissions before SQLite touches it
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite will report the error at connect_with.
                }
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for locks before SQLITE_BUSY.
        // Using pragma() ensures all connections in the pool inherit this setting.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // A shared-cache in-memory database must stay on one connection, otherwise
        // a batch transaction and a concurrent read lock each other out.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool, icons };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Start a transaction that holds the write lock from its first statement.
    ///
    /// A deferred BEGIN that later upgrades from a read lock gets SQLITE_BUSY
    /// without waiting on busy_timeout, so every write transaction starts here.
    pub(crate) async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    ///
    /// Identity lookups are backed by plain (non-unique) indexes: a batch may
    /// legitimately carry two items sharing title, url and author, and the
    /// reconciler reports such ambiguities instead of failing the insert.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.begin_write().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                type TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER,
                title TEXT NOT NULL CHECK (title != ''),
                description TEXT,
                date_created INTEGER,
                icon BLOB,
                account_id INTEGER NOT NULL,
                custom_id INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL CHECK (title != ''),
                description TEXT,
                date_created INTEGER,
                icon BLOB,
                category INTEGER,
                encoding TEXT,
                url TEXT,
                update_type INTEGER NOT NULL DEFAULT 1,
                update_interval INTEGER NOT NULL DEFAULT 15,
                type INTEGER NOT NULL DEFAULT 3,
                account_id INTEGER NOT NULL,
                custom_id INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                url TEXT,
                author TEXT,
                contents TEXT,
                enclosures TEXT,
                date_created INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0 CHECK (is_read IN (0, 1)),
                is_important INTEGER NOT NULL DEFAULT 0 CHECK (is_important IN (0, 1)),
                is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
                is_pdeleted INTEGER NOT NULL DEFAULT 0 CHECK (is_pdeleted IN (0, 1)),
                custom_id TEXT,
                custom_hash TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Identity strategy 1: custom id within an account
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_custom_id ON messages(account_id, custom_id)",
        )
        .execute(&mut *tx)
        .await?;

        // Identity strategy 2: feed + title + url + author within an account
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_identity ON messages(account_id, feed_id, title, url, author)",
        )
        .execute(&mut *tx)
        .await?;

        // Counters filter on lifecycle flags and group by feed
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_counts ON messages(account_id, is_pdeleted, is_deleted, feed_id, is_read)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_account_category ON feeds(account_id, category)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_categories_account ON categories(account_id)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_schema() {
        let db = Database::open(":memory:").await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["accounts", "categories", "feeds", "messages"]);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = std::env::temp_dir().join(format!("feedstore_schema_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feeds.db");
        let path_str = path.to_str().unwrap();

        let db = Database::open(path_str).await.unwrap();
        drop(db);
        // Reopening runs the migrations again on an existing schema
        Database::open(path_str).await.unwrap();

        std::fs::remove_dir_all(&dir).ok();
    }
}
