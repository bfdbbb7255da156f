use anyhow::Result;
use sqlx::SqliteConnection;

use super::identity::{self, Resolution};
use super::links::{feed_origin, resolve_relative_url};
use super::merge::{decide, Decision, UpdatePlan};
use super::{BatchOutcome, RowIssue, RowIssueKind};
use crate::storage::{encode_enclosures, Database, DatabaseError, Message};

impl Database {
    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Merge a fetched batch of messages into the store for one feed scope.
    ///
    /// Messages are processed in order inside a single transaction. A failing
    /// row is recorded in [`BatchOutcome::row_issues`] and skipped; only a failure
    /// to begin or commit the transaction fails the batch (`ok == false`, no
    /// rows persisted, `updated_count == 0`).
    ///
    /// After the last message every row of the account without a custom id
    /// gets its primary key as custom id, which also heals rows left behind by
    /// earlier interrupted batches.
    ///
    /// Batches touching the same `(feed_id, account_id)` scope must not run
    /// concurrently; the identity lookup relies on read-then-write within one
    /// transaction.
    pub async fn apply_batch(
        &self,
        messages: Vec<Message>,
        feed_id: i64,
        account_id: i64,
        feed_base_url: &str,
    ) -> BatchOutcome {
        if messages.is_empty() {
            return BatchOutcome::empty();
        }

        let origin = feed_origin(feed_base_url);
        let batch_size = messages.len();

        let mut tx = match self.begin_write().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(feed_id, account_id, error = %e, "Failed to start batch transaction");
                return BatchOutcome::rolled_back(Vec::new());
            }
        };

        let mut outcome = BatchOutcome::default();

        for (index, mut message) in messages.into_iter().enumerate() {
            if let Some(resolved) = resolve_relative_url(&message.url, origin.as_deref()) {
                message.url = resolved;
            }

            let resolution = match identity::resolve(&mut *tx, &message, feed_id, account_id).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    tracing::warn!(feed_id, index, title = %message.title, error = %e, "Identity lookup failed, skipping message");
                    outcome.record(index, &message, RowIssueKind::LookupFailed(e.to_string()));
                    continue;
                }
            };

            if resolution.is_ambiguous() {
                record_ambiguity(&mut outcome, index, &message, &resolution);
            }

            match decide(&message, resolution.existing.as_ref()) {
                Decision::Insert => {
                    match insert_message(&mut *tx, &message, feed_id, account_id).await {
                        Ok(1) => {
                            outcome.inserted += 1;
                            outcome.updated_count += 1;
                            tracing::debug!(feed_id, title = %message.title, "Inserted new message");
                        }
                        Ok(rows) => {
                            tracing::warn!(feed_id, index, title = %message.title, rows, "Insert affected an unexpected number of rows");
                            outcome.record(
                                index,
                                &message,
                                RowIssueKind::InsertFailed(format!("insert affected {rows} rows")),
                            );
                        }
                        Err(e) => {
                            tracing::warn!(feed_id, index, title = %message.title, error = %e, "Insert failed, skipping message");
                            outcome.record(index, &message, RowIssueKind::InsertFailed(format!("{e:#}")));
                        }
                    }
                }
                Decision::Update(plan) => {
                    outcome.any_changed = true;
                    match update_message(&mut *tx, &message, &plan).await {
                        Ok(_) => {
                            outcome.updated += 1;
                            if !plan.is_read {
                                outcome.updated_count += 1;
                            }
                            tracing::debug!(feed_id, id = plan.id, title = %message.title, "Updated message");
                        }
                        Err(e) => {
                            tracing::warn!(feed_id, index, id = plan.id, error = %e, "Update failed, skipping message");
                            outcome.record(index, &message, RowIssueKind::UpdateFailed(format!("{e:#}")));
                        }
                    }
                }
                Decision::Skip => {
                    outcome.skipped += 1;
                }
            }
        }

        match backfill_custom_ids(&mut *tx, account_id).await {
            Ok(rows) => outcome.custom_ids_backfilled = rows,
            Err(e) => {
                tracing::warn!(account_id, error = %e, "Failed to backfill custom ids");
            }
        }

        if let Err(e) = tx.commit().await {
            // The transaction is rolled back when dropped after a failed commit
            tracing::error!(feed_id, account_id, error = %e, "Batch commit failed, rolled back");
            return BatchOutcome::rolled_back(outcome.row_issues);
        }

        outcome.ok = true;
        tracing::info!(
            feed_id,
            account_id,
            batch_size,
            inserted = outcome.inserted,
            updated = outcome.updated,
            skipped = outcome.skipped,
            issues = outcome.row_issues.len(),
            "Batch applied"
        );
        outcome
    }
}

impl BatchOutcome {
    fn record(&mut self, index: usize, message: &Message, kind: RowIssueKind) {
        self.row_issues.push(RowIssue {
            index,
            title: message.title.clone(),
            custom_id: message.source_id().map(str::to_owned),
            kind,
        });
    }
}

fn record_ambiguity(outcome: &mut BatchOutcome, index: usize, message: &Message, resolution: &Resolution) {
    let Some(existing) = resolution.existing else {
        return;
    };
    tracing::warn!(
        index,
        title = %message.title,
        strategy = ?resolution.strategy,
        used_id = existing.id,
        "Several stored messages match, using the oldest"
    );
    outcome.record(
        index,
        message,
        RowIssueKind::AmbiguousMatch {
            matches: resolution.matches,
            used_id: existing.id,
        },
    );
}

async fn insert_message(
    conn: &mut SqliteConnection,
    message: &Message,
    feed_id: i64,
    account_id: i64,
) -> Result<u64> {
    let enclosures = encode_enclosures(&message.enclosures)?;
    let result = sqlx::query(
        r#"
        INSERT INTO messages
            (feed_id, title, is_read, is_important, url, author, date_created,
             contents, enclosures, custom_id, custom_hash, account_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(feed_id)
    .bind(&message.title)
    .bind(message.is_read)
    .bind(message.is_important)
    .bind(&message.url)
    .bind(&message.author)
    .bind(message.created_at_ms())
    .bind(&message.contents)
    .bind(enclosures)
    .bind(&message.custom_id)
    .bind(&message.custom_hash)
    .bind(account_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Rewrites content and flags; custom id, hash and scope columns are never touched.
async fn update_message(conn: &mut SqliteConnection, message: &Message, plan: &UpdatePlan) -> Result<u64> {
    let enclosures = encode_enclosures(&message.enclosures)?;
    let result = sqlx::query(
        r#"
        UPDATE messages
        SET title = ?, is_read = ?, is_important = ?, url = ?, author = ?,
            date_created = ?, contents = ?, enclosures = ?
        WHERE id = ?
    "#,
    )
    .bind(&message.title)
    .bind(plan.is_read)
    .bind(plan.is_important)
    .bind(&message.url)
    .bind(&message.author)
    .bind(message.created_at_ms())
    .bind(&message.contents)
    .bind(enclosures)
    .bind(plan.id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

async fn backfill_custom_ids(conn: &mut SqliteConnection, account_id: i64) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        r#"
        UPDATE messages SET custom_id = CAST(id AS TEXT)
        WHERE account_id = ? AND (custom_id IS NULL OR custom_id = '')
    "#,
    )
    .bind(account_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
