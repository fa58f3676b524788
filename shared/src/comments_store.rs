//! SQLite-backed store for blog comments.
//!
//! Comments are persisted as `pending` and later finalized exactly once
//! to `approved` or `rejected` by the moderation pipeline. Public
//! listings exclude `rejected` rows only; `pending` comments stay
//! visible until moderation catches up with them.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const MODERATION_STATUS_PENDING: &str = "pending";
pub const MODERATION_STATUS_APPROVED: &str = "approved";
pub const MODERATION_STATUS_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCommentInput {
    pub comment_id: String,
    pub post_id: String,
    pub author: String,
    pub content: String,
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentRecord {
    pub comment_id: String,
    pub post_id: String,
    pub author: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub likes: i64,
    pub moderation_status: String,
    pub moderation_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct CommentStore {
    conn: Arc<Mutex<Connection>>,
}

impl CommentStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path)
                .with_context(|| format!("failed to open comment db {}", db_path.display()))?;
            init_schema(&conn)?;
            Ok(conn)
        })
        .await
        .context("comment store open task join failed")??;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn create_comment(&self, input: NewCommentInput) -> Result<CommentRecord> {
        let now = now_ms();
        let record = CommentRecord {
            comment_id: input.comment_id,
            post_id: input.post_id,
            author: normalize_author(input.author),
            content: input.content,
            reply_to_id: normalize_optional_text(input.reply_to_id),
            likes: 0,
            moderation_status: MODERATION_STATUS_PENDING.to_string(),
            moderation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO comments (comment_id, post_id, author, content, reply_to_id, \
                 likes, moderation_status, moderation_reason, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    inserted.comment_id,
                    inserted.post_id,
                    inserted.author,
                    inserted.content,
                    inserted.reply_to_id,
                    inserted.likes,
                    inserted.moderation_status,
                    inserted.moderation_reason,
                    inserted.created_at,
                    inserted.updated_at,
                ],
            )
            .context("failed to insert comment")?;
            Ok(())
        })
        .await?;

        Ok(record)
    }

    pub async fn get_comment(&self, comment_id: &str) -> Result<Option<CommentRecord>> {
        let comment_id = comment_id.trim().to_string();
        if comment_id.is_empty() {
            return Ok(None);
        }

        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE comment_id = ?1"),
                params![comment_id],
                row_to_comment,
            )
            .optional()
            .context("failed to query comment")
        })
        .await
    }

    /// Comments visible to readers: everything except `rejected`,
    /// newest first.
    pub async fn list_comments_for_post(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<CommentRecord>> {
        let post_id = post_id.trim().to_string();
        if post_id.is_empty() {
            return Ok(vec![]);
        }
        let limit = limit.max(1) as i64;

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments \
                     WHERE post_id = ?1 AND moderation_status != ?2 \
                     ORDER BY created_at DESC LIMIT ?3"
                ))
                .context("failed to prepare comment list query")?;
            let rows = stmt
                .query_map(params![post_id, MODERATION_STATUS_REJECTED, limit], row_to_comment)
                .context("failed to list comments")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read comment rows")?;
            Ok(rows)
        })
        .await
    }

    /// Comments still awaiting a moderation verdict, oldest first.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<CommentRecord>> {
        let limit = limit.max(1) as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments \
                     WHERE moderation_status = ?1 ORDER BY created_at ASC LIMIT ?2"
                ))
                .context("failed to prepare pending comment query")?;
            let rows = stmt
                .query_map(params![MODERATION_STATUS_PENDING, limit], row_to_comment)
                .context("failed to list pending comments")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read pending comment rows")?;
            Ok(rows)
        })
        .await
    }

    /// Writes the terminal moderation verdict for a comment. The update
    /// only matches rows still in `pending`, so a terminal status can
    /// never be overwritten. Returns whether a row changed.
    pub async fn finalize_moderation(
        &self,
        comment_id: &str,
        status: &str,
        reason: Option<String>,
    ) -> Result<bool> {
        if status != MODERATION_STATUS_APPROVED && status != MODERATION_STATUS_REJECTED {
            anyhow::bail!("invalid terminal moderation status: {status}");
        }

        let comment_id = comment_id.trim().to_string();
        let status = status.to_string();
        let reason = normalize_optional_text(reason);
        let now = now_ms();

        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE comments SET moderation_status = ?1, moderation_reason = ?2, \
                     updated_at = ?3 WHERE comment_id = ?4 AND moderation_status = ?5",
                    params![status, reason, now, comment_id, MODERATION_STATUS_PENDING],
                )
                .context("failed to update comment moderation status")?;
            Ok(changed > 0)
        })
        .await
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            op(&guard)
        })
        .await
        .context("comment store task join failed")?
    }
}

const COMMENT_COLUMNS: &str = "comment_id, post_id, author, content, reply_to_id, likes, \
                               moderation_status, moderation_reason, created_at, updated_at";

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS comments (
            comment_id        TEXT PRIMARY KEY,
            post_id           TEXT NOT NULL,
            author            TEXT NOT NULL,
            content           TEXT NOT NULL,
            reply_to_id       TEXT,
            likes             INTEGER NOT NULL DEFAULT 0,
            moderation_status TEXT NOT NULL DEFAULT 'pending',
            moderation_reason TEXT,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments (post_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_comments_status ON comments (moderation_status);",
    )
    .context("failed to init comment schema")
}

fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<CommentRecord> {
    Ok(CommentRecord {
        comment_id: row.get(0)?,
        post_id: row.get(1)?,
        author: row.get(2)?,
        content: row.get(3)?,
        reply_to_id: row.get(4)?,
        likes: row.get(5)?,
        moderation_status: row.get(6)?,
        moderation_reason: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn normalize_author(author: String) -> String {
    let trimmed = author.trim();
    if trimmed.is_empty() {
        "匿名访客".to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}
