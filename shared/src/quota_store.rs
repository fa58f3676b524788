//! Shared key-value counter store backing the moderation daily quota.
//!
//! One row per counter key, with an expiry refreshed on every
//! increment so day-scoped keys clean themselves up without a sweeper.
//! Expired rows read as absent.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

pub struct QuotaStore {
    conn: Arc<Mutex<Connection>>,
}

impl QuotaStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path)
                .with_context(|| format!("failed to open quota db {}", db_path.display()))?;
            init_schema(&conn)?;
            Ok(conn)
        })
        .await
        .context("quota store open task join failed")??;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Current value of a counter key, or 0 when the key is absent or
    /// expired.
    pub async fn get_count(&self, key: &str) -> Result<i64> {
        let key = key.to_string();
        let now = now_secs();

        self.with_conn(move |conn| {
            let row: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT value, expires_at FROM quota_counters WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("failed to read quota counter")?;

            match row {
                Some((value, expires_at)) if expires_at > now => Ok(value),
                Some(_) => {
                    // Lazy reclamation of an expired key.
                    conn.execute("DELETE FROM quota_counters WHERE key = ?1", params![key])
                        .context("failed to delete expired quota counter")?;
                    Ok(0)
                },
                None => Ok(0),
            }
        })
        .await
    }

    /// Atomically increments a counter key and returns the new value.
    /// The expiry is refreshed to now + `ttl_seconds` on every call; an
    /// expired row restarts from 1.
    pub async fn increment(&self, key: &str, ttl_seconds: i64) -> Result<i64> {
        let key = key.to_string();
        let now = now_secs();
        let expires_at = now + ttl_seconds.max(1);

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO quota_counters (key, value, expires_at) VALUES (?1, 1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET \
                 value = CASE WHEN quota_counters.expires_at > ?3 \
                              THEN quota_counters.value + 1 ELSE 1 END, \
                 expires_at = ?2",
                params![key, expires_at, now],
            )
            .context("failed to increment quota counter")?;

            conn.query_row(
                "SELECT value FROM quota_counters WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .context("failed to read quota counter after increment")
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
        .context("quota store task join failed")?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS quota_counters (
            key        TEXT PRIMARY KEY,
            value      INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );",
    )
    .context("failed to init quota schema")
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}
