use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use comment_guard_backend::{
    ai_client::ModerationClient,
    config::ModerationConfig,
    pipeline::{spawn_moderation_workers, start_moderation, ModerationPipeline},
    quota::{DailyQuota, FailoverDailyQuota, LocalDailyQuota, SharedDailyQuota},
};
use comment_guard_shared::{comments_store::CommentStore, quota_store::QuotaStore};

const STARTUP_SWEEP_LIMIT: usize = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = ModerationConfig::from_env();
    tracing::info!("starting comment-guard backend");
    tracing::info!(
        "moderation enabled={} model={} daily_limit={} workers={}",
        config.enabled,
        config.model,
        config.daily_limit,
        config.worker_count
    );
    if config.api_key.is_none() {
        tracing::warn!("MODERATION_API_KEY not set, ai review will pass everything");
    }

    ensure_parent_dir(&config.comment_db_path).await?;
    ensure_parent_dir(&config.quota_db_path).await?;

    let comment_store = Arc::new(CommentStore::open(&config.comment_db_path).await?);

    // The shared quota store may legitimately be unreachable; the
    // failover decorator keeps counting locally in that case.
    let quota: Arc<dyn DailyQuota> = match QuotaStore::open(&config.quota_db_path).await {
        Ok(store) => Arc::new(FailoverDailyQuota::new(
            Arc::new(SharedDailyQuota::new(Arc::new(store), config.daily_limit)),
            LocalDailyQuota::new(config.daily_limit),
        )),
        Err(err) => {
            tracing::warn!("quota store unavailable at startup, using in-process counter: {err:#}");
            Arc::new(LocalDailyQuota::new(config.daily_limit))
        },
    };

    let client = Arc::new(ModerationClient::new(&config)?);
    let pipeline = Arc::new(ModerationPipeline::new(
        comment_store.clone(),
        quota,
        client,
        config.enabled,
        config.daily_limit,
    ));
    let sender = spawn_moderation_workers(pipeline, config.worker_count, config.queue_depth);

    // Re-enqueue comments stranded in `pending` by a previous crash or
    // a failed finalize.
    let stranded = comment_store.list_pending(STARTUP_SWEEP_LIMIT).await?;
    if !stranded.is_empty() {
        tracing::info!("re-queuing {} pending comments for moderation", stranded.len());
        for comment in stranded {
            start_moderation(&sender, comment.comment_id, comment.content);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down comment-guard backend");
    Ok(())
}

async fn ensure_parent_dir(db_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create data dir {}", parent.display()))?;
        }
    }
    Ok(())
}
