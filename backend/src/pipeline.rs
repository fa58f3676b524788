//! Moderation orchestrator and worker pool.
//!
//! Comment creation enqueues a job and returns immediately; a bounded
//! pool of workers drains the queue and runs each comment through the
//! three stages (prefilter, quota, AI classification) strictly in
//! order, then writes the terminal status exactly once. Nothing in
//! here ever reports an error back to the enqueuer: all failures end
//! in an approved comment and a log line.

use std::sync::Arc;

use comment_guard_shared::comments_store::{
    CommentStore, MODERATION_STATUS_APPROVED, MODERATION_STATUS_REJECTED,
};
use tokio::sync::{mpsc, Mutex};

use crate::{ai_client::ModerationClient, prefilter, quota::DailyQuota};

#[derive(Clone, Debug)]
pub struct ModerationJob {
    pub comment_id: String,
    pub content: String,
}

pub struct ModerationPipeline {
    store: Arc<CommentStore>,
    quota: Arc<dyn DailyQuota>,
    client: Arc<ModerationClient>,
    enabled: bool,
    daily_limit: i64,
}

impl ModerationPipeline {
    pub fn new(
        store: Arc<CommentStore>,
        quota: Arc<dyn DailyQuota>,
        client: Arc<ModerationClient>,
        enabled: bool,
        daily_limit: i64,
    ) -> Self {
        Self { store, quota, client, enabled, daily_limit }
    }

    /// Runs the full pipeline for one comment and finalizes it. Always
    /// reaches a terminal verdict; the only way a comment stays
    /// `pending` is a failing status write, which is logged and left
    /// for the startup sweep.
    pub async fn moderate(&self, job: ModerationJob) {
        let comment_id = job.comment_id.as_str();

        if !self.enabled {
            tracing::debug!("moderation disabled, auto-approving comment {comment_id}");
            self.finalize(comment_id, MODERATION_STATUS_APPROVED, None).await;
            return;
        }

        if !prefilter::contains_sensitive_term(&job.content) {
            tracing::info!("no sensitive term found, approving comment {comment_id}");
            self.finalize(comment_id, MODERATION_STATUS_APPROVED, None).await;
            return;
        }

        match self.quota.under_daily_limit().await {
            Ok(true) => {},
            Ok(false) => {
                tracing::warn!(
                    "daily moderation limit ({}) reached, approving comment {comment_id} unreviewed",
                    self.daily_limit
                );
                self.finalize(comment_id, MODERATION_STATUS_APPROVED, None).await;
                return;
            },
            Err(err) => {
                tracing::warn!("quota check failed for comment {comment_id}, approving: {err:#}");
                self.finalize(comment_id, MODERATION_STATUS_APPROVED, None).await;
                return;
            },
        }

        tracing::info!("sensitive term found, sending comment {comment_id} to ai review");

        // Quota is consumed only when a call is actually attempted, so
        // these two stay adjacent.
        match self.quota.record_call().await {
            Ok(count) => {
                tracing::info!("moderation api calls today: {count}/{}", self.daily_limit);
            },
            Err(err) => {
                tracing::warn!("failed to record quota call for comment {comment_id}: {err:#}");
            },
        }
        let verdict = self.client.classify(&job.content).await;

        if verdict.pass {
            tracing::info!("comment {comment_id} approved by ai review");
            self.finalize(comment_id, MODERATION_STATUS_APPROVED, None).await;
        } else {
            tracing::warn!("comment {comment_id} rejected: {}", verdict.reason);
            self.finalize(comment_id, MODERATION_STATUS_REJECTED, Some(verdict.reason))
                .await;
        }
    }

    /// Best-effort status write. There is no caller left waiting, so a
    /// failure here must never escape the background task.
    async fn finalize(&self, comment_id: &str, status: &str, reason: Option<String>) {
        match self.store.finalize_moderation(comment_id, status, reason).await {
            Ok(true) => {},
            Ok(false) => {
                tracing::warn!("moderation finalize matched no pending comment {comment_id}");
            },
            Err(err) => {
                tracing::error!("failed to finalize moderation for comment {comment_id}: {err:#}");
            },
        }
    }
}

/// Starts `worker_count` workers draining a bounded queue of moderation
/// jobs and returns the sender side. The creation path enqueues and
/// moves on; workers suspend on the AI call without affecting anything
/// but their own job.
pub fn spawn_moderation_workers(
    pipeline: Arc<ModerationPipeline>,
    worker_count: usize,
    queue_depth: usize,
) -> mpsc::Sender<ModerationJob> {
    let (sender, receiver) = mpsc::channel::<ModerationJob>(queue_depth.max(1));
    let receiver = Arc::new(Mutex::new(receiver));

    for worker_index in 0..worker_count.max(1) {
        let pipeline = pipeline.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut guard = receiver.lock().await;
                    guard.recv().await
                };
                match job {
                    Some(job) => pipeline.moderate(job).await,
                    None => {
                        tracing::debug!("moderation worker {worker_index} stopping, queue closed");
                        break;
                    },
                }
            }
        });
    }

    sender
}

/// Fire-and-forget entry point for the comment-creation collaborator.
/// A full queue drops nothing silently: the comment simply stays
/// `pending` (and visible) until the startup sweep retries it.
pub fn start_moderation(sender: &mpsc::Sender<ModerationJob>, comment_id: String, content: String) {
    let job = ModerationJob { comment_id, content };
    if let Err(err) = sender.try_send(job) {
        tracing::warn!("moderation queue full or closed, comment left pending: {err}");
    }
}
