//! Daily admission quota for external AI classification calls.
//!
//! The quota is an explicit dependency of the pipeline: a trait with a
//! shared-store implementation, an in-process fallback, and a failover
//! decorator that downgrades to the fallback the first time the shared
//! store errors and never tries it again for the process lifetime.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use comment_guard_shared::quota_store::QuotaStore;
use parking_lot::Mutex;

pub const QUOTA_KEY_PREFIX: &str = "moderation:daily_count";
/// ~25 hours, so a day's key outlives the day boundary and then
/// self-cleans without an external reaper.
pub const QUOTA_KEY_TTL_SECONDS: i64 = 90_000;

#[async_trait]
pub trait DailyQuota: Send + Sync {
    /// True iff today's counter is strictly below the configured cap.
    async fn under_daily_limit(&self) -> Result<bool>;
    /// Increments today's counter and returns the new value.
    async fn record_call(&self) -> Result<i64>;
}

fn today() -> NaiveDate {
    // Process-local calendar date, matching the shared key format. Not
    // UTC-normalized.
    Local::now().date_naive()
}

pub fn daily_key_for(date: NaiveDate) -> String {
    format!("{QUOTA_KEY_PREFIX}:{}", date.format("%Y-%m-%d"))
}

/// Quota counter on the shared key-value store, visible to every
/// process instance pointing at the same store.
pub struct SharedDailyQuota {
    store: Arc<QuotaStore>,
    daily_limit: i64,
}

impl SharedDailyQuota {
    pub fn new(store: Arc<QuotaStore>, daily_limit: i64) -> Self {
        Self { store, daily_limit }
    }
}

#[async_trait]
impl DailyQuota for SharedDailyQuota {
    async fn under_daily_limit(&self) -> Result<bool> {
        let count = self.store.get_count(&daily_key_for(today())).await?;
        Ok(count < self.daily_limit)
    }

    async fn record_call(&self) -> Result<i64> {
        self.store
            .increment(&daily_key_for(today()), QUOTA_KEY_TTL_SECONDS)
            .await
    }
}

/// In-process fallback counter, keyed by the current date and reset
/// when the date changes. Not shared across process instances: when
/// more than one instance runs without the shared store, each counts
/// its own calls against the cap.
pub struct LocalDailyQuota {
    daily_limit: i64,
    state: Mutex<(NaiveDate, i64)>,
}

impl LocalDailyQuota {
    pub fn new(daily_limit: i64) -> Self {
        Self {
            daily_limit,
            state: Mutex::new((today(), 0)),
        }
    }

    fn under_limit_on(&self, date: NaiveDate) -> bool {
        let mut state = self.state.lock();
        if state.0 != date {
            *state = (date, 0);
        }
        state.1 < self.daily_limit
    }

    fn record_call_on(&self, date: NaiveDate) -> i64 {
        let mut state = self.state.lock();
        if state.0 != date {
            *state = (date, 0);
        }
        state.1 += 1;
        state.1
    }
}

#[async_trait]
impl DailyQuota for LocalDailyQuota {
    async fn under_daily_limit(&self) -> Result<bool> {
        Ok(self.under_limit_on(today()))
    }

    async fn record_call(&self) -> Result<i64> {
        Ok(self.record_call_on(today()))
    }
}

/// One-way failover from a primary quota to the in-process fallback.
/// The first primary error flips a sticky flag; afterwards the primary
/// is never touched again, so each comment does not pay a fresh
/// connection-timeout against a store that is known to be down.
pub struct FailoverDailyQuota {
    primary: Arc<dyn DailyQuota>,
    fallback: LocalDailyQuota,
    primary_available: AtomicBool,
}

impl FailoverDailyQuota {
    pub fn new(primary: Arc<dyn DailyQuota>, fallback: LocalDailyQuota) -> Self {
        Self {
            primary,
            fallback,
            primary_available: AtomicBool::new(true),
        }
    }

    fn downgrade(&self, err: &anyhow::Error) {
        if self.primary_available.swap(false, Ordering::SeqCst) {
            tracing::warn!("quota store unavailable, falling back to in-process counter: {err:#}");
        }
    }
}

#[async_trait]
impl DailyQuota for FailoverDailyQuota {
    async fn under_daily_limit(&self) -> Result<bool> {
        if self.primary_available.load(Ordering::SeqCst) {
            match self.primary.under_daily_limit().await {
                Ok(value) => return Ok(value),
                Err(err) => self.downgrade(&err),
            }
        }
        self.fallback.under_daily_limit().await
    }

    async fn record_call(&self) -> Result<i64> {
        if self.primary_available.load(Ordering::SeqCst) {
            match self.primary.record_call().await {
                Ok(value) => return Ok(value),
                Err(err) => self.downgrade(&err),
            }
        }
        self.fallback.record_call().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::{daily_key_for, DailyQuota, FailoverDailyQuota, LocalDailyQuota};

    struct BrokenQuota {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DailyQuota for BrokenQuota {
        async fn under_daily_limit(&self) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }

        async fn record_call(&self) -> Result<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn daily_key_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 26).expect("valid date");
        assert_eq!(daily_key_for(date), "moderation:daily_count:2026-08-26");
    }

    #[test]
    fn local_quota_counts_within_a_date_and_resets_on_rollover() {
        let quota = LocalDailyQuota::new(2);
        let day1 = NaiveDate::from_ymd_opt(2026, 8, 26).expect("valid date");
        let day2 = NaiveDate::from_ymd_opt(2026, 8, 27).expect("valid date");

        assert!(quota.under_limit_on(day1));
        assert_eq!(quota.record_call_on(day1), 1);
        assert_eq!(quota.record_call_on(day1), 2);
        assert!(!quota.under_limit_on(day1));

        // Date change resets the counter to zero.
        assert!(quota.under_limit_on(day2));
        assert_eq!(quota.record_call_on(day2), 1);
    }

    #[tokio::test]
    async fn failover_is_sticky_after_first_primary_error() {
        let primary = Arc::new(BrokenQuota { calls: AtomicUsize::new(0) });
        let quota = FailoverDailyQuota::new(primary.clone(), LocalDailyQuota::new(10));

        // First call hits the primary, observes the failure and falls
        // back; the answer still comes from the local counter.
        assert!(quota.under_daily_limit().await.expect("under limit"));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        // Subsequent calls never touch the primary again.
        assert_eq!(quota.record_call().await.expect("record"), 1);
        assert_eq!(quota.record_call().await.expect("record"), 2);
        assert!(quota.under_daily_limit().await.expect("under limit"));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failover_prefers_primary_while_healthy() {
        struct HealthyQuota;

        #[async_trait]
        impl DailyQuota for HealthyQuota {
            async fn under_daily_limit(&self) -> Result<bool> {
                Ok(false)
            }

            async fn record_call(&self) -> Result<i64> {
                Ok(42)
            }
        }

        let quota = FailoverDailyQuota::new(Arc::new(HealthyQuota), LocalDailyQuota::new(10));
        assert!(!quota.under_daily_limit().await.expect("under limit"));
        assert_eq!(quota.record_call().await.expect("record"), 42);
    }
}
