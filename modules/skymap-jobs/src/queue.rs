use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use skymap_common::{Result, SkymapError};

use crate::job::Job;
use crate::progress::Progress;
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Refreshes allowed per handle per UTC calendar day.
    pub daily_refresh_limit: u32,
    /// Handle exempt from the quota and always scheduled first.
    pub priority_handle: Option<String>,
    pub max_attempts: u32,
    /// Max jobs in progress at once.
    pub max_concurrent: usize,
    /// An in-progress job older than this is presumed abandoned.
    pub stuck_threshold: chrono::Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            daily_refresh_limit: 5,
            priority_handle: None,
            max_attempts: 3,
            max_concurrent: 2,
            stuck_threshold: chrono::Duration::minutes(5),
        }
    }
}

/// Persistent work queue over a `JobStore`: per-handle dedup, daily
/// refresh quotas, priority claim ordering, retry with exponential
/// backoff, and stuck-job recovery.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a job for a handle, or return the one already active for it.
    /// A non-priority handle past its daily quota gets a job created
    /// directly in the terminal `rate_limited` state, never enqueued.
    pub async fn create_job(
        &self,
        handle: &str,
        priority: i32,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        if let Some(active) = self.store.find_active_by_handle(handle).await? {
            info!(handle, job_id = %active.id, status = %active.status, "Reusing active job");
            return Ok(active);
        }

        let today_count = match self.store.latest_by_handle(handle).await? {
            Some(latest) if same_utc_day(latest.last_refresh_date, now) => latest.refresh_count,
            _ => 0,
        };

        if !self.is_priority(handle) && today_count >= self.config.daily_refresh_limit {
            let err = SkymapError::QuotaExceeded {
                handle: handle.to_string(),
                limit: self.config.daily_refresh_limit,
            };
            let mut job = Job::new(handle, priority, force, self.config.max_attempts, today_count, now);
            job.reject_rate_limited(&err.to_string(), now);
            self.store.upsert(&job).await?;
            warn!(handle, refreshes = today_count, "Daily refresh quota exceeded");
            return Ok(job);
        }

        let job = Job::new(
            handle,
            priority,
            force,
            self.config.max_attempts,
            today_count + 1,
            now,
        );
        self.store.upsert(&job).await?;
        info!(handle, job_id = %job.id, priority, "Job enqueued");
        Ok(job)
    }

    /// Claim the next runnable job, bounded by the concurrency cap.
    pub async fn next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        self.store
            .claim_next(now, self.config.max_concurrent, self.config.priority_handle.as_deref())
            .await
    }

    pub async fn complete_job(&self, job: &mut Job, now: DateTime<Utc>) -> Result<()> {
        job.complete(now);
        self.store.upsert(job).await?;
        info!(job_id = %job.id, handle = job.handle.as_str(), "Job completed");
        Ok(())
    }

    /// Apply the retry policy after a handler failure: reschedule with
    /// `2^attempts` seconds of backoff while attempts remain, otherwise
    /// fail terminally.
    pub async fn fail_job(&self, job: &mut Job, error: &SkymapError, now: DateTime<Utc>) -> Result<()> {
        if job.attempts < job.max_attempts {
            let delay = chrono::Duration::seconds(2i64.pow(job.attempts));
            job.reschedule(delay, &error.to_string(), now);
            warn!(
                job_id = %job.id,
                handle = job.handle.as_str(),
                attempts = job.attempts,
                backoff_secs = delay.num_seconds(),
                error = %error,
                "Job failed, rescheduled with backoff"
            );
        } else {
            job.fail(&error.to_string(), now);
            warn!(
                job_id = %job.id,
                handle = job.handle.as_str(),
                attempts = job.attempts,
                error = %error,
                "Job failed terminally"
            );
        }
        self.store.upsert(job).await
    }

    /// Persist a progress tuple on the job. Regressions are dropped.
    pub async fn record_progress(
        &self,
        job: &mut Job,
        progress: Progress,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if job.record_progress(progress, now) {
            self.store.upsert(job).await?;
        }
        Ok(())
    }

    /// Reset jobs stuck in progress past the staleness threshold. Returns
    /// how many were recovered.
    pub async fn recover_stuck(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.config.stuck_threshold;
        let stuck = self.store.stuck_jobs(cutoff).await?;
        let recovered = stuck.len();
        for mut job in stuck {
            warn!(
                job_id = %job.id,
                handle = job.handle.as_str(),
                started_at = ?job.started_at,
                "Resetting stuck job to pending"
            );
            job.reset_stale(now);
            self.store.upsert(&job).await?;
        }
        Ok(recovered)
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn is_priority(&self, handle: &str) -> bool {
        self.config.priority_handle.as_deref() == Some(handle)
    }
}

/// The day boundary for quota purposes is midnight UTC, exactly.
fn same_utc_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::job::JobStatus;
    use crate::store::MemoryJobStore;

    use super::*;

    fn queue_with(config: QueueConfig) -> JobQueue {
        JobQueue::new(Arc::new(MemoryJobStore::new()), config)
    }

    fn queue() -> JobQueue {
        queue_with(QueueConfig::default())
    }

    #[tokio::test]
    async fn duplicate_create_returns_the_active_job() {
        let queue = queue();
        let now = Utc::now();

        let first = queue.create_job("alice.example", 0, false, now).await.unwrap();
        let second = queue.create_job("alice.example", 3, true, now).await.unwrap();
        assert_eq!(first.id, second.id);

        // Still deduplicated once the job is claimed.
        let claimed = queue.next_job(now).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        let third = queue.create_job("alice.example", 0, false, now).await.unwrap();
        assert_eq!(third.id, first.id);
    }

    #[tokio::test]
    async fn sixth_refresh_of_the_day_is_rate_limited() {
        let queue = queue();
        let mut now = Utc.with_ymd_and_hms(2026, 8, 5, 8, 0, 0).unwrap();

        for expected in 1..=5u32 {
            let mut job = queue.create_job("alice.example", 0, false, now).await.unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.refresh_count, expected);
            // Finish it so the next create is not deduplicated.
            job.begin_attempt(now);
            queue.complete_job(&mut job, now).await.unwrap();
            now = now + chrono::Duration::minutes(1);
        }

        let rejected = queue.create_job("alice.example", 0, false, now).await.unwrap();
        assert_eq!(rejected.status, JobStatus::RateLimited);
        assert!(rejected.error.as_deref().unwrap_or("").contains("quota"));
        assert!(queue.next_job(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quota_resets_at_utc_midnight() {
        let queue = queue();
        let late_evening = Utc.with_ymd_and_hms(2026, 8, 5, 23, 50, 0).unwrap();

        for _ in 0..5 {
            let mut job = queue
                .create_job("alice.example", 0, false, late_evening)
                .await
                .unwrap();
            job.begin_attempt(late_evening);
            queue.complete_job(&mut job, late_evening).await.unwrap();
        }
        let rejected = queue
            .create_job("alice.example", 0, false, late_evening)
            .await
            .unwrap();
        assert_eq!(rejected.status, JobStatus::RateLimited);

        // One second past midnight UTC the counter is effectively zero.
        let past_midnight = Utc.with_ymd_and_hms(2026, 8, 6, 0, 0, 1).unwrap();
        let fresh = queue
            .create_job("alice.example", 0, false, past_midnight)
            .await
            .unwrap();
        assert_eq!(fresh.status, JobStatus::Pending);
        assert_eq!(fresh.refresh_count, 1);
    }

    #[tokio::test]
    async fn priority_handle_bypasses_the_quota() {
        let queue = queue_with(QueueConfig {
            priority_handle: Some("p.example".to_string()),
            ..QueueConfig::default()
        });
        let now = Utc::now();

        for _ in 0..10 {
            let mut job = queue.create_job("p.example", 0, false, now).await.unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            job.begin_attempt(now);
            queue.complete_job(&mut job, now).await.unwrap();
        }
    }

    #[tokio::test]
    async fn priority_handle_claims_first() {
        let queue = queue_with(QueueConfig {
            priority_handle: Some("p.example".to_string()),
            max_concurrent: 10,
            ..QueueConfig::default()
        });
        let base = Utc::now();

        queue.create_job("old.example", 2, false, base - chrono::Duration::hours(3)).await.unwrap();
        queue.create_job("high.example", 9, false, base - chrono::Duration::hours(2)).await.unwrap();
        queue.create_job("mid.example", 5, false, base - chrono::Duration::hours(1)).await.unwrap();
        queue.create_job("p.example", 0, false, base).await.unwrap();

        let first = queue.next_job(base).await.unwrap().unwrap();
        assert_eq!(first.handle, "p.example");
        let second = queue.next_job(base).await.unwrap().unwrap();
        assert_eq!(second.handle, "high.example");
    }

    #[tokio::test]
    async fn retry_backoff_doubles_then_fails_terminally() {
        let queue = queue();
        let now = Utc::now();
        let err = SkymapError::Transport("connection reset".to_string());

        let mut job = queue.create_job("alice.example", 0, false, now).await.unwrap();

        job.begin_attempt(now);
        queue.fail_job(&mut job, &err, now).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        let first_delay = job.next_attempt_at.unwrap() - now;
        assert_eq!(first_delay, chrono::Duration::seconds(2));

        job.begin_attempt(now);
        queue.fail_job(&mut job, &err, now).await.unwrap();
        let second_delay = job.next_attempt_at.unwrap() - now;
        assert_eq!(second_delay, chrono::Duration::seconds(4));
        assert!(second_delay > first_delay);

        job.begin_attempt(now);
        queue.fail_job(&mut job, &err, now).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn stuck_jobs_return_to_pending() {
        let queue = queue();
        let start = Utc::now();

        queue.create_job("alice.example", 0, false, start).await.unwrap();
        let claimed = queue.next_job(start).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::InProgress);

        // Within the threshold nothing is recovered.
        assert_eq!(
            queue.recover_stuck(start + chrono::Duration::minutes(4)).await.unwrap(),
            0
        );

        let recovered = queue
            .recover_stuck(start + chrono::Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(recovered, 1);
        let again = queue
            .next_job(start + chrono::Duration::minutes(6))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.handle, "alice.example");
    }
}
