use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use skymap_common::Result;

use crate::job::{Job, JobStatus};

/// Persistence boundary for jobs: upsert-by-key plus the filtered lookups
/// the queue needs. `claim_next` must be atomic: no two callers may
/// receive the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// The pending or in-progress job for a handle, if any.
    async fn find_active_by_handle(&self, handle: &str) -> Result<Option<Job>>;

    /// Most recently created job for a handle regardless of status. Quota
    /// bookkeeping reads refresh counts from it.
    async fn latest_by_handle(&self, handle: &str) -> Result<Option<Job>>;

    /// Atomically claim the next runnable job: oldest pending job whose
    /// backoff has passed, ordered priority-handle first, then priority
    /// descending, then creation time ascending. Returns `None` when the
    /// in-progress count has reached `max_in_progress`.
    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        max_in_progress: usize,
        priority_handle: Option<&str>,
    ) -> Result<Option<Job>>;

    async fn in_progress_count(&self) -> Result<usize>;

    /// Jobs stuck in progress since before `cutoff`.
    async fn stuck_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>>;
}

/// In-memory store. A single mutex over the whole map makes the claim
/// read-modify-write atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, job: &Job) -> Result<()> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_active_by_handle(&self, handle: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .find(|job| job.handle == handle && job.status.is_active())
            .cloned())
    }

    async fn latest_by_handle(&self, handle: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.handle == handle)
            .max_by_key(|job| job.created_at)
            .cloned())
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        max_in_progress: usize,
        priority_handle: Option<&str>,
    ) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().await;

        let in_progress = jobs
            .values()
            .filter(|job| job.status == JobStatus::InProgress)
            .count();
        if in_progress >= max_in_progress {
            return Ok(None);
        }

        let best = jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .min_by(|a, b| {
                let a_priority_handle = priority_handle == Some(a.handle.as_str());
                let b_priority_handle = priority_handle == Some(b.handle.as_str());
                b_priority_handle
                    .cmp(&a_priority_handle)
                    .then(b.priority.cmp(&a.priority))
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|job| job.id);

        Ok(best.map(|id| {
            let job = jobs.get_mut(&id).expect("job present under lock");
            job.begin_attempt(now);
            job.clone()
        }))
    }

    async fn in_progress_count(&self) -> Result<usize> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.status == JobStatus::InProgress)
            .count())
    }

    async fn stuck_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| {
                job.status == JobStatus::InProgress
                    && job.started_at.map(|at| at < cutoff).unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_at(handle: &str, priority: i32, created: DateTime<Utc>) -> Job {
        let mut job = Job::new(handle, priority, false, 3, 1, created);
        job.created_at = created;
        job
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_age() {
        let store = MemoryJobStore::new();
        let base = Utc::now();
        let old_low = job_at("low.example", 0, base - chrono::Duration::minutes(10));
        let new_high = job_at("high.example", 5, base - chrono::Duration::minutes(1));
        store.upsert(&old_low).await.unwrap();
        store.upsert(&new_high).await.unwrap();

        let first = store.claim_next(base, 10, None).await.unwrap().unwrap();
        assert_eq!(first.handle, "high.example");
        let second = store.claim_next(base, 10, None).await.unwrap().unwrap();
        assert_eq!(second.handle, "low.example");
        assert!(store.claim_next(base, 10, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn priority_handle_always_sorts_first() {
        let store = MemoryJobStore::new();
        let base = Utc::now();
        store
            .upsert(&job_at("older.example", 9, base - chrono::Duration::hours(2)))
            .await
            .unwrap();
        store
            .upsert(&job_at("high.example", 9, base - chrono::Duration::hours(1)))
            .await
            .unwrap();
        store
            .upsert(&job_at("mid.example", 4, base - chrono::Duration::hours(3)))
            .await
            .unwrap();
        store.upsert(&job_at("p.example", 0, base)).await.unwrap();

        let first = store
            .claim_next(base, 10, Some("p.example"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.handle, "p.example");
    }

    #[tokio::test]
    async fn claim_respects_backoff_and_concurrency_cap() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let mut delayed = job_at("delayed.example", 0, now);
        delayed.next_attempt_at = Some(now + chrono::Duration::seconds(30));
        store.upsert(&delayed).await.unwrap();
        assert!(store.claim_next(now, 10, None).await.unwrap().is_none());
        assert!(store
            .claim_next(now + chrono::Duration::seconds(30), 10, None)
            .await
            .unwrap()
            .is_some());

        // One in progress, cap of one: nothing more to claim.
        store.upsert(&job_at("other.example", 0, now)).await.unwrap();
        assert_eq!(store.in_progress_count().await.unwrap(), 1);
        assert!(store.claim_next(now, 1, None).await.unwrap().is_none());
        assert!(store.claim_next(now, 2, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stuck_jobs_are_found_by_start_time() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let mut fresh = job_at("fresh.example", 0, now);
        fresh.begin_attempt(now);
        let mut stale = job_at("stale.example", 0, now);
        stale.begin_attempt(now - chrono::Duration::minutes(10));
        store.upsert(&fresh).await.unwrap();
        store.upsert(&stale).await.unwrap();

        let stuck = store
            .stuck_jobs(now - chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].handle, "stale.example");
    }
}
