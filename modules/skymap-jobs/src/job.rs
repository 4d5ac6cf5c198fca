use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::{Progress, ProgressStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RateLimited,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::RateLimited
        )
    }

    /// Pending or in-progress: counts against the one-active-job-per-handle
    /// invariant.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// One analysis request for a handle. All state transitions go through
/// the lifecycle methods below; nothing outside this type flips a status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub handle: String,
    pub status: JobStatus,
    pub priority: i32,
    /// Bypass cache validity during collection.
    pub force: bool,
    pub progress: Progress,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time a rescheduled job may be claimed again.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Refreshes performed for this handle on `last_refresh_date`'s UTC day.
    pub refresh_count: u32,
    pub last_refresh_date: DateTime<Utc>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        handle: impl Into<String>,
        priority: i32,
        force: bool,
        max_attempts: u32,
        refresh_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: handle.into(),
            status: JobStatus::Pending,
            priority,
            force,
            progress: Progress::default(),
            attempts: 0,
            max_attempts,
            next_attempt_at: None,
            refresh_count,
            last_refresh_date: now,
            error: None,
            created_at: now,
            started_at: None,
            updated_at: now,
        }
    }

    /// Claim the job for processing.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::InProgress;
        self.attempts += 1;
        self.next_attempt_at = None;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.error = None;
        self.updated_at = now;
    }

    /// Return the job to the queue with a backoff delay.
    pub fn reschedule(&mut self, delay: chrono::Duration, error: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.next_attempt_at = Some(now + delay);
        self.error = Some(error.to_string());
        self.updated_at = now;
    }

    /// Terminal failure; no more retries.
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.progress = Progress::new(ProgressStage::Error, self.progress.current, error)
            .with_details(self.progress.details);
        self.updated_at = now;
    }

    /// Terminal quota rejection, assigned at creation time. The job is
    /// never dequeued.
    pub fn reject_rate_limited(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = JobStatus::RateLimited;
        self.error = Some(error.to_string());
        self.progress =
            Progress::new(ProgressStage::Error, 0, error).with_details(self.progress.details);
        self.updated_at = now;
    }

    /// Crash recovery: a worker died mid-job, put it back in the queue
    /// without counting an extra failure.
    pub fn reset_stale(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.updated_at = now;
    }

    /// Persist a progress tuple, ignoring anything that would move the
    /// reported state backwards.
    pub fn record_progress(&mut self, progress: Progress, now: DateTime<Utc>) -> bool {
        if !progress.supersedes(&self.progress) {
            return false;
        }
        self.progress = progress;
        self.updated_at = now;
        true
    }

    /// Whether a pending job may be claimed at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.next_attempt_at.map(|at| at <= now).unwrap_or(true)
    }
}
