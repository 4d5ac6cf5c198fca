use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::job::Job;
use crate::pipeline::AnalysisPipeline;
use crate::queue::JobQueue;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler looks for claimable work.
    pub poll_interval: Duration,
    /// How often stuck jobs are swept back to pending.
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Polling worker loop: claims at most one job per tick (the store
/// enforces the global in-progress cap), processes each claimed job in
/// its own task, and periodically recovers stuck jobs. Shutdown stops
/// claiming and lets in-flight jobs finish.
pub struct JobScheduler {
    queue: Arc<JobQueue>,
    pipeline: Arc<AnalysisPipeline>,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(queue: Arc<JobQueue>, pipeline: Arc<AnalysisPipeline>, config: SchedulerConfig) -> Self {
        Self {
            queue,
            pipeline,
            config,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            "Job scheduler started"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    while let Some(finished) = in_flight.try_join_next() {
                        if let Err(e) = finished {
                            error!(error = %e, "Job task panicked");
                        }
                    }

                    match self.queue.next_job(Utc::now()).await {
                        Ok(Some(job)) => {
                            let queue = Arc::clone(&self.queue);
                            let pipeline = Arc::clone(&self.pipeline);
                            in_flight.spawn(async move {
                                process(queue, pipeline, job).await;
                            });
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "Failed to poll for jobs"),
                    }
                }
                _ = sweep.tick() => {
                    match self.queue.recover_stuck(Utc::now()).await {
                        Ok(0) => {}
                        Ok(recovered) => info!(recovered, "Recovered stuck jobs"),
                        Err(e) => warn!(error = %e, "Stuck-job sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "Scheduler shutting down, draining jobs");
        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Job task panicked during drain");
            }
        }
    }
}

/// One job, processed to completion or failure. Errors are caught here,
/// once, and turned into a retry or a terminal failure.
async fn process(queue: Arc<JobQueue>, pipeline: Arc<AnalysisPipeline>, mut job: Job) {
    info!(
        job_id = %job.id,
        handle = job.handle.as_str(),
        attempt = job.attempts,
        "Processing job"
    );

    match pipeline.run(&mut job).await {
        Ok(_) => {
            if let Err(e) = queue.complete_job(&mut job, Utc::now()).await {
                error!(job_id = %job.id, error = %e, "Failed to persist job completion");
            }
        }
        Err(e) => {
            if let Err(persist) = queue.fail_job(&mut job, &e, Utc::now()).await {
                error!(job_id = %job.id, error = %persist, "Failed to persist job failure");
            }
            pipeline.publish_error(&job).await;
        }
    }
}
