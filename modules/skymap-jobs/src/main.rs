use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bluesky_client::BlueskyClient;
use skymap_common::Config;
use skymap_graph::{
    Cache, ConnectionCollector, FetchGateway, GatewayConfig, GraphSource, MemoryCacheStore,
};
use skymap_jobs::{
    AnalysisPipeline, BroadcastSink, JobQueue, JobScheduler, ProgressSink, QueueConfig,
    SchedulerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("skymap=info".parse()?))
        .init();

    info!("Skymap worker starting...");

    let config = Config::from_env();

    // Wire the stack: provider behind the gateway, cache in front of both.
    let client: Arc<dyn GraphSource> = Arc::new(BlueskyClient::new(config.provider_base_url.clone()));
    let gateway = Arc::new(FetchGateway::new(GatewayConfig::default()));
    let cache = Arc::new(Cache::new(Arc::new(MemoryCacheStore::new())));
    cache.spawn_sweep_loop(Duration::from_secs(3600));
    let collector = Arc::new(ConnectionCollector::new(client, gateway, Arc::clone(&cache)));

    let queue = Arc::new(JobQueue::new(
        Arc::new(skymap_jobs::MemoryJobStore::new()),
        QueueConfig {
            daily_refresh_limit: config.daily_refresh_limit,
            priority_handle: config.priority_handle.clone(),
            max_attempts: config.job_max_attempts,
            max_concurrent: config.max_concurrent_jobs,
            ..QueueConfig::default()
        },
    ));

    let sink = Arc::new(BroadcastSink::new(64));
    let mut progress_rx = sink.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = progress_rx.recv().await {
            info!(
                job_id = %event.job_id,
                stage = %event.progress.stage,
                current = event.progress.current,
                total = event.progress.total,
                message = event.progress.message.as_str(),
                "Progress"
            );
        }
    });

    let pipeline = Arc::new(AnalysisPipeline::new(
        collector,
        cache,
        Arc::clone(&queue),
        sink as Arc<dyn ProgressSink>,
    ));

    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&queue),
        pipeline,
        SchedulerConfig {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            ..SchedulerConfig::default()
        },
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let job = queue
        .create_job(&config.subject_handle, 0, false, Utc::now())
        .await?;
    info!(job_id = %job.id, handle = config.subject_handle.as_str(), status = %job.status, "Job enqueued");

    // Run until the job reaches a terminal state, then shut down cleanly.
    let final_job = loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        match queue.store().get(job.id).await? {
            Some(current) if current.status.is_terminal() => break current,
            _ => {}
        }
    };

    shutdown_tx.send(true)?;
    scheduler_task.await?;

    info!(
        job_id = %final_job.id,
        status = %final_job.status,
        communities = final_job.progress.details.discovered_communities,
        nodes = final_job.progress.details.processed_nodes,
        edges = final_job.progress.details.processed_edges,
        error = final_job.error.as_deref().unwrap_or(""),
        "Worker finished"
    );
    Ok(())
}
