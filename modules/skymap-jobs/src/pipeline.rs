use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use skymap_common::{AnalysisResult, AnalysisStats, Connection, ConnectionKind, Result, SkymapError};
use skymap_graph::collector::analysis_key;
use skymap_graph::{
    build_graph, resolve_mutuals, Cache, CommunityDetector, ConnectionCollector, TtlBucket,
};

use crate::job::Job;
use crate::progress::{Progress, ProgressDetails, ProgressSink, ProgressStage};
use crate::queue::JobQueue;

/// The job handler: collect the subject's connections, resolve mutuals,
/// build the graph, partition it, and cache the result. Progress is
/// persisted and published at every phase transition; provider errors
/// bubble up to the scheduler, which applies the retry policy once.
pub struct AnalysisPipeline {
    collector: Arc<ConnectionCollector>,
    cache: Arc<Cache>,
    queue: Arc<JobQueue>,
    sink: Arc<dyn ProgressSink>,
    detector: CommunityDetector,
}

impl AnalysisPipeline {
    pub fn new(
        collector: Arc<ConnectionCollector>,
        cache: Arc<Cache>,
        queue: Arc<JobQueue>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            collector,
            cache,
            queue,
            sink,
            detector: CommunityDetector::new(),
        }
    }

    pub async fn run(&self, job: &mut Job) -> Result<AnalysisResult> {
        self.report(job, Progress::new(ProgressStage::Initializing, 0, "Starting analysis"))
            .await?;

        let profile = self.collector.profile(&job.handle, job.force).await?;

        self.report(
            job,
            Progress::new(ProgressStage::Collecting, 10, "Collecting connection lists"),
        )
        .await?;
        let connections = self.collector.connections(&job.handle, job.force).await?;

        self.report(
            job,
            Progress::new(ProgressStage::Analyzing, 40, "Resolving mutual connections"),
        )
        .await?;
        let mutuals = resolve_mutuals(&connections.followers, &connections.following);
        let stats = AnalysisStats {
            followers: connections.followers.len() as u32,
            following: connections.following.len() as u32,
            mutuals: mutuals.len() as u32,
        };

        let resolved_at = Utc::now();
        let records: Vec<Connection> = mutuals
            .iter()
            .map(|account| Connection {
                owner_id: profile.id.clone(),
                other_id: account.id.clone(),
                kind: ConnectionKind::Mutual,
                profile: account.clone(),
                resolved_at,
            })
            .collect();
        let graph = build_graph(&profile, &records, &[]);

        self.report(
            job,
            Progress::new(ProgressStage::Processing, 70, "Detecting communities").with_details(
                ProgressDetails {
                    processed_nodes: graph.node_count() as u32,
                    processed_edges: graph.edge_count() as u32,
                    discovered_communities: 0,
                },
            ),
        )
        .await?;

        // CPU-bound; keep it off the I/O worker threads.
        let detector = self.detector;
        let detector_input = graph.clone();
        let communities = tokio::task::spawn_blocking(move || detector.detect(&detector_input))
            .await
            .map_err(|e| SkymapError::Job(format!("community detection task died: {e}")))?;

        let result = AnalysisResult {
            subject_id: profile.id.clone(),
            handle: job.handle.clone(),
            stats,
            communities,
            last_updated: Utc::now(),
        };
        self.cache
            .set(&analysis_key(&job.handle), &result, TtlBucket::Long, result.last_updated)
            .await?;

        self.report(
            job,
            Progress::new(ProgressStage::Completed, 100, "Analysis complete").with_details(
                ProgressDetails {
                    processed_nodes: graph.node_count() as u32,
                    processed_edges: graph.edge_count() as u32,
                    discovered_communities: result.communities.len() as u32,
                },
            ),
        )
        .await?;

        info!(
            handle = job.handle.as_str(),
            mutuals = stats.mutuals,
            communities = result.communities.len(),
            "Analysis finished"
        );
        Ok(result)
    }

    /// Publish the job's terminal error progress to listeners.
    pub async fn publish_error(&self, job: &Job) {
        self.sink.publish(job.id, &job.progress).await;
    }

    async fn report(&self, job: &mut Job, progress: Progress) -> Result<()> {
        self.queue
            .record_progress(job, progress.clone(), Utc::now())
            .await?;
        self.sink.publish(job.id, &progress).await;
        Ok(())
    }
}
