use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline phases in execution order. `Error` sorts last so that any
/// transition into it still satisfies the non-decreasing rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Initializing,
    Collecting,
    Analyzing,
    Processing,
    Completed,
    Error,
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStage::Initializing => write!(f, "initializing"),
            ProgressStage::Collecting => write!(f, "collecting"),
            ProgressStage::Analyzing => write!(f, "analyzing"),
            ProgressStage::Processing => write!(f, "processing"),
            ProgressStage::Completed => write!(f, "completed"),
            ProgressStage::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDetails {
    pub processed_nodes: u32,
    pub processed_edges: u32,
    pub discovered_communities: u32,
}

/// One progress tuple as persisted on the job and published to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: ProgressStage,
    pub current: u32,
    pub total: u32,
    pub message: String,
    pub details: ProgressDetails,
}

impl Progress {
    pub fn new(stage: ProgressStage, current: u32, message: impl Into<String>) -> Self {
        Self {
            stage,
            current,
            total: 100,
            message: message.into(),
            details: ProgressDetails::default(),
        }
    }

    pub fn with_details(mut self, details: ProgressDetails) -> Self {
        self.details = details;
        self
    }

    /// Updates may never move backwards: the stage must not regress, and
    /// within a stage the counter must not shrink.
    pub fn supersedes(&self, previous: &Progress) -> bool {
        match self.stage.cmp(&previous.stage) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.current >= previous.current,
            std::cmp::Ordering::Less => false,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(ProgressStage::Initializing, 0, "Queued")
    }
}

// --- Progress sinks ---

/// Best-effort delivery of progress updates to live listeners. Must never
/// block or fail job processing, subscribers or not.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, job_id: Uuid, progress: &Progress);
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub progress: Progress,
}

/// Fan-out sink over a tokio broadcast channel. Send errors mean nobody
/// is listening, which is fine.
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn publish(&self, job_id: Uuid, progress: &Progress) {
        let _ = self.tx.send(ProgressEvent {
            job_id,
            progress: progress.clone(),
        });
    }
}

/// Sink that discards everything. Used by tests and quota-rejected jobs.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn publish(&self, _job_id: Uuid, _progress: &Progress) {}
}
