pub mod job;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use job::{Job, JobStatus};
pub use pipeline::AnalysisPipeline;
pub use progress::{
    BroadcastSink, NullSink, Progress, ProgressDetails, ProgressEvent, ProgressSink, ProgressStage,
};
pub use queue::{JobQueue, QueueConfig};
pub use scheduler::{JobScheduler, SchedulerConfig};
pub use store::{JobStore, MemoryJobStore};
