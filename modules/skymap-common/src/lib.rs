pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Result, SkymapError};
pub use types::{
    Account, AnalysisResult, AnalysisStats, Community, CommunityMetrics, Connection,
    ConnectionKind, EdgeKind, GraphEdge, GraphNode, SocialGraph,
};
