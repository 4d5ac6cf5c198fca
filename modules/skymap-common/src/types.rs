use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Account and connection types ---

/// A social account as seen by the graph data provider. Identified by a
/// stable opaque subject id; the handle is human-readable and may be
/// reassigned, so identity comparisons always key on `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub followers_count: u32,
    pub following_count: u32,
    pub posts_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Follower,
    Following,
    Mutual,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::Follower => write!(f, "follower"),
            ConnectionKind::Following => write!(f, "following"),
            ConnectionKind::Mutual => write!(f, "mutual"),
        }
    }
}

/// A directed relationship between two accounts, with a snapshot of the
/// other account's profile taken at resolution time. Superseded, never
/// mutated, on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub owner_id: String,
    pub other_id: String,
    pub kind: ConnectionKind,
    pub profile: Account,
    pub resolved_at: DateTime<Utc>,
}

// --- Graph types ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub display_name: String,
    pub handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Follows,
    Mutual,
}

impl EdgeKind {
    /// Edge weight used by the community detector. Mutual relationships
    /// count twice as heavily toward shared-neighbor overlap.
    pub fn weight(&self) -> u32 {
        match self {
            EdgeKind::Follows => 1,
            EdgeKind::Mutual => 2,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Follows => write!(f, "follows"),
            EdgeKind::Mutual => write!(f, "mutual"),
        }
    }
}

/// Undirected in effect; stored as (source, target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

impl GraphEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }
}

/// Node/edge structure produced by the graph builder. Node order is
/// insertion order; the community detector's output depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialGraph {
    /// The subject account being analyzed.
    pub central_id: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl SocialGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

// --- Community types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommunityMetrics {
    /// Actual intra-community edges over possible pairs.
    pub density: f64,
    /// Mutual-kind intra-community edges over total intra-community edges.
    pub cohesion: f64,
}

/// One partition cell of the analyzed graph. Members are node ids in
/// node-insertion order; central nodes are the top members by
/// intra-community weighted degree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: u32,
    pub members: Vec<String>,
    pub central_nodes: Vec<String>,
    pub metrics: CommunityMetrics,
}

// --- Analysis result ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub followers: u32,
    pub following: u32,
    pub mutuals: u32,
}

/// Completed analysis for one subject account. Created once per completed
/// job; superseded by later jobs for the same handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub subject_id: String,
    pub handle: String,
    pub stats: AnalysisStats,
    pub communities: Vec<Community>,
    pub last_updated: DateTime<Utc>,
}
