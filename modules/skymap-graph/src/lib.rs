pub mod builder;
pub mod cache;
pub mod collector;
pub mod community;
pub mod gateway;
pub mod mutuals;
pub mod provider;

pub use builder::build_graph;
pub use cache::{Cache, CacheBackend, CacheRecord, MemoryCacheStore, TtlBucket};
pub use collector::{analysis_key, CollectedConnections, ConnectionCollector};
pub use community::CommunityDetector;
pub use gateway::{FetchGateway, GatewayConfig};
pub use mutuals::{resolve_mutuals, verify_mutual};
pub use provider::{ConnectionPage, GraphSource};
