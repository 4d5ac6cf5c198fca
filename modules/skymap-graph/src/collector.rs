use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use skymap_common::{Account, Result};

use crate::cache::{Cache, TtlBucket};
use crate::gateway::FetchGateway;
use crate::provider::{ConnectionPage, GraphSource};

/// Hard ceiling on pages per listing, guarding against a provider cursor
/// that never terminates.
const MAX_PAGES: usize = 200;

// Cache key layout. Invalidation relies on these prefixes.

pub fn profile_key(handle: &str) -> String {
    format!("profile:{handle}")
}

pub fn followers_key(handle: &str) -> String {
    format!("connections:{handle}:followers")
}

pub fn following_key(handle: &str) -> String {
    format!("connections:{handle}:following")
}

pub fn analysis_key(handle: &str) -> String {
    format!("analysis:{handle}")
}

#[derive(Debug, Clone)]
pub struct CollectedConnections {
    pub followers: Vec<Account>,
    pub following: Vec<Account>,
}

/// Read-through composition of cache, gateway, and provider: the only
/// path the rest of the system uses to reach the graph data provider.
pub struct ConnectionCollector {
    source: Arc<dyn GraphSource>,
    gateway: Arc<FetchGateway>,
    cache: Arc<Cache>,
}

impl ConnectionCollector {
    pub fn new(source: Arc<dyn GraphSource>, gateway: Arc<FetchGateway>, cache: Arc<Cache>) -> Self {
        Self {
            source,
            gateway,
            cache,
        }
    }

    /// Subject profile, cached in the short bucket.
    pub async fn profile(&self, handle: &str, force: bool) -> Result<Account> {
        self.cache
            .get_or_fetch(&profile_key(handle), TtlBucket::Short, force, Utc::now(), || async {
                self.gateway.execute(|| self.source.profile(handle)).await
            })
            .await
    }

    /// Full follower list, paginated until the provider stops returning a
    /// cursor. Cached in the short bucket.
    pub async fn followers(&self, handle: &str, force: bool) -> Result<Vec<Account>> {
        self.cache
            .get_or_fetch(&followers_key(handle), TtlBucket::Short, force, Utc::now(), || async {
                self.collect_pages(handle, Listing::Followers).await
            })
            .await
    }

    /// Full following list, same contract as `followers`.
    pub async fn following(&self, handle: &str, force: bool) -> Result<Vec<Account>> {
        self.cache
            .get_or_fetch(&following_key(handle), TtlBucket::Short, force, Utc::now(), || async {
                self.collect_pages(handle, Listing::Following).await
            })
            .await
    }

    /// Both connection lists for a handle.
    pub async fn connections(&self, handle: &str, force: bool) -> Result<CollectedConnections> {
        let followers = self.followers(handle, force).await?;
        let following = self.following(handle, force).await?;
        info!(
            handle,
            followers = followers.len(),
            following = following.len(),
            "Connection lists collected"
        );
        Ok(CollectedConnections {
            followers,
            following,
        })
    }

    /// Drop every cached record for a handle.
    pub async fn invalidate(&self, handle: &str) -> Result<()> {
        self.cache.invalidate(&profile_key(handle)).await?;
        self.cache.invalidate(&format!("connections:{handle}:*")).await?;
        self.cache.invalidate(&analysis_key(handle)).await?;
        Ok(())
    }

    async fn collect_pages(&self, handle: &str, listing: Listing) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page: ConnectionPage = self
                .gateway
                .execute(|| async {
                    match listing {
                        Listing::Followers => {
                            self.source.followers_page(handle, cursor.as_deref()).await
                        }
                        Listing::Following => {
                            self.source.follows_page(handle, cursor.as_deref()).await
                        }
                    }
                })
                .await?;

            accounts.extend(page.accounts);
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(accounts),
            }
        }

        warn!(handle, listing = listing.as_str(), pages = MAX_PAGES, "Listing page bound hit, truncating");
        Ok(accounts)
    }
}

#[derive(Debug, Clone, Copy)]
enum Listing {
    Followers,
    Following,
}

impl Listing {
    fn as_str(&self) -> &'static str {
        match self {
            Listing::Followers => "followers",
            Listing::Following => "following",
        }
    }
}

impl std::fmt::Debug for ConnectionCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCollector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use skymap_common::SkymapError;

    use crate::cache::MemoryCacheStore;
    use crate::gateway::{FetchGateway, GatewayConfig};

    use super::*;

    fn account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            handle: format!("{id}.example"),
            display_name: id.to_string(),
            followers_count: 0,
            following_count: 0,
            posts_count: 0,
        }
    }

    /// Provider serving a fixed set of two-page listings.
    struct PagedSource {
        calls: AtomicUsize,
    }

    impl PagedSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GraphSource for PagedSource {
        async fn profile(&self, _actor: &str) -> Result<Account> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(account("did:subject"))
        }

        async fn followers_page(
            &self,
            _actor: &str,
            cursor: Option<&str>,
        ) -> Result<ConnectionPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match cursor {
                None => Ok(ConnectionPage {
                    accounts: vec![account("did:1"), account("did:2")],
                    cursor: Some("page2".to_string()),
                }),
                Some("page2") => Ok(ConnectionPage {
                    accounts: vec![account("did:3")],
                    cursor: None,
                }),
                Some(other) => Err(SkymapError::Transport(format!("bad cursor {other}"))),
            }
        }

        async fn follows_page(&self, _actor: &str, _cursor: Option<&str>) -> Result<ConnectionPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ConnectionPage {
                accounts: vec![account("did:2")],
                cursor: None,
            })
        }
    }

    fn collector(source: Arc<PagedSource>) -> ConnectionCollector {
        let config = GatewayConfig {
            min_delay: std::time::Duration::ZERO,
            min_spacing: std::time::Duration::ZERO,
            jitter_ms: 0,
            ..GatewayConfig::default()
        };
        ConnectionCollector::new(
            source,
            Arc::new(FetchGateway::new(config)),
            Arc::new(Cache::new(Arc::new(MemoryCacheStore::new()))),
        )
    }

    #[tokio::test]
    async fn followers_page_until_cursor_is_absent() {
        let source = Arc::new(PagedSource::new());
        let collector = collector(Arc::clone(&source));

        let followers = collector.followers("alice.example", false).await.unwrap();
        let ids: Vec<&str> = followers.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["did:1", "did:2", "did:3"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cached_listing_skips_the_provider() {
        let source = Arc::new(PagedSource::new());
        let collector = collector(Arc::clone(&source));

        collector.followers("alice.example", false).await.unwrap();
        let after_first = source.calls.load(Ordering::SeqCst);
        collector.followers("alice.example", false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn force_refetches_through_the_provider() {
        let source = Arc::new(PagedSource::new());
        let collector = collector(Arc::clone(&source));

        collector.followers("alice.example", false).await.unwrap();
        let after_first = source.calls.load(Ordering::SeqCst);
        collector.followers("alice.example", true).await.unwrap();
        assert!(source.calls.load(Ordering::SeqCst) > after_first);
    }

    #[tokio::test]
    async fn invalidate_clears_every_key_for_the_handle() {
        let source = Arc::new(PagedSource::new());
        let collector = collector(Arc::clone(&source));

        collector.profile("alice.example", false).await.unwrap();
        collector.connections("alice.example", false).await.unwrap();
        let after_warm = source.calls.load(Ordering::SeqCst);

        collector.invalidate("alice.example").await.unwrap();
        collector.profile("alice.example", false).await.unwrap();
        collector.connections("alice.example", false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), after_warm * 2);
    }
}
